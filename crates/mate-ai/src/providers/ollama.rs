//! Ollama HTTP API provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{InferenceProvider, LOOKUP_TIMEOUT, ONE_SHOT_TIMEOUT};
use crate::{
    error::{Error, Result},
    stream::{ChunkStream, ndjson_chunks},
    types::{ClientConfig, GenerateRequest, GenerateResponse, ModelInfo, ModelTag},
};

/// Ollama API client
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    /// Create a provider for a server base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a provider from client settings
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "server URL must start with http:// or https://, got '{}'",
                config.base_url
            )));
        }
        Ok(Self::new(config.base_url.clone()))
    }

    /// Server base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }
}

/// Turn a non-success response into an API error carrying the body text
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    Err(Error::api(status.as_u16(), message))
}

#[async_trait]
impl InferenceProvider for OllamaProvider {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ChunkStream> {
        let mut request = request;
        request.stream = true;
        let url = self.url("generate");

        tracing::debug!(
            "REQUEST POST {}\n{}",
            url,
            serde_json::to_string_pretty(&request).unwrap_or_default()
        );

        let response = self.client.post(&url).json(&request).send().await?;
        tracing::debug!("RESPONSE STATUS: {}", response.status());
        let response = check_status(response).await?;

        Ok(Box::pin(ndjson_chunks(response.bytes_stream())))
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let request = request.non_streaming();
        let timeout = ONE_SHOT_TIMEOUT.as_secs();

        let response = self
            .client
            .post(self.url("generate"))
            .timeout(ONE_SHOT_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::from_request(e, timeout))?;
        let response = check_status(response).await?;

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| Error::from_request(e, timeout))
    }

    async fn list_models(&self) -> Result<Vec<ModelTag>> {
        let timeout = LOOKUP_TIMEOUT.as_secs();
        let response = self
            .client
            .get(self.url("tags"))
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::from_request(e, timeout))?;
        let response = check_status(response).await?;

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::from_request(e, timeout))?;
        Ok(tags.models)
    }

    async fn model_info(&self, name: &str) -> Result<ModelInfo> {
        let timeout = LOOKUP_TIMEOUT.as_secs();
        let response = self
            .client
            .post(self.url("show"))
            .timeout(LOOKUP_TIMEOUT)
            .json(&ShowRequest { name })
            .send()
            .await
            .map_err(|e| Error::from_request(e, timeout))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::ModelNotFound(name.to_string()));
        }
        let response = check_status(response).await?;

        let mut info: ModelInfo = response
            .json()
            .await
            .map_err(|e| Error::from_request(e, timeout))?;
        info.name = name.to_string();
        Ok(info)
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Serialize)]
struct ShowRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_trailing_slash_trimmed() {
        let provider = OllamaProvider::new("http://localhost:11434/");
        assert_eq!(provider.base_url(), "http://localhost:11434");
        assert_eq!(provider.url("tags"), "http://localhost:11434/api/tags");
    }

    #[test]
    fn test_from_config_rejects_bad_scheme() {
        let config = ClientConfig {
            base_url: "localhost:11434".into(),
            ..Default::default()
        };
        assert!(matches!(
            OllamaProvider::from_config(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_generate_threads_context() {
        let server = MockServer::start().await;
        let body = "{\"response\":\"Hello\",\"done\":false}\n\
                    {\"response\":\" world\",\"done\":false}\n\
                    {\"response\":\"\",\"done\":true,\"context\":[7,8,9]}\n";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "stream": true,
                "context": [1, 2]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri());
        let request = ClientConfig::default().request("hi").with_context(&[1, 2]);
        let chunks: Vec<_> = provider
            .stream_generate(request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        let text: String = chunks
            .iter()
            .filter_map(|c| c.as_ref().unwrap().response.clone())
            .collect();
        assert_eq!(text, "Hello world");
        assert_eq!(chunks[2].as_ref().unwrap().context, Some(vec![7, 8, 9]));
    }

    #[tokio::test]
    async fn test_stream_generate_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string("{\"error\":\"model 'nope' not found\"}"),
            )
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri());
        let result = provider
            .stream_generate(ClientConfig::default().request("hi"))
            .await;
        match result {
            Err(Error::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "model 'nope' not found");
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_generate_non_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "fn main() {}",
                "done": true
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri());
        let response = provider
            .generate(ClientConfig::default().request("complete"))
            .await
            .unwrap();
        assert_eq!(response.response, "fn main() {}");
        assert!(response.done);
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [
                    {"name": "mistral:latest", "size": 4109865159u64, "digest": "abc"},
                    {"name": "llama3.1:8b"}
                ]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri());
        let models = provider.list_models().await.unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["mistral:latest", "llama3.1:8b"]);
        assert!(provider.check_connection().await);
    }

    #[tokio::test]
    async fn test_model_info_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri());
        assert!(matches!(
            provider.model_info("ghost").await,
            Err(Error::ModelNotFound(ref name)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_model_info_sets_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/show"))
            .and(body_partial_json(serde_json::json!({"name": "mistral"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "details": {"family": "llama", "parameter_size": "7B"},
                "model_info": {"llama.context_length": 32768}
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri());
        let info = provider.model_info("mistral").await.unwrap();
        assert_eq!(info.name, "mistral");
        assert_eq!(info.details.parameter_size, "7B");
        assert_eq!(info.context_length(), Some(32768));
    }

    #[tokio::test]
    async fn test_check_connection_unreachable() {
        // Port 9 (discard) is essentially never serving HTTP
        let provider = OllamaProvider::new("http://127.0.0.1:9");
        assert!(!provider.check_connection().await);
    }
}

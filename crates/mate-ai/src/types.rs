//! Core types for inference requests and chat history

use serde::{Deserialize, Serialize};

/// Opaque model-internal conversation state returned by the server.
///
/// Never interpreted client-side; it is threaded back into the next request
/// and persisted alongside the conversation.
pub type ContextTokens = Vec<i64>;

/// Default server address
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default model name
pub const DEFAULT_MODEL: &str = "mistral";

/// Default context window (`num_ctx`)
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;

/// System prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an intelligent code assistant. Help the user with code-related questions and tasks.";

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Human-readable label used in summaries and transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ChatMessage {
    /// Create a message with the given role
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            token_count: None,
            duration_ms: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Copy of this message with only role and content
    pub fn stripped(&self) -> Self {
        Self::new(self.role, self.content.clone())
    }
}

/// Connection and generation settings for the inference client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:11434`
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Context window size passed as `num_ctx`
    pub context_size: u32,
    /// System instructions sent with every conversational request
    pub system_prompt: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            context_size: DEFAULT_CONTEXT_SIZE,
            system_prompt: None,
        }
    }
}

impl ClientConfig {
    /// The system prompt to send, falling back to the default assistant prompt
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// Build a request for `prompt` using this configuration
    pub fn request(&self, prompt: impl Into<String>) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.into(),
            system: Some(self.system_prompt().to_string()),
            stream: true,
            temperature: Some(self.temperature),
            options: Some(GenerateOptions {
                num_ctx: Some(self.context_size),
            }),
            context: None,
        }
    }
}

/// Body of `POST /api/generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerateOptions>,
    /// Prior opaque context; omitted when empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextTokens>,
}

impl GenerateRequest {
    /// Replace the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach prior context, skipping it entirely when empty
    pub fn with_context(mut self, context: &[i64]) -> Self {
        self.context = if context.is_empty() {
            None
        } else {
            Some(context.to_vec())
        };
        self
    }

    /// Switch to a single non-streaming response
    pub fn non_streaming(mut self) -> Self {
        self.stream = false;
        self
    }
}

/// Model runtime options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

/// Complete response of a non-streaming generate call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub context: Option<ContextTokens>,
    #[serde(default)]
    pub done: bool,
}

/// Entry of `GET /api/tags`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTag {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub details: Option<ModelDetails>,
}

/// Model family and quantization details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub families: Option<Vec<String>>,
    #[serde(default)]
    pub parameter_size: String,
    #[serde(default)]
    pub quantization_level: String,
}

/// Response of `POST /api/show`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Filled in client-side; the server does not echo the name
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub details: ModelDetails,
    #[serde(default)]
    pub model_info: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub modelfile: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub template: String,
}

impl ModelInfo {
    /// Context length advertised by the model, if present
    ///
    /// The key is family-prefixed, e.g. `llama.context_length`.
    pub fn context_length(&self) -> Option<u64> {
        self.model_info.as_ref().and_then(|info| {
            info.iter()
                .find(|(k, _)| k.ends_with(".context_length"))
                .and_then(|(_, v)| v.as_u64())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_empty_context() {
        let req = ClientConfig::default().request("hi").with_context(&[]);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("context").is_none());
        assert_eq!(json["options"]["num_ctx"], 4096);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_request_carries_context() {
        let req = ClientConfig::default().request("hi").with_context(&[1, 2, 3]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["context"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_default_system_prompt() {
        let config = ClientConfig::default();
        assert_eq!(config.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        let req = config.request("x").with_system("summarize");
        assert_eq!(req.system.as_deref(), Some("summarize"));
    }

    #[test]
    fn test_chat_message_serde_shape() {
        let mut msg = ChatMessage::assistant("hello");
        msg.token_count = Some(3);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["tokenCount"], 3);
        assert!(json.get("durationMs").is_none());

        let back: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("User".parse::<Role>().unwrap(), Role::User);
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_model_info_context_length() {
        let info: ModelInfo = serde_json::from_value(serde_json::json!({
            "details": {"family": "llama"},
            "model_info": {"general.architecture": "llama", "llama.context_length": 131072}
        }))
        .unwrap();
        assert_eq!(info.context_length(), Some(131072));
    }
}

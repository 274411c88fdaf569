//! Inference provider implementations

pub mod ollama;

use crate::{ChunkStream, GenerateRequest, GenerateResponse, ModelInfo, ModelTag, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Deadline for auxiliary lookups (model list, model info, health check)
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for one-shot (non-streaming) generation
pub const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for inference endpoints
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Start a streaming generation. No deadline is imposed on the stream;
    /// callers stop it by dropping the returned stream.
    async fn stream_generate(&self, request: GenerateRequest) -> Result<ChunkStream>;

    /// Run a single non-streaming generation with a short deadline
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// List models installed on the server
    async fn list_models(&self) -> Result<Vec<ModelTag>>;

    /// Fetch metadata for one model
    async fn model_info(&self, name: &str) -> Result<ModelInfo>;

    /// Whether the server answers at all
    async fn check_connection(&self) -> bool {
        self.list_models().await.is_ok()
    }
}

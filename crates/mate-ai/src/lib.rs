//! mate-ai: client for local Ollama-compatible inference servers
//!
//! This crate provides the request/response types, the streaming chunk
//! pipeline, and the provider trait the session layer talks to.

pub mod error;
pub mod providers;
pub mod stream;
pub mod tasks;
pub mod types;

pub use error::{Error, Result};
pub use providers::{InferenceProvider, ollama::OllamaProvider};
pub use stream::{ChunkStream, GenerateChunk, ResponseAccumulator};
pub use tasks::CodeTask;
pub use types::*;

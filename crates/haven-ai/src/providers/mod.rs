//! Model provider implementations

pub mod openai;

use crate::{ChatRequest, ChatUpdateStream, Error, Result};
use async_trait::async_trait;

/// A streaming chat completion client
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start a streaming completion. The returned stream is lazy, finite and
    /// not restartable; dropping it abandons the request.
    async fn stream(&self, request: &ChatRequest) -> Result<ChatUpdateStream>;
}

/// A text embedding client
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed each input, returning one vector per input in input order
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

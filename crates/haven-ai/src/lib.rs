//! haven-ai: Streaming chat and embedding client layer
//!
//! This crate provides the provider-neutral message model, the streamed update
//! type produced by chat completions, and an OpenAI-compatible provider.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{ChatClient, EmbeddingClient};
pub use stream::{ChatUpdate, ChatUpdateStream, FinishReason};
pub use types::*;

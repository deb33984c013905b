//! haven-chat: Conversation session engine
//!
//! This crate drives a document-grounded chat: it keeps the transcript,
//! streams each turn from a model backend that can call the document tools,
//! tracks how much history must be resent, and publishes notifications as
//! partial output arrives.

pub mod backend;
pub mod citation;
pub mod conversation;
pub mod error;
pub mod events;
pub mod prompt;
pub mod session;
pub mod tool;
pub mod tools;

pub use backend::{FunctionInvokingBackend, ModelBackend, RetryConfig, TurnOptions};
pub use citation::{Citation, extract_citations, split_citations};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use prompt::SYSTEM_PROMPT;
pub use session::{ChatSession, TurnOutcome};
pub use tool::{StateNotifier, Tool, ToolRegistry, ToolResult};
pub use tools::{LoadDocumentsTool, SearchTool};

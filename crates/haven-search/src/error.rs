//! Error types for haven-search

use thiserror::Error;

/// Result type alias using haven-search Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting or searching documents
#[derive(Error, Debug)]
pub enum Error {
    /// Vector store failure
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Reading a document failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedding provider failed
    #[error("Embedding request failed: {0}")]
    Ai(#[from] haven_ai::Error),

    /// A blocking store task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The embedding provider returned unusable vectors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The documents directory could not be turned into a scan pattern
    #[error("Invalid document pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

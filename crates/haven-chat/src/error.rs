//! Error types for haven-chat

use thiserror::Error;

/// Result type alias using haven-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a chat turn
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model backend
    #[error(transparent)]
    Ai(#[from] haven_ai::Error),

    /// A generic session error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if retrying the turn may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_retryable(),
            Error::Other(_) => false,
        }
    }
}

//! Session notification types

use haven_ai::Message;
use serde::{Deserialize, Serialize};

/// Notifications published by a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A tool is about to run a potentially slow operation
    StateChanged { tool: String },

    /// A stream update was applied; carries the in-progress assistant message
    MessageStreamed { message: Message },

    /// The turn finished and its assistant message joined the transcript
    TurnCompleted { message: Message },

    /// The turn was superseded or cancelled
    TurnCancelled,

    /// The model backend failed mid-turn
    TurnFailed { error: String },
}

impl SessionEvent {
    /// Check if this event ends a turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::TurnCompleted { .. }
                | SessionEvent::TurnCancelled
                | SessionEvent::TurnFailed { .. }
        )
    }
}

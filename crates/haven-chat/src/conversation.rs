//! Conversation state: transcript, resend cursor, pending message, active turn.

use std::collections::HashSet;

use haven_ai::{ChatUpdate, Content, Message, Role};
use tokio_util::sync::CancellationToken;

use crate::backend::TurnOptions;

/// The turn currently allowed to mutate the conversation
#[derive(Debug)]
struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
    /// Transcript index of the first message appended by this turn's stream
    start: usize,
}

/// Everything a caller needs to drive a freshly started turn
#[derive(Debug)]
pub struct TurnStart {
    /// Identifies the turn; updates for any other id are ignored
    pub id: u64,
    pub cancel: CancellationToken,
    /// Transcript suffix to send to the backend
    pub messages: Vec<Message>,
    pub options: TurnOptions,
}

/// Conversation state for one chat session.
///
/// The transcript starts with the system prompt. While a turn streams, the
/// assistant reply lives in `pending` and joins the transcript when the turn
/// completes or is cancelled.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    resend_from: usize,
    conversation_id: Option<String>,
    pending: Option<Message>,
    active: Option<ActiveTurn>,
    next_turn: u64,
}

impl Conversation {
    pub fn new(system_prompt: &str) -> Self {
        let mut conversation = Self::default();
        conversation.initialize(system_prompt);
        conversation
    }

    /// Clear the transcript down to the system prompt and resend everything next turn
    pub fn initialize(&mut self, system_prompt: &str) {
        self.resend_from = 0;
        self.messages.clear();
        self.messages.push(Message::system(system_prompt));
    }

    /// Cancel any turn, forget the server-side conversation and reinitialize
    pub fn reset(&mut self, system_prompt: &str) {
        self.cancel_pending();
        self.conversation_id = None;
        self.initialize(system_prompt);
    }

    /// Finalized transcript
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Index of the first message sent on the next turn
    pub fn resend_from(&self) -> usize {
        self.resend_from
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// The assistant message being streamed, if a turn is active
    pub fn pending(&self) -> Option<&Message> {
        self.pending.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Whether `turn_id` is the turn currently streaming
    pub fn is_current(&self, turn_id: u64) -> bool {
        self.active.as_ref().is_some_and(|turn| turn.id == turn_id)
    }

    /// Append the user message and start a new turn. Any turn still active is
    /// cancelled first.
    pub fn begin_turn(&mut self, user_message: Message) -> TurnStart {
        self.cancel_pending();

        self.messages.push(user_message);
        self.pending = Some(Message::assistant_empty());

        self.next_turn += 1;
        let id = self.next_turn;
        let cancel = CancellationToken::new();
        self.active = Some(ActiveTurn {
            id,
            cancel: cancel.clone(),
            start: self.messages.len(),
        });

        TurnStart {
            id,
            cancel,
            messages: self.messages[self.resend_from..].to_vec(),
            options: TurnOptions {
                conversation_id: self.conversation_id.clone(),
            },
        }
    }

    /// Apply one stream update. Returns a snapshot of the pending message, or
    /// `None` if the update belongs to a turn that is no longer active.
    pub fn apply_update(&mut self, turn_id: u64, update: &ChatUpdate) -> Option<Message> {
        if !self.is_current(turn_id) {
            return None;
        }

        let non_text = update.non_text_contents();
        if !non_text.is_empty() {
            self.messages
                .push(Message::with_content(update.role, non_text));
        }

        let pending = self.pending.as_mut()?;
        pending.append_text(&update.text());

        // Some(id) is always taken from the backend; None never clears it
        if let Some(id) = &update.conversation_id {
            self.conversation_id = Some(id.clone());
        }

        self.pending.clone()
    }

    /// Finalize a turn whose stream ended normally. Returns the finalized
    /// assistant message, or `None` if the turn was already superseded.
    pub fn complete_turn(&mut self, turn_id: u64) -> Option<Message> {
        if !self.is_current(turn_id) {
            return None;
        }
        if let Some(turn) = self.active.take() {
            // The backend stops without running calls past its last tool round
            self.close_unanswered_tool_calls(turn.start, "Tool was not run");
        }

        let message = self.pending.take()?;
        self.messages.push(message.clone());
        self.resend_from = if self.conversation_id.is_some() {
            self.messages.len()
        } else {
            0
        };
        Some(message)
    }

    /// Resolve a turn whose backend failed. Partial output with meaningful
    /// content is finalized; empty output is dropped. The resend cursor is
    /// left alone so the next turn resends the failed exchange.
    pub fn fail_turn(&mut self, turn_id: u64) -> Option<Message> {
        if !self.is_current(turn_id) {
            return None;
        }
        if let Some(turn) = self.active.take() {
            self.close_unanswered_tool_calls(turn.start, "Interrupted before the tool finished");
        }

        let message = self.pending.take()?;
        if has_meaningful_content(&message) {
            self.messages.push(message.clone());
            Some(message)
        } else {
            None
        }
    }

    /// Finalize whatever has streamed so far, then cancel the active turn.
    /// No-op when nothing is streaming.
    pub fn cancel_pending(&mut self) -> Option<Message> {
        let turn = self.active.take();
        if let Some(turn) = &turn {
            self.close_unanswered_tool_calls(turn.start, "Cancelled");
        }

        let finalized = self.pending.take();
        if let Some(message) = &finalized {
            self.messages.push(message.clone());
        }

        if let Some(turn) = turn {
            turn.cancel.cancel();
        }
        finalized
    }

    /// Answer every tool call appended since `start` that has no result yet
    /// with an error result, so the transcript stays valid to resend.
    fn close_unanswered_tool_calls(&mut self, start: usize, reason: &str) {
        let turn_messages = &self.messages[start.min(self.messages.len())..];
        let answered: HashSet<&str> = turn_messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|c| match c {
                Content::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();

        let results: Vec<Content> = turn_messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|c| match c {
                Content::ToolCall { id, .. } if !answered.contains(id.as_str()) => {
                    Some(Content::tool_result(id.clone(), reason, true))
                }
                _ => None,
            })
            .collect();

        if !results.is_empty() {
            tracing::debug!("Closing {} unanswered tool call(s): {}", results.len(), reason);
            self.messages.push(Message::with_content(Role::Tool, results));
        }
    }
}

/// Check if a message has meaningful content worth preserving.
/// Returns true if the message contains non-whitespace text or tool calls
/// with a name.
fn has_meaningful_content(message: &Message) -> bool {
    message.content.iter().any(|c| match c {
        Content::Text { text } => !text.trim().is_empty(),
        Content::ToolCall { name, .. } => !name.is_empty(),
        Content::ToolResult { .. } => true,
    })
}

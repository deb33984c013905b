//! Streamed update types and utilities

use crate::error::Result;
use crate::types::{Content, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio_stream::Stream;

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Tool use requested
    ToolCalls,
    /// Output withheld by the provider's content filter
    ContentFilter,
}

impl FinishReason {
    /// Parse a provider finish reason string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(Self::Stop),
            "length" => Some(Self::Length),
            "tool_calls" | "function_call" => Some(Self::ToolCalls),
            "content_filter" => Some(Self::ContentFilter),
            _ => None,
        }
    }
}

/// One incremental update produced by a streaming chat call.
///
/// An update carries zero or more content parts: text deltas, completed tool
/// calls, or tool results. `conversation_id` is set when the backend keeps the
/// conversation history server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUpdate {
    pub role: Role,
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl ChatUpdate {
    /// Create an assistant update carrying a text delta
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self::with_contents(Role::Assistant, vec![Content::text(delta)])
    }

    /// Create an update with the given role and contents
    pub fn with_contents(role: Role, contents: Vec<Content>) -> Self {
        Self {
            role,
            contents,
            conversation_id: None,
            finish_reason: None,
        }
    }

    /// Attach a conversation id
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Concatenated text delta of this update
    pub fn text(&self) -> String {
        self.contents.iter().filter_map(|c| c.as_text()).collect()
    }

    /// Content parts that are not text (tool calls and tool results)
    pub fn non_text_contents(&self) -> Vec<Content> {
        self.contents
            .iter()
            .filter(|c| !c.is_text())
            .cloned()
            .collect()
    }

    /// Tool calls in this update
    pub fn tool_calls(&self) -> impl Iterator<Item = &Content> {
        self.contents.iter().filter(|c| c.is_tool_call())
    }
}

/// A stream of chat updates
pub type ChatUpdateStream = Pin<Box<dyn Stream<Item = Result<ChatUpdate>> + Send>>;

/// Accumulates tool calls whose id, name and arguments arrive in fragments
/// keyed by a per-response index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    buffers: BTreeMap<usize, ToolCallBuffer>,
}

#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: String,
    name: String,
    arguments_json: String,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fragment for the tool call at `index`
    pub fn push(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments_delta: Option<&str>,
    ) {
        let buf = self.buffers.entry(index).or_default();
        if let Some(id) = id {
            buf.id = id.to_string();
        }
        if let Some(name) = name {
            buf.name.push_str(name);
        }
        if let Some(delta) = arguments_delta {
            buf.arguments_json.push_str(delta);
        }
    }

    /// Whether any fragment has been received
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Finish accumulation, returning completed tool call contents in index order.
    /// Fragments without an id or name are dropped; unparseable arguments become `{}`.
    pub fn finish(self) -> Vec<Content> {
        self.buffers
            .into_values()
            .filter(|b| !b.id.is_empty() && !b.name.is_empty())
            .map(|b| {
                let arguments = if b.arguments_json.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&b.arguments_json).unwrap_or_else(|e| {
                        tracing::warn!("Malformed arguments for tool call '{}': {}", b.name, e);
                        serde_json::json!({})
                    })
                };
                Content::ToolCall {
                    id: b.id,
                    name: b.name,
                    arguments,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_text_and_non_text_split() {
        let update = ChatUpdate::with_contents(
            Role::Assistant,
            vec![
                Content::text("Hel"),
                Content::tool_call("c1", "search", serde_json::json!({"searchPhrase": "x"})),
                Content::text("lo"),
            ],
        );
        assert_eq!(update.text(), "Hello");
        let rest = update.non_text_contents();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].is_tool_call());
    }

    #[test]
    fn test_accumulator_joins_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("call_1"), Some("search"), Some("{\"searchPh"));
        acc.push(0, None, None, Some("rase\":\"flood\"}"));
        acc.push(1, Some("call_2"), Some("load_documents"), None);

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            Content::ToolCall { id, name, arguments } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "search");
                assert_eq!(arguments["searchPhrase"], "flood");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
        match &calls[1] {
            Content::ToolCall { arguments, .. } => assert_eq!(arguments, &serde_json::json!({})),
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_accumulator_drops_incomplete_calls() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(2, Some("call_3"), Some("search"), Some("not json"));
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_accumulator_sparse_index_keeps_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(usize::MAX, Some("call_b"), Some("search"), None);
        acc.push(0, Some("call_a"), Some("load_documents"), None);

        let ids: Vec<String> = acc
            .finish()
            .into_iter()
            .filter_map(|c| match c {
                Content::ToolCall { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, ["call_a", "call_b"]);
    }

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse("tool_calls"), Some(FinishReason::ToolCalls));
        assert_eq!(FinishReason::parse("stop"), Some(FinishReason::Stop));
        assert_eq!(FinishReason::parse("weird"), None);
    }
}

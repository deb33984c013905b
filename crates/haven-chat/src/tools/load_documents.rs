use async_trait::async_trait;
use haven_search::SearchBackend;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tool::{StateNotifier, Tool, ToolResult};

/// Ensures the search index is warm before the model searches
pub struct LoadDocumentsTool {
    search: Arc<dyn SearchBackend>,
    notifier: StateNotifier,
}

impl LoadDocumentsTool {
    pub fn new(search: Arc<dyn SearchBackend>, notifier: StateNotifier) -> Self {
        Self { search, notifier }
    }
}

#[async_trait]
impl Tool for LoadDocumentsTool {
    fn name(&self) -> &str {
        "LoadDocuments"
    }

    fn description(&self) -> &str {
        "Loads the documents needed for performing searches. Must be completed before a search can be executed, but only needs to be completed once."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: serde_json::Value, cancel: CancellationToken) -> ToolResult {
        self.notifier.notify(self.name());

        tokio::select! {
            _ = cancel.cancelled() => ToolResult::error("Cancelled"),
            result = self.search.load_documents() => match result {
                Ok(()) => ToolResult::text("Documents loaded."),
                Err(e) => ToolResult::error(format!("Failed to load documents: {}", e)),
            },
        }
    }
}

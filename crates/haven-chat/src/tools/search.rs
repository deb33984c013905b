use async_trait::async_trait;
use haven_search::{SearchBackend, SearchHit};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tool::{StateNotifier, Tool, ToolResult};

/// Number of snippets returned per search
pub const MAX_RESULTS: usize = 5;

/// Wrap a hit in the `<result filename="...">` envelope the model cites from
pub fn format_hit(hit: &SearchHit) -> String {
    format!("<result filename=\"{}\">{}</result>", hit.document_id, hit.text)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    search_phrase: String,
    #[serde(default)]
    filename_filter: Option<String>,
}

/// Phrase search over the loaded documents
pub struct SearchTool {
    search: Arc<dyn SearchBackend>,
    notifier: StateNotifier,
}

impl SearchTool {
    pub fn new(search: Arc<dyn SearchBackend>, notifier: StateNotifier) -> Self {
        Self { search, notifier }
    }

    /// Run a search and return the enveloped snippets, at most [`MAX_RESULTS`].
    /// An empty filter searches every file.
    pub async fn search(
        &self,
        phrase: &str,
        filename_filter: Option<&str>,
    ) -> haven_search::Result<Vec<String>> {
        self.notifier.notify(self.name());

        let filter = filename_filter.filter(|f| !f.trim().is_empty());
        let hits = self.search.search(phrase, filter, MAX_RESULTS).await?;
        Ok(hits.iter().take(MAX_RESULTS).map(format_hit).collect())
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "Search"
    }

    fn description(&self) -> &str {
        "Searches for information using a phrase or keyword. Relies on documents already being loaded."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "searchPhrase": {
                    "type": "string",
                    "description": "The phrase to search for."
                },
                "filenameFilter": {
                    "type": ["string", "null"],
                    "description": "If possible, specify the filename to search that file only. If not provided or empty, the search includes all files."
                }
            },
            "required": ["searchPhrase"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, cancel: CancellationToken) -> ToolResult {
        let args: SearchArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let results = tokio::select! {
            _ = cancel.cancelled() => return ToolResult::error("Cancelled"),
            results = self.search(&args.search_phrase, args.filename_filter.as_deref()) => results,
        };

        match results {
            Ok(results) => ToolResult::json(&serde_json::json!(results)),
            Err(e) => ToolResult::error(format!("Search failed: {}", e)),
        }
    }
}

//! The document tools offered to the model

mod load_documents;
mod search;

pub use load_documents::LoadDocumentsTool;
pub use search::{MAX_RESULTS, SearchTool, format_hit};

use haven_search::SearchBackend;
use std::sync::Arc;

use crate::tool::{StateNotifier, ToolRegistry};

/// Build the session's tool table: document loading and search
pub fn document_tools(search: Arc<dyn SearchBackend>, notifier: StateNotifier) -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(Arc::new(LoadDocumentsTool::new(search.clone(), notifier.clone())))
        .with_tool(Arc::new(SearchTool::new(search, notifier)))
}

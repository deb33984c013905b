//! haven-search: Document ingestion and semantic search
//!
//! Documents from a directory are chunked, embedded, and stored in a local
//! SQLite vector store. Queries are embedded the same way and ranked by
//! cosine similarity.

pub mod chunker;
pub mod error;
pub mod ingest;
pub mod search;
pub mod store;

pub use error::{Error, Result};
pub use ingest::{DataIngestor, IngestReport};
pub use search::{SearchBackend, SearchHit, SemanticSearch};
pub use store::VectorStore;

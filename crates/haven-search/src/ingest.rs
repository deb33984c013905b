//! Document ingestion: directory scan, chunking, embedding, storage

use haven_ai::EmbeddingClient;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunker::{self, DEFAULT_MAX_CHARS};
use crate::error::{Error, Result};
use crate::store::VectorStore;

/// File extensions picked up by the directory scan
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Maximum inputs per embedding request
const EMBED_BATCH_SIZE: usize = 64;

/// Summary of one ingestion pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Files left out because they are not valid UTF-8
    pub skipped: usize,
}

impl IngestReport {
    /// Number of documents present after the pass
    pub fn total_documents(&self) -> usize {
        self.added + self.updated + self.unchanged
    }
}

/// A document found on disk
#[derive(Debug, Clone)]
struct SourceDocument {
    id: String,
    path: PathBuf,
    version: String,
}

/// Keeps the vector store in sync with a directory of documents
pub struct DataIngestor {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingClient>,
    embedding_model: String,
    max_chunk_chars: usize,
}

impl DataIngestor {
    /// Create an ingestor writing to `store`
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn EmbeddingClient>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            embedding_model: embedding_model.into(),
            max_chunk_chars: DEFAULT_MAX_CHARS,
        }
    }

    /// Set the maximum chunk length in characters
    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars;
        self
    }

    /// Ingest new and changed documents under `dir` and drop documents that
    /// no longer exist on disk.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport> {
        let sources = discover_documents(dir)?;
        let store = self.store.clone();
        let existing: HashMap<String, String> =
            tokio::task::spawn_blocking(move || store.document_versions()).await??;

        let mut report = IngestReport::default();
        for doc in &sources {
            let is_update = match existing.get(&doc.id) {
                Some(version) if *version == doc.version => {
                    report.unchanged += 1;
                    continue;
                }
                Some(_) => true,
                None => false,
            };
            if !self.ingest_document(doc).await? {
                report.skipped += 1;
            } else if is_update {
                report.updated += 1;
            } else {
                report.added += 1;
            }
        }

        let present: HashSet<&str> = sources.iter().map(|d| d.id.as_str()).collect();
        let stale: Vec<String> = existing
            .keys()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            tracing::debug!("Removing deleted document {}", id);
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || store.remove_document(&id)).await??;
            report.removed += 1;
        }

        tracing::debug!(
            "Ingestion of {} finished: {} added, {} updated, {} unchanged, {} removed, {} skipped",
            dir.display(),
            report.added,
            report.updated,
            report.unchanged,
            report.removed,
            report.skipped
        );
        Ok(report)
    }

    /// Embed and store one document. Returns `false` when the file is not
    /// valid UTF-8 and was skipped.
    async fn ingest_document(&self, doc: &SourceDocument) -> Result<bool> {
        let bytes = tokio::fs::read(&doc.path).await?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Skipping {}: not valid UTF-8 ({})", doc.id, e.utf8_error());
                return Ok(false);
            }
        };
        let chunks = chunker::chunk_text(&text, self.max_chunk_chars);
        tracing::debug!("Ingesting {} ({} chunks)", doc.id, chunks.len());

        let mut embedded = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let vectors = self.embedder.embed(&self.embedding_model, batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "requested {} embeddings for {}, received {}",
                    batch.len(),
                    doc.id,
                    vectors.len()
                )));
            }
            embedded.extend(batch.iter().cloned().zip(vectors));
        }

        let store = self.store.clone();
        let id = doc.id.clone();
        let version = doc.version.clone();
        tokio::task::spawn_blocking(move || store.upsert_document(&id, &version, &embedded))
            .await??;
        Ok(true)
    }
}

/// Find supported documents under `dir`, sorted by id.
/// The id is the path relative to `dir` with `/` separators.
fn discover_documents(dir: &Path) -> Result<Vec<SourceDocument>> {
    if !dir.is_dir() {
        tracing::warn!("Documents directory {} does not exist", dir.display());
        return Ok(vec![]);
    }

    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut docs = Vec::new();

    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("Glob entry error: {}", e);
                continue;
            }
        };
        if !path.is_file() || !is_supported(&path) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = std::fs::metadata(&path)?;
        let modified: chrono::DateTime<chrono::Utc> = metadata.modified()?.into();
        let version = format!("{}:{}", modified.to_rfc3339(), metadata.len());

        docs.push(SourceDocument { id, path, version });
    }

    docs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(docs)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

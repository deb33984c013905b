//! Semantic search over the vector store

use async_trait::async_trait;
use haven_ai::EmbeddingClient;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::ingest::{DataIngestor, IngestReport};
use crate::store::VectorStore;

/// A matched chunk and the document it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub document_id: String,
    pub text: String,
    pub score: f32,
}

/// Document lookup consumed by the chat tools
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Make sure the documents are ingested and searchable
    async fn load_documents(&self) -> Result<()>;

    /// Best matches for `phrase`, highest score first, at most `max_results`.
    /// An empty result is not an error.
    async fn search(
        &self,
        phrase: &str,
        filename_filter: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Embedding-based search backed by a [`VectorStore`]
pub struct SemanticSearch {
    store: VectorStore,
    ingestor: DataIngestor,
    embedder: Arc<dyn EmbeddingClient>,
    embedding_model: String,
    documents_dir: PathBuf,
    loaded: OnceCell<IngestReport>,
}

impl SemanticSearch {
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn EmbeddingClient>,
        embedding_model: impl Into<String>,
        documents_dir: impl Into<PathBuf>,
    ) -> Self {
        let embedding_model = embedding_model.into();
        let ingestor = DataIngestor::new(store.clone(), embedder.clone(), embedding_model.clone());
        Self {
            store,
            ingestor,
            embedder,
            embedding_model,
            documents_dir: documents_dir.into(),
            loaded: OnceCell::new(),
        }
    }

    /// Report of the ingestion pass, once documents have been loaded
    pub fn ingest_report(&self) -> Option<&IngestReport> {
        self.loaded.get()
    }

    async fn embed_query(&self, phrase: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(&self.embedding_model, &[phrase.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned for query".to_string()))
    }
}

#[async_trait]
impl SearchBackend for SemanticSearch {
    async fn load_documents(&self) -> Result<()> {
        // A failed pass leaves the cell empty so the next call retries
        self.loaded
            .get_or_try_init(|| async {
                tracing::debug!("Loading documents from {}", self.documents_dir.display());
                self.ingestor.ingest_directory(&self.documents_dir).await
            })
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        phrase: &str,
        filename_filter: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<SearchHit>> {
        let store = self.store.clone();
        let filter = filename_filter.map(str::to_string);
        let chunks = tokio::task::spawn_blocking(move || store.chunks(filter.as_deref())).await??;
        if chunks.is_empty() || max_results == 0 {
            return Ok(vec![]);
        }

        let query = self.embed_query(phrase).await?;

        let mut hits: Vec<SearchHit> = chunks
            .into_iter()
            .map(|chunk| SearchHit {
                score: cosine_similarity(&chunk.embedding, &query),
                document_id: chunk.document_id,
                text: chunk.text,
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(max_results);

        tracing::debug!("Search for {:?} returned {} hits", phrase, hits.len());
        Ok(hits)
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, KeywordEmbedder};

    fn write_docs(dir: &std::path::Path) {
        std::fs::write(
            dir.join("guide.md"),
            "The flood shelter is at the community hall.\n\nBring water and blankets.",
        )
        .unwrap();
        std::fs::write(dir.join("fire.md"), "Fire exits are marked in green.").unwrap();
    }

    fn search_over(dir: &std::path::Path) -> SemanticSearch {
        SemanticSearch::new(
            VectorStore::open_in_memory().unwrap(),
            Arc::new(KeywordEmbedder),
            "test-embedding",
            dir,
        )
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((sim - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_ranks_matching_chunk_first() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        let search = search_over(dir.path());

        search.load_documents().await.unwrap();
        let hits = search.search("flood shelter", None, 5).await.unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].document_id, "guide.md");
        assert!(hits[0].text.contains("flood shelter"));
    }

    #[tokio::test]
    async fn test_load_succeeds_despite_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        std::fs::write(dir.path().join("legacy.txt"), [0xff, 0xfe, 0x41]).unwrap();
        let search = search_over(dir.path());

        search.load_documents().await.unwrap();

        let report = search.ingest_report().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total_documents(), 2);
        let hits = search.search("flood shelter", None, 5).await.unwrap();
        assert_eq!(hits[0].document_id, "guide.md");
    }

    #[tokio::test]
    async fn test_search_respects_filename_filter_and_cap() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        let search = search_over(dir.path());
        search.load_documents().await.unwrap();

        let hits = search.search("exits", Some("fire.md"), 5).await.unwrap();
        assert!(hits.iter().all(|h| h.document_id == "fire.md"));

        let capped = search.search("water", None, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_search_unknown_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        let search = search_over(dir.path());
        search.load_documents().await.unwrap();

        let hits = search
            .search("flood shelter", Some("guide.pdf"), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_load_documents_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        let search = search_over(dir.path());

        search.load_documents().await.unwrap();
        std::fs::write(dir.path().join("late.md"), "Added after loading.").unwrap();
        search.load_documents().await.unwrap();

        assert_eq!(search.ingest_report().unwrap().added, 2);
        assert!(search.search("loading", Some("late.md"), 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        write_docs(dir.path());
        let search = SemanticSearch::new(
            VectorStore::open_in_memory().unwrap(),
            Arc::new(FailingEmbedder),
            "test-embedding",
            dir.path(),
        );

        assert!(search.load_documents().await.is_err());
        assert!(search.ingest_report().is_none());
    }
}

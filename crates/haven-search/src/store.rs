//! SQLite-backed vector store

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    version TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
"#;

/// A stored chunk with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub document_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Thread-safe vector store handle
#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl VectorStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Stored version of a document, if it has been ingested
    pub fn document_version(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let version = conn
            .query_row(
                "SELECT version FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    /// All ingested documents and their versions
    pub fn document_versions(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, version FROM documents")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (id, version) = row?;
            out.insert(id, version);
        }
        Ok(out)
    }

    /// Insert or replace a document and all of its chunks atomically
    pub fn upsert_document(
        &self,
        id: &str,
        version: &str,
        chunks: &[(String, Vec<f32>)],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id])?;
        tx.execute(
            "INSERT INTO documents (id, version) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET version = excluded.version",
            params![id, version],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (document_id, ordinal, text, embedding) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (ordinal, (text, embedding)) in chunks.iter().enumerate() {
                stmt.execute(params![id, ordinal as i64, text, encode_embedding(embedding)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove a document and its chunks
    pub fn remove_document(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Load chunks, optionally restricted to one document, in document/ordinal order
    pub fn chunks(&self, document_id: Option<&str>) -> Result<Vec<StoredChunk>> {
        let conn = self.conn.lock();
        let chunks = match document_id {
            Some(id) => {
                let mut stmt = conn.prepare(
                    "SELECT document_id, text, embedding FROM chunks
                     WHERE document_id = ?1 ORDER BY ordinal",
                )?;
                let rows = stmt
                    .query_map(params![id], chunk_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT document_id, text, embedding FROM chunks
                     ORDER BY document_id, ordinal",
                )?;
                let rows = stmt
                    .query_map([], chunk_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(chunks)
    }

    /// Total number of stored chunks
    pub fn chunk_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredChunk> {
    let blob: Vec<u8> = row.get(2)?;
    Ok(StoredChunk {
        document_id: row.get(0)?,
        text: row.get(1)?,
        embedding: decode_embedding(&blob),
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

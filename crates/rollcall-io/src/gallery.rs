//! SQLite persistence for the enrolled gallery.
//!
//! Saving replaces the whole table in one transaction: an enrollment pass
//! always produces a complete store, never a patch to the previous one.

use rollcall_core::{Embedding, EmbeddingStore};
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS embeddings (
    identity   TEXT    NOT NULL,
    position   INTEGER NOT NULL,
    dim        INTEGER NOT NULL,
    vector     BLOB    NOT NULL,
    created_at TEXT    NOT NULL,
    PRIMARY KEY (identity, position)
);
";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt embedding for {identity}: {reason}")]
    Corrupt { identity: String, reason: String },
}

/// Handle to the gallery database.
pub struct Gallery {
    conn: Connection,
}

impl Gallery {
    /// Open (creating if needed) the gallery at `path`.
    pub fn open(path: &Path) -> Result<Self, GalleryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, GalleryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Replace the stored gallery with `store`. Returns the number of vectors written.
    pub fn save(&mut self, store: &EmbeddingStore) -> Result<usize, GalleryError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            tx.execute("DELETE FROM embeddings", [])?;
            let mut insert = tx.prepare(
                "INSERT INTO embeddings (identity, position, dim, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (identity, references) in store.iter() {
                for (position, embedding) in references.iter().enumerate() {
                    insert.execute(params![
                        identity,
                        position as i64,
                        embedding.dimension() as i64,
                        encode(embedding.values()),
                        created_at,
                    ])?;
                    written += 1;
                }
            }
        }
        tx.commit()?;

        tracing::info!(identities = store.len(), vectors = written, "gallery saved");
        Ok(written)
    }

    /// Rebuild an [`EmbeddingStore`] from the stored vectors.
    pub fn load(&self) -> Result<EmbeddingStore, GalleryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity, dim, vector FROM embeddings ORDER BY identity, position")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut store = EmbeddingStore::new();
        for row in rows {
            let (identity, dim, blob) = row?;
            let values = decode(&blob, dim).map_err(|reason| GalleryError::Corrupt {
                identity: identity.clone(),
                reason,
            })?;
            let embedding = Embedding::new(values).map_err(|e| GalleryError::Corrupt {
                identity: identity.clone(),
                reason: e.to_string(),
            })?;
            store
                .enroll_embedding(&identity, embedding)
                .map_err(|e| GalleryError::Corrupt {
                    identity: identity.clone(),
                    reason: e.to_string(),
                })?;
        }

        tracing::debug!(
            identities = store.len(),
            vectors = store.total_references(),
            "gallery loaded"
        );
        Ok(store)
    }

    /// Enrolled identities with their reference counts, sorted by key.
    pub fn identities(&self) -> Result<Vec<(String, usize)>, GalleryError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, COUNT(*) FROM embeddings GROUP BY identity ORDER BY identity",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode(blob: &[u8], dim: i64) -> Result<Vec<f32>, String> {
    if dim <= 0 || blob.len() != dim as usize * 4 {
        return Err(format!("expected {dim} f32 values, found {} bytes", blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

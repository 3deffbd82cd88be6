//! SQLite-backed [`Store`] implementation.
//!
//! Persists documents, chunks (with their embedding BLOBs) and the feedback
//! log so that an engine restarted on the same database rebuilds its
//! snapshot and bias table without re-embedding anything.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::sync::Arc;

use hybrid_search_core::embedding::{blob_to_vec, vec_to_blob};
use hybrid_search_core::error::{EngineError, Result};
use hybrid_search_core::models::{Chunk, ChunkId, Document, FeedbackLabel, FeedbackRecord};
use hybrid_search_core::snapshot::DocEntry;
use hybrid_search_core::store::Store;

use crate::config::Config;
use crate::{db, migrate};

const BACKEND: &str = "sqlite";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database, creating the schema if needed.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::store(BACKEND, e.to_string())
}

fn millis_to_ts(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| EngineError::store(BACKEND, format!("invalid timestamp {ms}")))
}

fn check_slots(doc_id: &str, chunks: &[Chunk], vectors: &[Option<Arc<[f32]>>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(EngineError::store(
            BACKEND,
            format!(
                "{doc_id}: {} chunks but {} vector slots",
                chunks.len(),
                vectors.len()
            ),
        ));
    }
    Ok(())
}

/// Replace the chunk rows of `doc_id` inside `tx`.
async fn write_chunks(
    tx: &mut Transaction<'_, Sqlite>,
    doc_id: &str,
    chunks: &[Chunk],
    vectors: &[Option<Arc<[f32]>>],
) -> Result<()> {
    sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            "INSERT INTO chunks (doc_id, chunk_index, text, token_count, hash, vector) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(doc_id)
        .bind(chunk.chunk_index as i64)
        .bind(&chunk.text)
        .bind(chunk.token_count as i64)
        .bind(&chunk.hash)
        .bind(vector.as_deref().map(vec_to_blob))
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn put_document(&self, entry: &DocEntry) -> Result<()> {
        let doc = &entry.document;
        check_slots(&doc.id, &entry.chunks, &entry.vectors)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_path, content_hash, ingested_at, deleted_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_path = excluded.source_path,
                content_hash = excluded.content_hash,
                ingested_at = excluded.ingested_at,
                deleted_at = excluded.deleted_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_path)
        .bind(&doc.content_hash)
        .bind(doc.ingested_at.timestamp_millis())
        .bind(doc.deleted_at.map(|t| t.timestamp_millis()))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        write_chunks(&mut tx, &doc.id, &entry.chunks, &entry.vectors).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: &[Option<Arc<[f32]>>],
    ) -> Result<()> {
        check_slots(doc_id, chunks, vectors)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        write_chunks(&mut tx, doc_id, chunks, vectors).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn tombstone_document(&self, doc_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("UPDATE documents SET deleted_at = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(doc_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn append_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO feedback (id, query_fingerprint, query_text, doc_id, label, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.query_fingerprint)
        .bind(&record.query_text)
        .bind(&record.doc_id)
        .bind(record.label.as_str())
        .bind(record.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_documents(&self) -> Result<Vec<DocEntry>> {
        let doc_rows = sqlx::query(
            "SELECT id, source_path, content_hash, ingested_at, deleted_at FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut entries = Vec::with_capacity(doc_rows.len());
        let mut positions = std::collections::HashMap::with_capacity(doc_rows.len());
        for row in &doc_rows {
            let id: String = row.get("id");
            let deleted_at: Option<i64> = row.get("deleted_at");
            positions.insert(id.clone(), entries.len());
            entries.push(DocEntry {
                document: Document {
                    id,
                    source_path: row.get("source_path"),
                    content_hash: row.get("content_hash"),
                    ingested_at: millis_to_ts(row.get("ingested_at"))?,
                    deleted_at: deleted_at.map(millis_to_ts).transpose()?,
                },
                chunks: Vec::new(),
                vectors: Vec::new(),
            });
        }

        let chunk_rows = sqlx::query(
            "SELECT doc_id, chunk_index, text, token_count, hash, vector FROM chunks \
             ORDER BY doc_id, chunk_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        for row in &chunk_rows {
            let doc_id: String = row.get("doc_id");
            let Some(&pos) = positions.get(&doc_id) else {
                return Err(EngineError::store(
                    BACKEND,
                    format!("chunk row for unknown document {doc_id}"),
                ));
            };
            let entry = &mut entries[pos];
            if !entry.document.is_live() {
                continue;
            }

            let chunk_index: i64 = row.get("chunk_index");
            let token_count: i64 = row.get("token_count");
            let vector: Option<Vec<u8>> = row.get("vector");
            let index = chunk_index as u32;

            entry.chunks.push(Chunk {
                id: ChunkId::new(doc_id.clone(), index),
                doc_id,
                chunk_index: index,
                text: row.get("text"),
                token_count: token_count as usize,
                hash: row.get("hash"),
            });
            entry
                .vectors
                .push(vector.map(|blob| Arc::from(blob_to_vec(&blob))));
        }

        Ok(entries)
    }

    async fn load_feedback(&self) -> Result<Vec<FeedbackRecord>> {
        let rows = sqlx::query(
            "SELECT id, query_fingerprint, query_text, doc_id, label, timestamp FROM feedback \
             ORDER BY timestamp, rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let label: String = row.get("label");
                Ok(FeedbackRecord {
                    id: row.get("id"),
                    query_fingerprint: row.get("query_fingerprint"),
                    query_text: row.get("query_text"),
                    doc_id: row.get("doc_id"),
                    label: label.parse::<FeedbackLabel>()?,
                    timestamp: millis_to_ts(row.get("timestamp"))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_search_core::text::sha256_hex;

    async fn open_temp(dir: &tempfile::TempDir) -> SqliteStore {
        let toml_src = format!(
            "[db]\npath = \"{}\"\n",
            dir.path().join("data").join("hsx.sqlite").display()
        );
        let config: Config = toml::from_str(&toml_src).unwrap();
        SqliteStore::open(&config).await.unwrap()
    }

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_path: format!("docs/{id}.md"),
            content_hash: sha256_hex(text.as_bytes()),
            ingested_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            deleted_at: None,
        }
    }

    fn chunk(doc_id: &str, index: u32, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::new(doc_id, index),
            doc_id: doc_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
            hash: sha256_hex(text.as_bytes()),
        }
    }

    fn entry(id: &str, text: &str, chunks: Vec<Chunk>, vectors: Vec<Option<Arc<[f32]>>>) -> DocEntry {
        DocEntry {
            document: doc(id, text),
            chunks,
            vectors,
        }
    }

    #[tokio::test]
    async fn test_documents_and_vectors_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;

        store
            .put_document(&entry(
                "a",
                "alpha beta",
                vec![chunk("a", 0, "alpha"), chunk("a", 1, "beta")],
                vec![Some(Arc::from(vec![0.5f32, -1.0])), None],
            ))
            .await
            .unwrap();

        let entries = store.load_documents().await.unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.document.ingested_at.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(entry.chunks.len(), 2);
        assert_eq!(entry.chunks[1].id, ChunkId::new("a", 1));
        assert_eq!(entry.vectors[0].as_deref(), Some(&[0.5f32, -1.0][..]));
        assert!(entry.vectors[1].is_none());
        assert_eq!(entry.sparse_only_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_chunks_drops_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;

        store
            .put_document(&entry(
                "a",
                "v1",
                vec![chunk("a", 0, "one"), chunk("a", 1, "two"), chunk("a", 2, "three")],
                vec![None, None, None],
            ))
            .await
            .unwrap();
        store
            .replace_chunks("a", &[chunk("a", 0, "only")], &[Some(Arc::from(vec![1.0f32]))])
            .await
            .unwrap();

        let entries = store.load_documents().await.unwrap();
        assert_eq!(entries[0].chunks.len(), 1);
        assert_eq!(entries[0].chunks[0].text, "only");
        assert_eq!(entries[0].sparse_only_count(), 0);

        let err = store
            .replace_chunks("a", &[chunk("a", 0, "x")], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store");
    }

    #[tokio::test]
    async fn test_failed_put_rolls_back_row_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;

        store
            .put_document(&entry("a", "v1", vec![chunk("a", 0, "one")], vec![None]))
            .await
            .unwrap();

        // duplicate chunk_index violates the primary key after the row update ran
        let err = store
            .put_document(&entry(
                "a",
                "v2",
                vec![chunk("a", 0, "two"), chunk("a", 0, "dup")],
                vec![None, None],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store");

        let entries = store.load_documents().await.unwrap();
        assert_eq!(entries[0].document.content_hash, sha256_hex(b"v1"));
        assert_eq!(entries[0].chunks.len(), 1);
        assert_eq!(entries[0].chunks[0].text, "one");
    }

    #[tokio::test]
    async fn test_tombstone_keeps_row_and_reingest_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;

        store
            .put_document(&entry("a", "text", vec![chunk("a", 0, "text")], vec![None]))
            .await
            .unwrap();
        store.tombstone_document("a", Utc::now()).await.unwrap();

        let entries = store.load_documents().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].document.is_live());
        assert!(entries[0].chunks.is_empty());

        store
            .put_document(&entry("a", "text", vec![chunk("a", 0, "text")], vec![None]))
            .await
            .unwrap();
        let entries = store.load_documents().await.unwrap();
        assert!(entries[0].document.is_live());
        assert_eq!(entries[0].chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_ordered_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir).await;

        let record = |id: &str, ms: i64, label: FeedbackLabel| FeedbackRecord {
            id: id.to_string(),
            query_fingerprint: "00ff00ff00ff00ff".to_string(),
            query_text: "how to configure".to_string(),
            doc_id: "a".to_string(),
            label,
            timestamp: DateTime::from_timestamp_millis(ms).unwrap(),
        };

        store
            .append_feedback(&record("late", 2_000, FeedbackLabel::Negative))
            .await
            .unwrap();
        store
            .append_feedback(&record("early", 1_000, FeedbackLabel::Positive))
            .await
            .unwrap();

        let records = store.load_feedback().await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(records[0].label, FeedbackLabel::Positive);
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_temp(&dir).await;
            store
                .put_document(&entry("a", "text", vec![chunk("a", 0, "text")], vec![None]))
                .await
                .unwrap();
            store.close().await;
        }
        let store = open_temp(&dir).await;
        assert_eq!(store.load_documents().await.unwrap().len(), 1);
    }
}

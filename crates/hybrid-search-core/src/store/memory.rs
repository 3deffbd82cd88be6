//! In-memory [`Store`] implementation for tests and ephemeral engines.
//!
//! Uses `HashMap` and `Vec` behind `parking_lot` locks. Nothing survives the
//! process, but a second engine opened on the same `Arc<InMemoryStore>`
//! restores exactly like one opened on a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::error::{EngineError, Result};
use crate::models::{Chunk, FeedbackRecord};
use crate::snapshot::DocEntry;

use super::Store;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, DocEntry>>,
    feedback: Mutex<Vec<FeedbackRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::store("memory", "writes disabled"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn put_document(&self, entry: &DocEntry) -> Result<()> {
        self.check_writable()?;
        if entry.chunks.len() != entry.vectors.len() {
            return Err(EngineError::store(
                "memory",
                format!("{}: chunk and vector counts differ", entry.document.id),
            ));
        }
        self.docs
            .write()
            .insert(entry.document.id.clone(), entry.clone());
        Ok(())
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: &[Option<Arc<[f32]>>],
    ) -> Result<()> {
        self.check_writable()?;
        let mut docs = self.docs.write();
        let entry = docs
            .get_mut(doc_id)
            .ok_or_else(|| EngineError::store("memory", format!("unknown document {doc_id}")))?;
        entry.chunks = chunks.to_vec();
        entry.vectors = vectors.to_vec();
        Ok(())
    }

    async fn tombstone_document(&self, doc_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        if let Some(entry) = self.docs.write().get_mut(doc_id) {
            entry.document.deleted_at = Some(at);
            entry.chunks.clear();
            entry.vectors.clear();
        }
        Ok(())
    }

    async fn append_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        self.check_writable()?;
        self.feedback.lock().push(record.clone());
        Ok(())
    }

    async fn load_documents(&self) -> Result<Vec<DocEntry>> {
        let mut docs: Vec<DocEntry> = self.docs.read().values().cloned().collect();
        docs.sort_by(|a, b| a.document.id.cmp(&b.document.id));
        Ok(docs)
    }

    async fn load_feedback(&self) -> Result<Vec<FeedbackRecord>> {
        let mut records = self.feedback.lock().clone();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkId, Document, FeedbackLabel};

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            source_path: format!("{id}.md"),
            content_hash: "h".into(),
            ingested_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn chunk(doc_id: &str, index: u32) -> Chunk {
        Chunk {
            id: ChunkId::new(doc_id, index),
            doc_id: doc_id.to_string(),
            chunk_index: index,
            text: "text".into(),
            token_count: 1,
            hash: "c".into(),
        }
    }

    fn entry(doc_id: &str, chunks: u32) -> DocEntry {
        DocEntry {
            document: doc(doc_id),
            chunks: (0..chunks).map(|i| chunk(doc_id, i)).collect(),
            vectors: vec![None; chunks as usize],
        }
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let store = InMemoryStore::new();
        store.put_document(&entry("a", 1)).await.unwrap();
        store
            .replace_chunks("a", &[chunk("a", 0)], &[Some(Arc::from(&[1.0f32][..]))])
            .await
            .unwrap();

        let loaded = store.load_documents().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].chunks.len(), 1);
        assert!(loaded[0].vectors[0].is_some());

        store.tombstone_document("a", Utc::now()).await.unwrap();
        let loaded = store.load_documents().await.unwrap();
        assert!(!loaded[0].document.is_live());
        assert!(loaded[0].chunks.is_empty());

        // re-ingest clears the tombstone
        store.put_document(&entry("a", 2)).await.unwrap();
        let loaded = store.load_documents().await.unwrap();
        assert!(loaded[0].document.is_live());
        assert_eq!(loaded[0].chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_put_document_rejects_ragged_entry() {
        let store = InMemoryStore::new();
        let mut bad = entry("a", 2);
        bad.vectors.pop();
        assert_eq!(store.put_document(&bad).await.unwrap_err().kind(), "store");
        assert!(store.load_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_chunks_unknown_document() {
        let store = InMemoryStore::new();
        let err = store.replace_chunks("nope", &[], &[]).await.unwrap_err();
        assert_eq!(err.kind(), "store");
    }

    #[tokio::test]
    async fn test_feedback_sorted_by_timestamp() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for (i, offset) in [5i64, 1, 3].iter().enumerate() {
            store
                .append_feedback(&FeedbackRecord {
                    id: i.to_string(),
                    query_fingerprint: "fp".into(),
                    query_text: "q".into(),
                    doc_id: "a".into(),
                    label: FeedbackLabel::Positive,
                    timestamp: now + chrono::Duration::seconds(*offset),
                })
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .load_feedback()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "0"]);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.put_document(&entry("a", 1)).await.is_err());
        assert!(store.load_documents().await.unwrap().is_empty());
        store.set_fail_writes(false);
        assert!(store.put_document(&entry("a", 1)).await.is_ok());
    }
}

//! Document ingestion: dedup by hash, chunk, embed, publish.
//!
//! The [`DocumentIndexer`] is the only writer of index state. Each write
//! follows the same sequence:
//!
//! 1. Compare the content hash against the published snapshot and return
//!    early if nothing changed.
//! 2. Chunk and embed with no lock held. Chunks whose embedding fails are
//!    kept as sparse-only.
//! 3. Take the writer lock, re-check the hash, clone the current snapshot
//!    into the next version and apply the change.
//! 4. Validate the new snapshot, persist the change through the [`Store`]
//!    and publish.
//!
//! The writer lock serializes writers only; queries keep reading whatever
//! snapshot is published and never wait on it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chunk::{chunk_text, ChunkingParams};
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::models::{Document, IngestResult};
use crate::snapshot::{DocEntry, IndexSnapshot, SnapshotCell};
use crate::store::Store;
use crate::text::sha256_hex;

pub struct DocumentIndexer {
    cell: Arc<SnapshotCell>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
    params: ChunkingParams,
    write_lock: Mutex<()>,
}

impl DocumentIndexer {
    pub fn new(
        cell: Arc<SnapshotCell>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn Store>,
        params: ChunkingParams,
    ) -> Self {
        Self {
            cell,
            embedder,
            store,
            params,
            write_lock: Mutex::new(()),
        }
    }

    /// Index `raw_text` as document `doc_id`.
    ///
    /// Returns `skipped = true` without touching the index when the
    /// document is live with identical content, or when the text holds no
    /// tokens.
    pub async fn ingest(&self, doc_id: &str, source_path: &str, raw_text: &str) -> Result<IngestResult> {
        if doc_id.trim().is_empty() {
            return Err(EngineError::Validation("doc_id must not be empty".into()));
        }

        let content_hash = sha256_hex(raw_text.as_bytes());
        let current = self.cell.load();
        if is_unchanged(&current, doc_id, &content_hash) {
            debug!(doc_id, "content unchanged, skipping");
            return Ok(skipped(doc_id, current.version()));
        }

        let chunks = chunk_text(doc_id, raw_text, &self.params);
        if chunks.is_empty() {
            debug!(doc_id, "no tokens, skipping");
            return Ok(skipped(doc_id, current.version()));
        }
        drop(current);

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_all(doc_id, &texts).await;
        let sparse_only = vectors.iter().filter(|v| v.is_none()).count();
        if sparse_only > 0 {
            warn!(
                doc_id,
                sparse_only,
                total = chunks.len(),
                "embedding failed; chunks indexed sparse-only"
            );
        }

        let _guard = self.write_lock.lock().await;
        let base = self.cell.load();
        if is_unchanged(&base, doc_id, &content_hash) {
            debug!(doc_id, "content indexed by a concurrent ingest, skipping");
            return Ok(skipped(doc_id, base.version()));
        }

        let chunks_added = chunks.len();
        let mut next = base.next();
        next.put_document(DocEntry {
            document: Document {
                id: doc_id.to_string(),
                source_path: source_path.to_string(),
                content_hash,
                ingested_at: Utc::now(),
                deleted_at: None,
            },
            chunks,
            vectors,
        })
        .map_err(|e| corrupt(doc_id, e))?;
        next.validate(Some(doc_id)).map_err(|e| corrupt(doc_id, e))?;

        if let Some(entry) = next.document(doc_id) {
            self.store.put_document(entry).await?;
        }

        let published = self.cell.publish(next);
        info!(
            doc_id,
            chunks = chunks_added,
            sparse_only,
            version = published.version(),
            "published snapshot"
        );

        Ok(IngestResult {
            doc_id: doc_id.to_string(),
            chunks_added,
            skipped: false,
            sparse_only,
            version: published.version(),
        })
    }

    /// Tombstone a document. Its chunks leave both indexes in the next
    /// snapshot; feedback and bias for the document are untouched.
    ///
    /// Returns `false` when the document is unknown or already purged.
    pub async fn purge(&self, doc_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let base = self.cell.load();
        let mut next = base.next();
        let at = Utc::now();
        if !next.tombstone(doc_id, at) {
            debug!(doc_id, "nothing to purge");
            return Ok(false);
        }
        next.validate(Some(doc_id)).map_err(|e| corrupt(doc_id, e))?;

        self.store.tombstone_document(doc_id, at).await?;
        let published = self.cell.publish(next);
        info!(doc_id, version = published.version(), "purged document");
        Ok(true)
    }

    /// Rebuild the index from the store without re-embedding.
    ///
    /// Everything loaded lands in a single new snapshot.
    pub async fn restore(&self) -> Result<usize> {
        let entries = self.store.load_documents().await?;
        let _guard = self.write_lock.lock().await;
        let mut next = self.cell.load().next();
        let count = entries.len();
        for entry in entries {
            let doc_id = entry.document.id.clone();
            next.put_document(entry).map_err(|e| corrupt(&doc_id, e))?;
        }
        next.validate(None).map_err(|e| corrupt("<restore>", e))?;

        let published = self.cell.publish(next);
        info!(
            documents = count,
            chunks = published.chunk_count(),
            version = published.version(),
            "restored index from {}",
            self.store.backend()
        );
        Ok(count)
    }

    /// Retry embedding for every sparse-only chunk.
    ///
    /// Documents re-ingested while the embeddings were computed are left
    /// alone. Returns the number of chunks that gained a vector.
    pub async fn backfill_embeddings(&self) -> Result<usize> {
        let current = self.cell.load();
        let pending: Vec<Arc<DocEntry>> = current
            .documents()
            .filter(|e| e.sparse_only_count() > 0)
            .cloned()
            .collect();
        drop(current);
        if pending.is_empty() {
            return Ok(0);
        }

        let mut filled: HashMap<String, (String, Vec<Option<Arc<[f32]>>>)> = HashMap::new();
        for entry in &pending {
            let doc_id = &entry.document.id;
            let missing: Vec<usize> = (0..entry.chunks.len())
                .filter(|&i| entry.vectors[i].is_none())
                .collect();
            let texts: Vec<String> = missing.iter().map(|&i| entry.chunks[i].text.clone()).collect();
            let embedded = self.embed_all(doc_id, &texts).await;

            let mut vectors = entry.vectors.clone();
            for (slot, v) in missing.into_iter().zip(embedded) {
                vectors[slot] = v;
            }
            filled.insert(doc_id.clone(), (entry.document.content_hash.clone(), vectors));
        }

        let _guard = self.write_lock.lock().await;
        let base = self.cell.load();
        let mut next = base.next();
        let mut gained = 0usize;
        let mut changed: Vec<String> = Vec::new();

        for (doc_id, (hash, vectors)) in filled {
            let Some(entry) = base.document(&doc_id) else {
                continue;
            };
            if entry.document.content_hash != hash || !entry.document.is_live() {
                continue;
            }
            let before = entry.sparse_only_count();
            let updated = DocEntry {
                document: entry.document.clone(),
                chunks: entry.chunks.clone(),
                vectors,
            };
            let after = updated.sparse_only_count();
            if after == before {
                continue;
            }
            next.put_document(updated).map_err(|e| corrupt(&doc_id, e))?;
            gained += before - after;
            changed.push(doc_id);
        }

        if changed.is_empty() {
            return Ok(0);
        }
        next.validate(None).map_err(|e| corrupt("<backfill>", e))?;
        for doc_id in &changed {
            if let Some(entry) = next.document(doc_id) {
                self.store
                    .replace_chunks(doc_id, &entry.chunks, &entry.vectors)
                    .await?;
            }
        }

        let published = self.cell.publish(next);
        info!(
            documents = changed.len(),
            chunks = gained,
            version = published.version(),
            "backfilled embeddings"
        );
        Ok(gained)
    }

    /// Embed `texts`, mapping each failure to `None`.
    async fn embed_all(&self, doc_id: &str, texts: &[String]) -> Vec<Option<Arc<[f32]>>> {
        let results = self.embedder.embed_batch(texts).await;
        let mut out = Vec::with_capacity(texts.len());
        for (i, r) in results.into_iter().enumerate() {
            match r {
                Ok(v) if !v.is_empty() => out.push(Some(Arc::from(v))),
                Ok(_) => {
                    debug!(doc_id, chunk = i, "provider returned an empty vector");
                    out.push(None);
                }
                Err(e) => {
                    debug!(doc_id, chunk = i, error = %e, "chunk embedding failed");
                    out.push(None);
                }
            }
        }
        // a provider that returns fewer results than inputs leaves the rest sparse-only
        out.resize(texts.len(), None);
        out
    }

}

fn is_unchanged(snapshot: &IndexSnapshot, doc_id: &str, content_hash: &str) -> bool {
    snapshot
        .document(doc_id)
        .is_some_and(|e| e.document.is_live() && e.document.content_hash == content_hash)
}

fn skipped(doc_id: &str, version: u64) -> IngestResult {
    IngestResult {
        doc_id: doc_id.to_string(),
        chunks_added: 0,
        skipped: true,
        sparse_only: 0,
        version,
    }
}

fn corrupt(doc_id: &str, e: EngineError) -> EngineError {
    error!(doc_id, error = %e, "refusing to publish inconsistent snapshot");
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledProvider, HashEmbedder};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn indexer(embedder: Arc<dyn EmbeddingProvider>) -> (DocumentIndexer, Arc<SnapshotCell>, Arc<InMemoryStore>) {
        let cell = Arc::new(SnapshotCell::default());
        let store = Arc::new(InMemoryStore::new());
        let idx = DocumentIndexer::new(cell.clone(), embedder, store.clone(), ChunkingParams::default());
        (idx, cell, store)
    }

    /// Fails every other call.
    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Err(EngineError::Embedding {
                    provider: "flaky".into(),
                    message: "boom".into(),
                });
            }
            Ok(vec![1.0, 0.0])
        }
    }

    /// Returns a vector whose length depends on the text.
    struct Ragged;

    #[async_trait]
    impl EmbeddingProvider for Ragged {
        fn model_name(&self) -> &str {
            "ragged"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; text.split_whitespace().count()])
        }
    }

    #[tokio::test]
    async fn test_ingest_then_skip_identical() {
        let (idx, cell, _) = indexer(Arc::new(HashEmbedder::new(16)));
        let first = idx.ingest("a", "a.md", "vector search uses embeddings").await.unwrap();
        assert!(!first.skipped);
        assert_eq!(first.chunks_added, 1);
        assert_eq!(first.version, 1);

        let second = idx.ingest("a", "a.md", "vector search uses embeddings").await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.chunks_added, 0);
        assert_eq!(cell.load().version(), 1);
        assert_eq!(cell.load().chunk_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_skipped() {
        let (idx, cell, _) = indexer(Arc::new(HashEmbedder::new(16)));
        let r = idx.ingest("a", "a.md", "   \n ").await.unwrap();
        assert!(r.skipped);
        assert_eq!(r.chunks_added, 0);
        assert_eq!(cell.load().version(), 0);
        assert!(idx.ingest("", "a.md", "text").await.is_err());
    }

    #[tokio::test]
    async fn test_changed_content_replaces_chunks() {
        let (idx, cell, store) = indexer(Arc::new(HashEmbedder::new(16)));
        idx.ingest("a", "a.md", "one two three").await.unwrap();
        let r = idx.ingest("a", "a.md", "four five").await.unwrap();
        assert!(!r.skipped);
        let snap = cell.load();
        assert_eq!(snap.chunk_count(), 1);
        assert_eq!(snap.chunk(&crate::models::ChunkId::new("a", 0)).unwrap().text, "four five");
        assert_eq!(store.load_documents().await.unwrap()[0].chunks[0].text, "four five");
    }

    #[tokio::test]
    async fn test_embedding_failure_is_sparse_only() {
        let (idx, cell, _) = indexer(Arc::new(DisabledProvider));
        let r = idx.ingest("a", "a.md", "bm25 still works").await.unwrap();
        assert!(!r.skipped);
        assert_eq!(r.sparse_only, 1);
        let snap = cell.load();
        assert_eq!(snap.chunk_count(), 1);
        assert_eq!(snap.dense().vector_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_embedding_failure() {
        let cell = Arc::new(SnapshotCell::default());
        let idx = DocumentIndexer::new(
            cell.clone(),
            Arc::new(Flaky { calls: AtomicUsize::new(0) }),
            Arc::new(InMemoryStore::new()),
            ChunkingParams {
                max_tokens: 4,
                overlap_tokens: 0,
                min_tokens: 1,
            },
        );
        let r = idx.ingest("a", "a.md", "w1 w2 w3 w4 w5 w6 w7 w8 w9 w10 w11 w12").await.unwrap();
        assert_eq!(r.chunks_added, 3);
        assert_eq!(r.sparse_only, 1);
        assert_eq!(cell.load().dense().vector_count(), 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_not_published() {
        let (idx, cell, store) = indexer(Arc::new(Ragged));
        idx.ingest("a", "a.md", "two words").await.unwrap();
        let err = idx.ingest("b", "b.md", "three words here").await.unwrap_err();
        assert!(err.is_fatal());
        let snap = cell.load();
        assert_eq!(snap.version(), 1);
        assert!(snap.document("b").is_none());
        assert_eq!(store.load_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_and_reingest() {
        let (idx, cell, _) = indexer(Arc::new(HashEmbedder::new(16)));
        idx.ingest("a", "a.md", "hybrid combines both").await.unwrap();
        assert!(idx.purge("a").await.unwrap());
        assert!(!idx.purge("a").await.unwrap());
        assert!(!idx.purge("missing").await.unwrap());
        assert_eq!(cell.load().chunk_count(), 0);

        // identical content after a purge is indexed again
        let r = idx.ingest("a", "a.md", "hybrid combines both").await.unwrap();
        assert!(!r.skipped);
        assert_eq!(cell.load().chunk_count(), 1);
        assert!(cell.load().document("a").unwrap().document.is_live());
    }

    #[tokio::test]
    async fn test_store_failure_leaves_snapshot() {
        let (idx, cell, store) = indexer(Arc::new(HashEmbedder::new(16)));
        store.set_fail_writes(true);
        let err = idx.ingest("a", "a.md", "text").await.unwrap_err();
        assert_eq!(err.kind(), "store");
        assert_eq!(cell.load().version(), 0);
    }

    #[tokio::test]
    async fn test_restore_and_backfill() {
        let store = Arc::new(InMemoryStore::new());
        let cell = Arc::new(SnapshotCell::default());
        let writer = DocumentIndexer::new(cell, Arc::new(DisabledProvider), store.clone(), ChunkingParams::default());
        writer.ingest("a", "a.md", "alpha beta").await.unwrap();
        writer.ingest("b", "b.md", "gamma delta").await.unwrap();
        writer.purge("b").await.unwrap();

        let cell = Arc::new(SnapshotCell::default());
        let reader = DocumentIndexer::new(cell.clone(), Arc::new(HashEmbedder::new(8)), store.clone(), ChunkingParams::default());
        assert_eq!(reader.restore().await.unwrap(), 2);
        let snap = cell.load();
        assert_eq!(snap.live_document_count(), 1);
        assert_eq!(snap.tombstoned_document_count(), 1);
        assert_eq!(snap.sparse_only_count(), 1);

        assert_eq!(reader.backfill_embeddings().await.unwrap(), 1);
        assert_eq!(cell.load().sparse_only_count(), 0);
        assert_eq!(cell.load().dense().vector_count(), 1);
        assert!(store.load_documents().await.unwrap().iter().all(|e| e.sparse_only_count() == 0));
        assert_eq!(reader.backfill_embeddings().await.unwrap(), 0);
    }
}

//! Immutable, versioned index snapshots and the cell that publishes them.
//!
//! An [`IndexSnapshot`] holds every document entry together with the sparse
//! and dense indexes built from it. Published snapshots are never mutated:
//! the indexer clones the current one with [`IndexSnapshot::next`], applies
//! its change to the clone, validates it and swaps it into the
//! [`SnapshotCell`]. Queries take an `Arc` of whichever snapshot is current
//! when they start and keep reading it even if a newer one is published
//! meanwhile.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dense::{ChunkVector, DenseIndex};
use crate::error::{EngineError, Result};
use crate::models::{Chunk, ChunkId, Document};
use crate::sparse::{ChunkTerms, SparseIndex};
use crate::text::analyze;

/// A document with its chunks and their embeddings.
///
/// `vectors[i]` belongs to `chunks[i]`; `None` marks a sparse-only chunk.
/// Tombstoned documents keep their entry with no chunks.
#[derive(Debug, Clone)]
pub struct DocEntry {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub vectors: Vec<Option<Arc<[f32]>>>,
}

impl DocEntry {
    pub fn sparse_only_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_none()).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    version: u64,
    documents: HashMap<String, Arc<DocEntry>>,
    sparse: SparseIndex,
    dense: DenseIndex,
}

impl IndexSnapshot {
    /// The empty version-0 snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sparse(&self) -> &SparseIndex {
        &self.sparse
    }

    pub fn dense(&self) -> &DenseIndex {
        &self.dense
    }

    pub fn document(&self, doc_id: &str) -> Option<&Arc<DocEntry>> {
        self.documents.get(doc_id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<DocEntry>> {
        self.documents.values()
    }

    /// Look up an indexed chunk.
    pub fn chunk(&self, id: &ChunkId) -> Option<&Chunk> {
        self.documents
            .get(&id.doc_id)
            .and_then(|e| e.chunks.get(id.index as usize))
    }

    pub fn live_document_count(&self) -> usize {
        self.documents.values().filter(|e| e.document.is_live()).count()
    }

    pub fn tombstoned_document_count(&self) -> usize {
        self.documents.len() - self.live_document_count()
    }

    pub fn chunk_count(&self) -> usize {
        self.sparse.chunk_count()
    }

    pub fn sparse_only_count(&self) -> usize {
        self.documents.values().map(|e| e.sparse_only_count()).sum()
    }

    /// A private, mutable copy with the next version number.
    pub(crate) fn next(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next
    }

    /// Insert or replace a document and index its chunks.
    pub(crate) fn put_document(&mut self, entry: DocEntry) -> Result<()> {
        let doc_id = entry.document.id.clone();

        let vectors: Vec<ChunkVector> = entry
            .chunks
            .iter()
            .zip(entry.vectors.iter())
            .filter_map(|(c, v)| v.as_ref().map(|v| (c.id.clone(), v.clone())))
            .collect();
        self.dense.upsert_document(&doc_id, vectors)?;

        let terms: Vec<ChunkTerms> = entry
            .chunks
            .iter()
            .map(|c| ChunkTerms {
                chunk_id: c.id.clone(),
                terms: analyze(&c.text),
            })
            .collect();
        self.sparse.upsert_document(&doc_id, &terms);

        self.documents.insert(doc_id, Arc::new(entry));
        Ok(())
    }

    /// Mark a document deleted and drop its chunks from both indexes.
    ///
    /// Returns `false` if the document is unknown or already tombstoned.
    pub(crate) fn tombstone(&mut self, doc_id: &str, at: DateTime<Utc>) -> bool {
        let Some(entry) = self.documents.get(doc_id) else {
            return false;
        };
        if !entry.document.is_live() {
            return false;
        }
        let mut document = entry.document.clone();
        document.deleted_at = Some(at);

        self.sparse.remove_document(doc_id);
        self.dense.remove_document(doc_id);
        self.documents.insert(
            doc_id.to_string(),
            Arc::new(DocEntry {
                document,
                chunks: Vec::new(),
                vectors: Vec::new(),
            }),
        );
        true
    }

    /// Consistency check run before publishing.
    ///
    /// `changed` narrows the per-document checks to the document that was
    /// just written; global counters are always compared.
    pub(crate) fn validate(&self, changed: Option<&str>) -> Result<()> {
        let corrupt = |msg: String| -> Result<()> { Err(EngineError::SnapshotCorruption(msg)) };

        let entries: Box<dyn Iterator<Item = &Arc<DocEntry>> + '_> = match changed {
            Some(id) => Box::new(self.documents.get(id).into_iter()),
            None => Box::new(self.documents.values()),
        };

        for entry in entries {
            let id = &entry.document.id;
            if entry.vectors.len() != entry.chunks.len() {
                return corrupt(format!(
                    "document {id} has {} chunks but {} vector slots",
                    entry.chunks.len(),
                    entry.vectors.len()
                ));
            }
            for (i, c) in entry.chunks.iter().enumerate() {
                if c.chunk_index as usize != i || c.id.index as usize != i || c.doc_id != *id {
                    return corrupt(format!("document {id} has non-contiguous chunk {}", c.id));
                }
            }
            if let Some(d) = self.dense.dims() {
                if let Some(v) = entry.vectors.iter().flatten().find(|v| v.len() != d) {
                    return corrupt(format!(
                        "document {id} holds a {}-dimension vector, index has {d}",
                        v.len()
                    ));
                }
            }
            if self.sparse.document_chunk_count(id) != entry.chunks.len() {
                return corrupt(format!(
                    "document {id}: sparse index has {} chunks, entry has {}",
                    self.sparse.document_chunk_count(id),
                    entry.chunks.len()
                ));
            }
            let embedded = entry.chunks.len() - entry.sparse_only_count();
            if self.dense.document_vector_count(id) != embedded {
                return corrupt(format!(
                    "document {id}: dense index has {} vectors, entry has {embedded}",
                    self.dense.document_vector_count(id)
                ));
            }
        }

        let chunks: usize = self.documents.values().map(|e| e.chunks.len()).sum();
        if chunks != self.sparse.chunk_count() {
            return corrupt(format!(
                "sparse index holds {} chunks, documents hold {chunks}",
                self.sparse.chunk_count()
            ));
        }
        let vectors = chunks.saturating_sub(self.sparse_only_count());
        if vectors != self.dense.vector_count() {
            return corrupt(format!(
                "dense index holds {} vectors, documents hold {vectors}",
                self.dense.vector_count()
            ));
        }
        Ok(())
    }
}

/// Holder of the currently published snapshot.
///
/// The lock guards only the pointer: readers clone the `Arc` and release it
/// immediately, and a publish is a single pointer store.
#[derive(Debug)]
pub struct SnapshotCell {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl SnapshotCell {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot.
    pub fn load(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Make `snapshot` current and return it.
    pub fn publish(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = snapshot.clone();
        snapshot
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new(IndexSnapshot::empty())
    }
}

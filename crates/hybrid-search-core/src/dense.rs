//! Exact nearest-neighbor index over chunk embeddings.
//!
//! Vectors are grouped per document behind an [`Arc`], so cloning the index
//! for the next snapshot is cheap and replacing one document never copies
//! another document's vectors. Search is a brute-force cosine scan, which
//! gives perfect recall over the true top-`k` and is fast enough for corpora
//! of a few hundred thousand chunks.
//!
//! The dimensionality is fixed by the first vector inserted and stays fixed
//! for the lifetime of the index, even if every document is later removed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::cosine_similarity;
use crate::error::{EngineError, Result};
use crate::models::ChunkId;

/// Embedding of one chunk.
pub type ChunkVector = (ChunkId, Arc<[f32]>);

#[derive(Debug, Clone, Default)]
pub struct DenseIndex {
    dims: Option<usize>,
    by_doc: HashMap<String, Arc<Vec<ChunkVector>>>,
    count: usize,
}

impl DenseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector dimensionality, or `None` before the first insert.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    /// Number of stored vectors.
    pub fn vector_count(&self) -> usize {
        self.count
    }

    pub fn document_vector_count(&self, doc_id: &str) -> usize {
        self.by_doc.get(doc_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Replace the vectors of `doc_id`.
    ///
    /// Fails with [`EngineError::SnapshotCorruption`] if any vector's length
    /// differs from the index dimensionality; the index is left unchanged.
    pub fn upsert_document(&mut self, doc_id: &str, vectors: Vec<ChunkVector>) -> Result<()> {
        let mut dims = self.dims;
        for (id, v) in &vectors {
            match dims {
                None => dims = Some(v.len()),
                Some(d) if d != v.len() => {
                    return Err(EngineError::SnapshotCorruption(format!(
                        "vector for {id} has {} dimensions, index has {d}",
                        v.len()
                    )));
                }
                Some(_) => {}
            }
        }

        self.remove_document(doc_id);
        if vectors.is_empty() {
            return Ok(());
        }
        self.dims = dims;
        self.count += vectors.len();
        self.by_doc.insert(doc_id.to_string(), Arc::new(vectors));
        Ok(())
    }

    pub fn remove_document(&mut self, doc_id: &str) {
        if let Some(old) = self.by_doc.remove(doc_id) {
            self.count -= old.len();
        }
    }

    /// Cosine similarity of `query` against every allowed vector.
    ///
    /// Returns up to `limit` `(chunk_id, cosine)` pairs ordered by similarity
    /// descending, then chunk ID ascending. A query whose length does not
    /// match the index yields no candidates.
    pub fn search(
        &self,
        query: &[f32],
        allow: &dyn Fn(&ChunkId) -> bool,
        limit: usize,
    ) -> Vec<(ChunkId, f64)> {
        if limit == 0 || self.dims != Some(query.len()) {
            return Vec::new();
        }

        let mut scored: Vec<(&ChunkId, f64)> = self
            .by_doc
            .values()
            .flat_map(|vs| vs.iter())
            .filter(|(id, _)| allow(id))
            .map(|(id, v)| (id, cosine_similarity(query, v) as f64))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored.truncate(limit);
        scored.into_iter().map(|(id, s)| (id.clone(), s)).collect()
    }
}

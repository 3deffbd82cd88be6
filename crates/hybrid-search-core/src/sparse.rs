//! BM25 inverted index over chunk terms.
//!
//! The index lives inside an [`IndexSnapshot`](crate::snapshot::IndexSnapshot)
//! and is updated copy-on-write: every posting list sits behind an [`Arc`],
//! so cloning the index for the next snapshot copies only pointers, and an
//! update rewrites just the posting lists of the terms it touches. The
//! previous snapshot keeps its own lists untouched.
//!
//! # Scoring
//!
//! For each unique query term `t` present in chunk `c`:
//!
//! ```text
//! idf(t)   = ln(1 + (N - df(t) + 0.5) / (df(t) + 0.5))
//! score   += idf(t) · tf(t,c)·(k1 + 1) / (tf(t,c) + k1·(1 - b + b·|c| / avgdl))
//! ```
//!
//! where `N` is the number of indexed chunks and `avgdl` their mean length
//! in terms. The `ln(1 + …)` form keeps idf positive for very common terms.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::models::ChunkId;

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization strength, `0.0..=1.0`.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !(self.k1 > 0.0 && self.k1.is_finite()) {
            return Err(EngineError::Config(format!("k1 must be > 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(EngineError::Config(format!("b must be in [0, 1], got {}", self.b)));
        }
        Ok(())
    }
}

/// One entry of a posting list.
#[derive(Debug, Clone)]
struct Posting {
    chunk_id: ChunkId,
    tf: u32,
    /// Length of the chunk in index terms.
    chunk_len: u32,
}

/// Terms of one chunk, ready for indexing.
#[derive(Debug, Clone)]
pub struct ChunkTerms {
    pub chunk_id: ChunkId,
    pub terms: Vec<String>,
}

/// Inverted index with BM25 scoring.
#[derive(Debug, Clone, Default)]
pub struct SparseIndex {
    postings: HashMap<String, Arc<Vec<Posting>>>,
    /// Distinct terms per document, so a document can be removed without
    /// scanning the whole vocabulary.
    doc_terms: HashMap<String, Arc<Vec<String>>>,
    /// `(chunks, total terms)` per document.
    doc_stats: HashMap<String, (usize, u64)>,
    chunk_count: usize,
    total_len: u64,
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed chunks (`N` in the idf formula).
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Number of distinct terms.
    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    /// Indexed chunks belonging to `doc_id`.
    pub fn document_chunk_count(&self, doc_id: &str) -> usize {
        self.doc_stats.get(doc_id).map(|s| s.0).unwrap_or(0)
    }

    /// Document frequency of a term.
    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map(|p| p.len()).unwrap_or(0)
    }

    /// Mean chunk length in terms.
    pub fn avg_chunk_len(&self) -> f64 {
        if self.chunk_count == 0 {
            0.0
        } else {
            self.total_len as f64 / self.chunk_count as f64
        }
    }

    /// Replace every chunk of `doc_id` with `chunks`.
    pub fn upsert_document(&mut self, doc_id: &str, chunks: &[ChunkTerms]) {
        self.remove_document(doc_id);
        if chunks.is_empty() {
            return;
        }

        let mut touched: Vec<String> = Vec::new();
        let mut doc_len: u64 = 0;
        for chunk in chunks {
            let mut tfs: HashMap<&str, u32> = HashMap::new();
            for term in &chunk.terms {
                *tfs.entry(term.as_str()).or_insert(0) += 1;
            }
            let chunk_len = chunk.terms.len() as u32;
            for (term, tf) in tfs {
                let list = self.postings.entry(term.to_string()).or_default();
                Arc::make_mut(list).push(Posting {
                    chunk_id: chunk.chunk_id.clone(),
                    tf,
                    chunk_len,
                });
                touched.push(term.to_string());
            }
            doc_len += chunk_len as u64;
        }
        touched.sort_unstable();
        touched.dedup();

        self.chunk_count += chunks.len();
        self.total_len += doc_len;
        self.doc_stats.insert(doc_id.to_string(), (chunks.len(), doc_len));
        self.doc_terms.insert(doc_id.to_string(), Arc::new(touched));
    }

    /// Drop every chunk of `doc_id`. No-op for unknown documents.
    pub fn remove_document(&mut self, doc_id: &str) {
        let Some(terms) = self.doc_terms.remove(doc_id) else {
            return;
        };
        let (removed_chunks, removed_len) = self.doc_stats.remove(doc_id).unwrap_or((0, 0));

        for term in terms.iter() {
            let now_empty = match self.postings.get_mut(term) {
                Some(list) => {
                    let list = Arc::make_mut(list);
                    list.retain(|p| p.chunk_id.doc_id != doc_id);
                    list.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.postings.remove(term);
            }
        }

        self.chunk_count -= removed_chunks;
        self.total_len -= removed_len;
    }

    /// Score every chunk sharing at least one term with `query_terms`.
    ///
    /// Chunks rejected by `allow` are skipped. Returns up to `limit`
    /// `(chunk_id, raw_bm25)` pairs ordered by score descending, then
    /// chunk ID ascending.
    pub fn search(
        &self,
        query_terms: &[String],
        params: &Bm25Params,
        allow: &dyn Fn(&ChunkId) -> bool,
        limit: usize,
    ) -> Vec<(ChunkId, f64)> {
        if self.chunk_count == 0 || limit == 0 {
            return Vec::new();
        }

        let mut unique: Vec<&str> = query_terms.iter().map(|t| t.as_str()).collect();
        unique.sort_unstable();
        unique.dedup();

        let n = self.chunk_count as f64;
        let avgdl = self.avg_chunk_len().max(f64::EPSILON);
        let mut scores: HashMap<&ChunkId, f64> = HashMap::new();

        for term in unique {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let df = list.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for p in list.iter() {
                if !allow(&p.chunk_id) {
                    continue;
                }
                let tf = p.tf as f64;
                let norm = 1.0 - params.b + params.b * (p.chunk_len as f64 / avgdl);
                let s = idf * tf * (params.k1 + 1.0) / (tf + params.k1 * norm);
                *scores.entry(&p.chunk_id).or_insert(0.0) += s;
            }
        }

        let mut ranked: Vec<(ChunkId, f64)> = scores
            .into_iter()
            .map(|(id, s)| (id.clone(), s))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

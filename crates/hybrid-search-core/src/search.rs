//! Hybrid retrieval: BM25 and dense candidates fused into one ranking.
//!
//! The retriever is a pure function of a published [`IndexSnapshot`], the
//! query terms and an optional query embedding. It never mutates shared
//! state and never waits on ingestion.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch up to `candidate_k_keyword` BM25 candidates (chunks sharing at
//!    least one analyzed term with the query).
//! 2. Fetch up to `candidate_k_vector` dense candidates (cosine similarity).
//! 3. Normalize both sets to `[0, 1]` independently using min-max
//!    normalization.
//! 4. Merge by chunk ID: `score = w_bm25 × bm25 + w_vector × vector`, a
//!    component missing from one set counting as `0`.
//! 5. Sort by score (desc), chunk ID (asc).
//! 6. Truncate to `k`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::{EngineError, Result};
use crate::models::ChunkId;
use crate::snapshot::IndexSnapshot;
use crate::sparse::Bm25Params;
use crate::text::analyze;

/// Fusion weights for the two normalized components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub bm25: f64,
    pub vector: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            bm25: 0.3,
            vector: 0.7,
        }
    }
}

impl FusionWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("bm25_weight", self.bm25), ("vector_weight", self.vector)] {
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::Validation(format!(
                    "{name} must be a finite number >= 0, got {w}"
                )));
            }
        }
        if self.bm25 == 0.0 && self.vector == 0.0 {
            return Err(EngineError::Validation(
                "bm25_weight and vector_weight must not both be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    pub weights: FusionWeights,
    pub bm25: Bm25Params,
    /// Number of keyword candidates to fetch.
    pub candidate_k_keyword: usize,
    /// Number of vector candidates to fetch.
    pub candidate_k_vector: usize,
    /// Default `k` when the caller does not give one.
    pub final_limit: usize,
    /// How many fused results the re-ranker sees before truncation to `k`.
    pub rerank_depth: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            bm25: Bm25Params::default(),
            candidate_k_keyword: 100,
            candidate_k_vector: 100,
            final_limit: 10,
            rerank_depth: 50,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        self.weights
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        self.bm25.validate()?;
        if self.candidate_k_keyword == 0 || self.candidate_k_vector == 0 {
            return Err(EngineError::Config("candidate_k_* must be >= 1".into()));
        }
        if self.final_limit == 0 {
            return Err(EngineError::Config("final_limit must be >= 1".into()));
        }
        Ok(())
    }
}

/// Optional restrictions on which chunks may be returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveFilters {
    /// Only chunks of these documents.
    #[serde(default)]
    pub doc_ids: Option<Vec<String>>,
    /// Only documents whose `source_path` starts with this prefix.
    #[serde(default)]
    pub source_prefix: Option<String>,
}

impl RetrieveFilters {
    fn allows(&self, snapshot: &IndexSnapshot, id: &ChunkId) -> bool {
        if let Some(ids) = &self.doc_ids {
            if !ids.iter().any(|d| *d == id.doc_id) {
                return false;
            }
        }
        if let Some(prefix) = &self.source_prefix {
            return snapshot
                .document(&id.doc_id)
                .is_some_and(|e| e.document.source_path.starts_with(prefix.as_str()));
        }
        true
    }
}

/// Score breakdown of one result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentScores {
    /// Normalized BM25 score (0.0 if absent from keyword candidates).
    pub bm25: f64,
    /// Normalized cosine score (0.0 if absent from vector candidates).
    pub vector: f64,
    pub raw_bm25: Option<f64>,
    pub raw_vector: Option<f64>,
    /// Feedback bias added by the re-ranker.
    pub bias: f64,
}

/// One retrieved chunk.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk_id: ChunkId,
    pub doc_id: String,
    pub source_path: String,
    pub text: String,
    /// Fused score, plus bias once re-ranked.
    pub score: f64,
    pub components: ComponentScores,
}

/// Wall-clock time spent in each retrieval stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub sparse_ms: f64,
    pub dense_ms: f64,
    pub fusion_ms: f64,
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub results: Vec<RankedChunk>,
    pub timings: StageTimings,
    pub keyword_candidates: usize,
    pub vector_candidates: usize,
}

/// Queries both indexes of a snapshot and fuses their scores.
#[derive(Debug, Clone, Default)]
pub struct HybridRetriever {
    params: RetrievalParams,
}

impl HybridRetriever {
    pub fn new(params: RetrievalParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Retrieve the top `k` chunks for a query.
    ///
    /// `query_vec` is the query embedding; without it the dense component is
    /// 0 for every chunk. `weights` overrides the configured fusion weights.
    /// An empty index or a query with no usable terms yields no results.
    pub fn retrieve(
        &self,
        snapshot: &IndexSnapshot,
        query_text: &str,
        query_vec: Option<&[f32]>,
        k: usize,
        weights: Option<FusionWeights>,
        filters: &RetrieveFilters,
    ) -> Result<Retrieval> {
        if k == 0 {
            return Err(EngineError::Validation("k must be >= 1".into()));
        }
        let weights = weights.unwrap_or(self.params.weights);
        weights.validate()?;

        let allow = |id: &ChunkId| filters.allows(snapshot, id);

        let t = Instant::now();
        let terms = analyze(query_text);
        let keyword = snapshot.sparse().search(
            &terms,
            &self.params.bm25,
            &allow,
            self.params.candidate_k_keyword.max(k),
        );
        let sparse_ms = elapsed_ms(t);

        let t = Instant::now();
        let vector = match query_vec {
            Some(qv) => snapshot
                .dense()
                .search(qv, &allow, self.params.candidate_k_vector.max(k)),
            None => Vec::new(),
        };
        let dense_ms = elapsed_ms(t);

        let t = Instant::now();
        let results = fuse(snapshot, &keyword, &vector, weights, k);
        let fusion_ms = elapsed_ms(t);

        Ok(Retrieval {
            results,
            timings: StageTimings {
                sparse_ms,
                dense_ms,
                fusion_ms,
            },
            keyword_candidates: keyword.len(),
            vector_candidates: vector.len(),
        })
    }
}

#[derive(Default)]
struct Merged {
    bm25: f64,
    vector: f64,
    raw_bm25: Option<f64>,
    raw_vector: Option<f64>,
}

fn fuse(
    snapshot: &IndexSnapshot,
    keyword: &[(ChunkId, f64)],
    vector: &[(ChunkId, f64)],
    weights: FusionWeights,
    k: usize,
) -> Vec<RankedChunk> {
    let mut merged: BTreeMap<&ChunkId, Merged> = BTreeMap::new();
    for ((id, raw), norm) in keyword.iter().zip(normalize_scores(keyword)) {
        let m = merged.entry(id).or_default();
        m.bm25 = norm;
        m.raw_bm25 = Some(*raw);
    }
    for ((id, raw), norm) in vector.iter().zip(normalize_scores(vector)) {
        let m = merged.entry(id).or_default();
        m.vector = norm;
        m.raw_vector = Some(*raw);
    }

    let mut results: Vec<RankedChunk> = merged
        .into_iter()
        .filter_map(|(id, m)| {
            let chunk = snapshot.chunk(id)?;
            let source_path = snapshot
                .document(&id.doc_id)
                .map(|e| e.document.source_path.clone())
                .unwrap_or_default();
            Some(RankedChunk {
                chunk_id: id.clone(),
                doc_id: id.doc_id.clone(),
                source_path,
                text: chunk.text.clone(),
                score: weights.bm25 * m.bm25 + weights.vector * m.vector,
                components: ComponentScores {
                    bm25: m.bm25,
                    vector: m.vector,
                    raw_bm25: m.raw_bm25,
                    raw_vector: m.raw_vector,
                    bias: 0.0,
                },
            })
        })
        .collect();

    sort_ranked(&mut results);
    results.truncate(k);
    results
}

/// Sort by score descending, then chunk ID ascending.
pub fn sort_ranked(results: &mut [RankedChunk]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[(ChunkId, f64)]) -> Vec<f64> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.1)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.1 - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

fn elapsed_ms(t: Instant) -> f64 {
    t.elapsed().as_secs_f64() * 1000.0
}

//! Feedback log, per-document bias table and the re-ranker that applies it.
//!
//! Every accepted judgment is appended to an audit log and nudges the bias
//! of its document:
//!
//! ```text
//! bias[doc] = clip(bias[doc] + learning_rate · delta(label), -max_bias, max_bias)
//! ```
//!
//! with `delta(positive) = +1` and `delta(negative) = -1`. Bias is keyed by
//! document ID only, so it outlives purges and re-ingests of the document.
//! Biases never decay.
//!
//! Updates are atomic per document: the bias table is a [`DashMap`] and each
//! read-modify-write runs under that key's shard lock, so concurrent
//! feedback on the same document never loses an update and feedback on
//! different documents rarely contends.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{FeedbackLabel, FeedbackRecord};
use crate::search::{sort_ranked, RankedChunk};
use crate::text::query_fingerprint;

/// Bias update parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackParams {
    pub learning_rate: f64,
    /// Bias is clipped to `[-max_bias, max_bias]`.
    pub max_bias: f64,
}

impl Default for FeedbackParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.02,
            max_bias: 0.2,
        }
    }
}

impl FeedbackParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(EngineError::Config(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.max_bias > 0.0 && self.max_bias.is_finite()) {
            return Err(EngineError::Config(format!(
                "max_bias must be > 0, got {}",
                self.max_bias
            )));
        }
        Ok(())
    }
}

pub struct FeedbackStore {
    params: FeedbackParams,
    log: Mutex<Vec<FeedbackRecord>>,
    bias: DashMap<String, f64>,
}

impl FeedbackStore {
    pub fn new(params: FeedbackParams) -> Self {
        Self {
            params,
            log: Mutex::new(Vec::new()),
            bias: DashMap::new(),
        }
    }

    pub fn params(&self) -> &FeedbackParams {
        &self.params
    }

    /// Validate a judgment and build its record without applying it.
    ///
    /// Lets a caller persist the record before any in-memory state changes.
    pub fn prepare(&self, query_text: &str, doc_id: &str, label: &str) -> Result<FeedbackRecord> {
        let label: FeedbackLabel = label.parse()?;
        if doc_id.trim().is_empty() {
            return Err(EngineError::Validation("doc_id must not be empty".into()));
        }
        Ok(FeedbackRecord {
            id: Uuid::new_v4().to_string(),
            query_fingerprint: query_fingerprint(query_text),
            query_text: query_text.to_string(),
            doc_id: doc_id.to_string(),
            label,
            timestamp: Utc::now(),
        })
    }

    /// Append `record` to the log and update its document's bias.
    ///
    /// Returns the new bias.
    pub fn apply(&self, record: FeedbackRecord) -> f64 {
        let bias = self.update_bias(&record.doc_id, record.label);
        debug!(doc_id = %record.doc_id, label = %record.label, bias, "applied feedback");
        self.log.lock().push(record);
        bias
    }

    /// Validate, record and apply a judgment in one step.
    pub fn record_feedback(&self, query_text: &str, doc_id: &str, label: &str) -> Result<FeedbackRecord> {
        let record = self.prepare(query_text, doc_id, label)?;
        self.apply(record.clone());
        Ok(record)
    }

    /// Rebuild the log and bias table from persisted records.
    ///
    /// Records are applied in timestamp order; clipping makes the result
    /// order-dependent.
    pub fn replay(&self, mut records: Vec<FeedbackRecord>) {
        records.sort_by_key(|r| r.timestamp);
        self.bias.clear();
        let mut log = self.log.lock();
        log.clear();
        for record in records {
            self.update_bias(&record.doc_id, record.label);
            log.push(record);
        }
    }

    fn update_bias(&self, doc_id: &str, label: FeedbackLabel) -> f64 {
        let step = self.params.learning_rate * label.delta();
        let max = self.params.max_bias;
        let mut entry = self.bias.entry(doc_id.to_string()).or_insert(0.0);
        *entry = (*entry + step).clamp(-max, max);
        *entry
    }

    /// Current bias of a document, `0.0` if it never received feedback.
    pub fn bias(&self, doc_id: &str) -> f64 {
        self.bias.get(doc_id).map(|b| *b).unwrap_or(0.0)
    }

    /// Copy of the whole bias table.
    pub fn biases(&self) -> HashMap<String, f64> {
        self.bias
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Copy of the audit log, in application order.
    pub fn records(&self) -> Vec<FeedbackRecord> {
        self.log.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies learned per-document bias to fused results.
#[derive(Clone)]
pub struct ReRanker {
    feedback: Arc<FeedbackStore>,
}

impl ReRanker {
    pub fn new(feedback: Arc<FeedbackStore>) -> Self {
        Self { feedback }
    }

    /// Add each document's bias to its chunks' scores and re-sort with the
    /// retriever's tie-break.
    ///
    /// Each document's bias is read once, so all of its chunks move by the
    /// same amount even if feedback arrives mid-call.
    pub fn rerank(&self, mut results: Vec<RankedChunk>) -> Vec<RankedChunk> {
        let mut seen: HashMap<String, f64> = HashMap::new();
        for r in &mut results {
            let bias = *seen
                .entry(r.doc_id.clone())
                .or_insert_with(|| self.feedback.bias(&r.doc_id));
            r.components.bias = bias;
            r.score += bias;
        }
        sort_ranked(&mut results);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkId;
    use crate::search::ComponentScores;

    fn ranked(doc: &str, score: f64) -> RankedChunk {
        RankedChunk {
            chunk_id: ChunkId::new(doc, 0),
            doc_id: doc.to_string(),
            source_path: String::new(),
            text: String::new(),
            score,
            components: ComponentScores {
                bm25: 0.0,
                vector: 0.0,
                raw_bm25: None,
                raw_vector: None,
                bias: 0.0,
            },
        }
    }

    #[test]
    fn test_bias_update_and_clip() {
        let store = FeedbackStore::new(FeedbackParams {
            learning_rate: 0.1,
            max_bias: 0.25,
        });
        store.record_feedback("q", "a", "positive").unwrap();
        assert!((store.bias("a") - 0.1).abs() < 1e-12);
        store.record_feedback("q", "a", "positive").unwrap();
        store.record_feedback("q", "a", "positive").unwrap();
        assert!((store.bias("a") - 0.25).abs() < 1e-12);
        store.record_feedback("q", "a", "negative").unwrap();
        assert!((store.bias("a") - 0.15).abs() < 1e-12);
        assert_eq!(store.bias("untouched"), 0.0);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_invalid_label_changes_nothing() {
        let store = FeedbackStore::new(FeedbackParams::default());
        let err = store.record_feedback("q", "a", "thumbs-up").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(store.is_empty());
        assert!(store.biases().is_empty());
        assert!(store.record_feedback("q", " ", "positive").is_err());
    }

    #[test]
    fn test_record_carries_fingerprint() {
        let store = FeedbackStore::new(FeedbackParams::default());
        let r = store.record_feedback("Hybrid retrieval?", "a", "Negative").unwrap();
        assert_eq!(r.query_fingerprint, query_fingerprint("hybrid retrieval"));
        assert_eq!(r.label, FeedbackLabel::Negative);
    }

    #[test]
    fn test_replay_rebuilds_table() {
        let source = FeedbackStore::new(FeedbackParams::default());
        source.record_feedback("q", "a", "positive").unwrap();
        source.record_feedback("q", "b", "negative").unwrap();
        source.record_feedback("q", "a", "positive").unwrap();

        let restored = FeedbackStore::new(FeedbackParams::default());
        restored.record_feedback("q", "stale", "positive").unwrap();
        restored.replay(source.records());
        assert_eq!(restored.biases(), source.biases());
        assert_eq!(restored.bias("stale"), 0.0);
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn test_concurrent_updates_not_lost() {
        let store = Arc::new(FeedbackStore::new(FeedbackParams {
            learning_rate: 0.001,
            max_bias: 10.0,
        }));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.record_feedback("q", "hot", "positive").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!((store.bias("hot") - 0.8).abs() < 1e-9);
        assert_eq!(store.len(), 800);
    }

    #[test]
    fn test_rerank_adds_bias_and_resorts() {
        let store = Arc::new(FeedbackStore::new(FeedbackParams {
            learning_rate: 0.3,
            max_bias: 0.5,
        }));
        store.record_feedback("q", "c", "positive").unwrap();
        store.record_feedback("q", "a", "negative").unwrap();

        let out = ReRanker::new(store).rerank(vec![ranked("a", 0.9), ranked("b", 0.5), ranked("c", 0.4)]);
        let order: Vec<&str> = out.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert!((out[0].score - 0.7).abs() < 1e-9);
        assert!((out[0].components.bias - 0.3).abs() < 1e-9);
        // unrelated document untouched
        assert_eq!(out[2].score, 0.5);
        assert_eq!(out[2].components.bias, 0.0);
    }

    #[test]
    fn test_rerank_tie_break() {
        let store = Arc::new(FeedbackStore::new(FeedbackParams::default()));
        let out = ReRanker::new(store).rerank(vec![ranked("b", 0.5), ranked("a", 0.5)]);
        assert_eq!(out[0].doc_id, "a");
    }
}

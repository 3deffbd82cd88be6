//! Rolling window of served-query samples.
//!
//! The [`MetricsCollector`] keeps the most recent `window_size` samples
//! (optionally also dropping samples older than `window_secs`) and derives
//! latency percentiles, stage averages and hit rate from them on demand.
//!
//! # Percentiles
//!
//! Nearest-rank over `total_ms`: the `p`-th percentile of `n` sorted values
//! is the value at 1-based rank `ceil(p / 100 · n)`.
//!
//! # Hit rate
//!
//! A sample is *judged* once any feedback arrives for its query
//! fingerprint, and a *hit* once a positive label arrives for a document in
//! its top `hit_rate_k` results. `hit_rate_at_k = hits / judged`; queries
//! nobody judged are left out, and the rate is `None` until something is
//! judged.
//!
//! Recording is a push under a short mutex and cannot fail, so it never
//! slows or breaks the query path.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::FeedbackLabel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsParams {
    /// Maximum samples retained.
    pub window_size: usize,
    /// Drop samples older than this, when set.
    pub window_secs: Option<u64>,
    /// Depth of the top-k list used for hit-rate attribution.
    pub hit_rate_k: usize,
}

impl Default for MetricsParams {
    fn default() -> Self {
        Self {
            window_size: 1000,
            window_secs: None,
            hit_rate_k: 5,
        }
    }
}

impl MetricsParams {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(EngineError::Config("window_size must be >= 1".into()));
        }
        if self.hit_rate_k == 0 {
            return Err(EngineError::Config("hit_rate_k must be >= 1".into()));
        }
        if self.window_secs == Some(0) {
            return Err(EngineError::Config("window_secs must be >= 1 when set".into()));
        }
        Ok(())
    }
}

/// Timings of one served query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetricSample {
    pub fingerprint: String,
    pub sparse_ms: f64,
    pub dense_ms: f64,
    pub fusion_ms: f64,
    pub total_ms: f64,
    /// Documents of the returned results, best first.
    pub top_doc_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub hit_rate_at_k: Option<f64>,
    pub k: usize,
    pub avg_sparse_ms: f64,
    pub avg_dense_ms: f64,
    pub avg_fusion_ms: f64,
    pub sample_count: usize,
    pub judged_count: usize,
}

struct Entry {
    sample: QueryMetricSample,
    at: Instant,
    judged: bool,
    hit: bool,
}

pub struct MetricsCollector {
    params: MetricsParams,
    window: Mutex<VecDeque<Entry>>,
}

impl MetricsCollector {
    pub fn new(params: MetricsParams) -> Self {
        Self {
            params,
            window: Mutex::new(VecDeque::with_capacity(params.window_size.min(4096))),
        }
    }

    pub fn params(&self) -> &MetricsParams {
        &self.params
    }

    pub fn record(&self, mut sample: QueryMetricSample) {
        sample.top_doc_ids.truncate(self.params.hit_rate_k);
        let now = Instant::now();
        let mut window = self.window.lock();
        window.push_back(Entry {
            sample,
            at: now,
            judged: false,
            hit: false,
        });
        while window.len() > self.params.window_size {
            window.pop_front();
        }
        self.evict_expired(&mut window, now);
    }

    /// Attribute a judgment to the most recent sample of its query.
    ///
    /// Returns `false` when no sample with that fingerprint is in the window.
    pub fn observe_feedback(&self, fingerprint: &str, doc_id: &str, label: FeedbackLabel) -> bool {
        let mut window = self.window.lock();
        let Some(entry) = window
            .iter_mut()
            .rev()
            .find(|e| e.sample.fingerprint == fingerprint)
        else {
            return false;
        };
        entry.judged = true;
        if label == FeedbackLabel::Positive && entry.sample.top_doc_ids.iter().any(|d| d == doc_id) {
            entry.hit = true;
        }
        true
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut window = self.window.lock();
        self.evict_expired(&mut window, Instant::now());

        let n = window.len();
        let mut totals: Vec<f64> = window.iter().map(|e| e.sample.total_ms).collect();
        let judged = window.iter().filter(|e| e.judged).count();
        let hits = window.iter().filter(|e| e.hit).count();
        let avg = |f: fn(&QueryMetricSample) -> f64| {
            if n == 0 {
                0.0
            } else {
                window.iter().map(|e| f(&e.sample)).sum::<f64>() / n as f64
            }
        };
        let avg_sparse_ms = avg(|s| s.sparse_ms);
        let avg_dense_ms = avg(|s| s.dense_ms);
        let avg_fusion_ms = avg(|s| s.fusion_ms);
        drop(window);

        totals.sort_by(|a, b| a.total_cmp(b));
        MetricsSnapshot {
            p50_ms: percentile(&totals, 50.0),
            p95_ms: percentile(&totals, 95.0),
            hit_rate_at_k: (judged > 0).then(|| hits as f64 / judged as f64),
            k: self.params.hit_rate_k,
            avg_sparse_ms,
            avg_dense_ms,
            avg_fusion_ms,
            sample_count: n,
            judged_count: judged,
        }
    }

    fn evict_expired(&self, window: &mut VecDeque<Entry>, now: Instant) {
        let Some(secs) = self.params.window_secs else {
            return;
        };
        let max_age = Duration::from_secs(secs);
        while window
            .front()
            .is_some_and(|e| now.saturating_duration_since(e.at) > max_age)
        {
            window.pop_front();
        }
    }
}

/// Nearest-rank percentile of ascending `sorted` values; `0.0` when empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

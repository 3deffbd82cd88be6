//! # Hybrid Search Core
//!
//! Hybrid document retrieval with online feedback re-ranking: chunking,
//! BM25 and dense indexes published as immutable snapshots, min-max score
//! fusion, a per-document bias table learned from feedback, and a rolling
//! metrics window.
//!
//! This crate contains no sqlx, HTTP, or filesystem I/O. Embedding models,
//! answer generators and persistence backends plug in through the
//! [`embedding::EmbeddingProvider`], [`answer::AnswerGenerator`] and
//! [`store::Store`] traits.
//!
//! ```text
//! ingest ─▶ DocumentIndexer ─▶ {SparseIndex, DenseIndex} ─▶ SnapshotCell
//! query  ─▶ HybridRetriever (current snapshot) ─▶ ReRanker (bias) ─▶ MetricsCollector
//! feedback ─▶ FeedbackStore (log + bias) ─▶ MetricsCollector (hit rate)
//! ```

pub mod answer;
pub mod chunk;
pub mod dense;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod indexer;
pub mod metrics;
pub mod models;
pub mod search;
pub mod snapshot;
pub mod sparse;
pub mod store;
pub mod text;

pub use engine::{Engine, EngineParams, QueryOptions, QueryResponse};
pub use error::{EngineError, Result};

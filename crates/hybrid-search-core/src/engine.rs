//! The engine facade a transport layer talks to.
//!
//! [`Engine`] wires the indexer, retriever, feedback store, re-ranker and
//! metrics collector around one [`SnapshotCell`] and one [`Store`]:
//!
//! | Operation | Path |
//! |-----------|------|
//! | [`ingest`](Engine::ingest) | indexer → store → snapshot publish |
//! | [`purge`](Engine::purge) | indexer tombstone → store → snapshot publish |
//! | [`query`](Engine::query) | embed query → retriever → re-ranker → metrics |
//! | [`submit_feedback`](Engine::submit_feedback) | validate → store → bias table → metrics |
//! | [`get_metrics`](Engine::get_metrics) | metrics window snapshot |
//! | [`answer`](Engine::answer) | query → answer generator |

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::answer::{AnswerGenerator, ContextPassage, GeneratedAnswer};
use crate::chunk::ChunkingParams;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::feedback::{FeedbackParams, FeedbackStore, ReRanker};
use crate::indexer::DocumentIndexer;
use crate::metrics::{MetricsCollector, MetricsParams, MetricsSnapshot, QueryMetricSample};
use crate::models::{FeedbackLabel, IngestResult};
use crate::search::{FusionWeights, HybridRetriever, RankedChunk, RetrievalParams, RetrieveFilters, StageTimings};
use crate::snapshot::{IndexSnapshot, SnapshotCell};
use crate::store::memory::InMemoryStore;
use crate::store::Store;
use crate::text::query_fingerprint;

/// Every tunable of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    pub chunking: ChunkingParams,
    pub retrieval: RetrievalParams,
    pub feedback: FeedbackParams,
    pub metrics: MetricsParams,
}

impl EngineParams {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.feedback.validate()?;
        self.metrics.validate()
    }
}

/// Per-query overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub weights: Option<FusionWeights>,
    #[serde(default)]
    pub filters: RetrieveFilters,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub fingerprint: String,
    /// Snapshot version the query read.
    pub version: u64,
    pub results: Vec<RankedChunk>,
    /// `true` when the query embedding failed or did not match the index,
    /// so only BM25 contributed.
    pub degraded: bool,
    pub timings: StageTimings,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackAck {
    pub id: String,
    pub doc_id: String,
    pub label: FeedbackLabel,
    /// Document bias after this judgment.
    pub bias: f64,
    /// Whether a served query in the metrics window matched.
    pub attributed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    #[serde(flatten)]
    pub answer: GeneratedAnswer,
    pub passages: Vec<ContextPassage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub version: u64,
    pub live_documents: usize,
    pub tombstoned_documents: usize,
    pub chunks: usize,
    pub sparse_only_chunks: usize,
    pub dims: Option<usize>,
    pub vocabulary_size: usize,
    pub feedback_records: usize,
    pub embedding_model: String,
}

pub struct Engine {
    params: EngineParams,
    cell: Arc<SnapshotCell>,
    indexer: DocumentIndexer,
    retriever: HybridRetriever,
    feedback: Arc<FeedbackStore>,
    reranker: ReRanker,
    metrics: MetricsCollector,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
}

impl Engine {
    /// Build an engine on `store`, restoring its documents and replaying
    /// its feedback. Nothing is re-embedded.
    pub async fn open(
        params: EngineParams,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        params.validate()?;

        let cell = Arc::new(SnapshotCell::default());
        let indexer = DocumentIndexer::new(
            cell.clone(),
            embedder.clone(),
            store.clone(),
            params.chunking.clone(),
        );
        let feedback = Arc::new(FeedbackStore::new(params.feedback));

        let documents = indexer.restore().await?;
        check_dims(&cell.load(), embedder.as_ref())?;
        feedback.replay(store.load_feedback().await?);
        info!(
            documents,
            feedback = feedback.len(),
            model = embedder.model_name(),
            "engine ready"
        );

        Ok(Self {
            retriever: HybridRetriever::new(params.retrieval.clone()),
            reranker: ReRanker::new(feedback.clone()),
            metrics: MetricsCollector::new(params.metrics),
            params,
            cell,
            indexer,
            feedback,
            embedder,
            store,
        })
    }

    /// An engine backed by a fresh [`InMemoryStore`].
    pub async fn in_memory(params: EngineParams, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open(params, embedder, Arc::new(InMemoryStore::new())).await
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.cell.load()
    }

    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn ingest(&self, doc_id: &str, source_path: &str, raw_text: &str) -> Result<IngestResult> {
        self.indexer.ingest(doc_id, source_path, raw_text).await
    }

    pub async fn purge(&self, doc_id: &str) -> Result<bool> {
        self.indexer.purge(doc_id).await
    }

    pub async fn backfill_embeddings(&self) -> Result<usize> {
        self.indexer.backfill_embeddings().await
    }

    /// Retrieve, re-rank and return the top `k` chunks for `text`.
    ///
    /// A failing query embedding degrades the query to BM25 only instead
    /// of failing it. Every served query is recorded in the metrics window.
    pub async fn query(&self, text: &str, k: usize, opts: &QueryOptions) -> Result<QueryResponse> {
        if k == 0 {
            return Err(EngineError::Validation("k must be >= 1".into()));
        }
        if let Some(w) = &opts.weights {
            w.validate()?;
        }

        let started = Instant::now();
        let snapshot = self.cell.load();
        let fingerprint = query_fingerprint(text);

        let mut degraded = false;
        let mut embed_ms = 0.0;
        let query_vec = if snapshot.dense().vector_count() > 0 && !text.trim().is_empty() {
            let t = Instant::now();
            let result = self.embedder.embed(text).await;
            embed_ms = elapsed_ms(t);
            match result {
                Ok(v) if snapshot.dense().dims() == Some(v.len()) => Some(v),
                Ok(v) => {
                    warn!(
                        got = v.len(),
                        expected = ?snapshot.dense().dims(),
                        "query embedding has the wrong dimensionality; ranking with BM25 only"
                    );
                    degraded = true;
                    None
                }
                Err(e) => {
                    warn!(error = %e, "query embedding failed; ranking with BM25 only");
                    degraded = true;
                    None
                }
            }
        } else {
            None
        };

        let pool = k.max(self.retriever.params().rerank_depth);
        let retrieval = self.retriever.retrieve(
            &snapshot,
            text,
            query_vec.as_deref(),
            pool,
            opts.weights,
            &opts.filters,
        )?;

        let t = Instant::now();
        let mut results = self.reranker.rerank(retrieval.results);
        results.truncate(k);
        let rerank_ms = elapsed_ms(t);

        let timings = StageTimings {
            sparse_ms: retrieval.timings.sparse_ms,
            dense_ms: retrieval.timings.dense_ms + embed_ms,
            fusion_ms: retrieval.timings.fusion_ms + rerank_ms,
        };
        let total_ms = elapsed_ms(started);

        self.metrics.record(QueryMetricSample {
            fingerprint: fingerprint.clone(),
            sparse_ms: timings.sparse_ms,
            dense_ms: timings.dense_ms,
            fusion_ms: timings.fusion_ms,
            total_ms,
            top_doc_ids: results.iter().map(|r| r.doc_id.clone()).collect(),
        });
        debug!(
            fingerprint = %fingerprint,
            version = snapshot.version(),
            keyword = retrieval.keyword_candidates,
            vector = retrieval.vector_candidates,
            returned = results.len(),
            total_ms,
            "served query"
        );

        Ok(QueryResponse {
            query: text.to_string(),
            fingerprint,
            version: snapshot.version(),
            results,
            degraded,
            timings,
            total_ms,
        })
    }

    /// Record a judgment on `(query_text, doc_id)`.
    ///
    /// An unknown label fails before anything is written. The record is
    /// persisted before the bias table changes.
    pub async fn submit_feedback(&self, query_text: &str, doc_id: &str, label: &str) -> Result<FeedbackAck> {
        let record = self.feedback.prepare(query_text, doc_id, label)?;
        self.store.append_feedback(&record).await?;

        let attributed = self
            .metrics
            .observe_feedback(&record.query_fingerprint, &record.doc_id, record.label);
        let ack = FeedbackAck {
            id: record.id.clone(),
            doc_id: record.doc_id.clone(),
            label: record.label,
            bias: 0.0,
            attributed,
        };
        let bias = self.feedback.apply(record);
        Ok(FeedbackAck { bias, ..ack })
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Answer `question` from its top `k` passages.
    ///
    /// The generator's answer and citations are returned as-is.
    pub async fn answer(
        &self,
        question: &str,
        k: usize,
        generator: &dyn AnswerGenerator,
    ) -> Result<AnswerResponse> {
        let response = self.query(question, k, &QueryOptions::default()).await?;
        let passages: Vec<ContextPassage> = response.results.iter().map(ContextPassage::from).collect();
        let answer = generator.generate(question, &passages).await?;
        debug!(generator = generator.name(), passages = passages.len(), "generated answer");
        Ok(AnswerResponse { answer, passages })
    }

    pub fn stats(&self) -> IndexStats {
        let snapshot = self.cell.load();
        IndexStats {
            version: snapshot.version(),
            live_documents: snapshot.live_document_count(),
            tombstoned_documents: snapshot.tombstoned_document_count(),
            chunks: snapshot.chunk_count(),
            sparse_only_chunks: snapshot.sparse_only_count(),
            dims: snapshot.dense().dims(),
            vocabulary_size: snapshot.sparse().vocabulary_size(),
            feedback_records: self.feedback.len(),
            embedding_model: self.embedder.model_name().to_string(),
        }
    }
}

/// Refuse a provider whose vectors could never be compared with the
/// restored ones. A provider reporting `0` dims is not checked.
fn check_dims(snapshot: &IndexSnapshot, embedder: &dyn EmbeddingProvider) -> Result<()> {
    let provider = embedder.dims();
    match snapshot.dense().dims() {
        Some(index) if provider != 0 && provider != index => Err(EngineError::Config(format!(
            "embedding provider '{}' produces {provider}-dim vectors but the index holds {index}-dim vectors; \
             re-ingest with the original provider or start a new database",
            embedder.model_name()
        ))),
        _ => Ok(()),
    }
}

fn elapsed_ms(t: Instant) -> f64 {
    t.elapsed().as_secs_f64() * 1000.0
}

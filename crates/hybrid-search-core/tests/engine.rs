use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hybrid_search_core::embedding::{DisabledProvider, EmbeddingProvider, HashEmbedder};
use hybrid_search_core::error::EngineError;
use hybrid_search_core::models::{Chunk, FeedbackRecord};
use hybrid_search_core::snapshot::DocEntry;
use hybrid_search_core::engine::{Engine, EngineParams, QueryOptions};
use hybrid_search_core::feedback::FeedbackParams;
use hybrid_search_core::metrics::MetricsParams;
use hybrid_search_core::chunk::ChunkingParams;
use hybrid_search_core::store::memory::InMemoryStore;
use hybrid_search_core::store::Store;
use hybrid_search_core::text::analyze;
use hybrid_search_core::Result;

const QUERY: &str = "how does hybrid retrieval work";

/// Maps each analyzed term onto one of four hand-picked concepts.
struct ConceptEmbedder;

const CONCEPTS: [&[&str]; 4] = [
    &["vector", "embeddings"],
    &["bm25", "term"],
    &["hybrid", "combines", "both"],
    &["retrieval", "search", "ranks", "frequency"],
];

#[async_trait]
impl EmbeddingProvider for ConceptEmbedder {
    fn model_name(&self) -> &str {
        "concepts"
    }

    fn dims(&self) -> usize {
        CONCEPTS.len()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; CONCEPTS.len()];
        for term in analyze(text) {
            if let Some(i) = CONCEPTS.iter().position(|c| c.contains(&term.as_str())) {
                v[i] += 1.0;
            }
        }
        Ok(v)
    }
}

/// Counts calls to the wrapped provider.
struct Counting {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for Counting {
    fn model_name(&self) -> &str {
        "counting"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }
}

/// Sleeps a fixed time before delegating, to give queries a known latency.
struct Slow {
    inner: HashEmbedder,
    delay: Duration,
}

#[async_trait]
impl EmbeddingProvider for Slow {
    fn model_name(&self) -> &str {
        "slow"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(text).await
    }
}

/// Rejects the first document write, then behaves like the wrapped store.
struct FirstWriteFails {
    inner: InMemoryStore,
    failed: AtomicBool,
}

#[async_trait]
impl Store for FirstWriteFails {
    fn backend(&self) -> &str {
        "first-write-fails"
    }

    async fn put_document(&self, entry: &DocEntry) -> Result<()> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(EngineError::store("first-write-fails", "disk full"));
        }
        self.inner.put_document(entry).await
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: &[Option<Arc<[f32]>>],
    ) -> Result<()> {
        self.inner.replace_chunks(doc_id, chunks, vectors).await
    }

    async fn tombstone_document(&self, doc_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.inner.tombstone_document(doc_id, at).await
    }

    async fn append_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        self.inner.append_feedback(record).await
    }

    async fn load_documents(&self) -> Result<Vec<DocEntry>> {
        self.inner.load_documents().await
    }

    async fn load_feedback(&self) -> Result<Vec<FeedbackRecord>> {
        self.inner.load_feedback().await
    }
}

async fn corpus(params: EngineParams) -> Engine {
    let engine = Engine::in_memory(params, Arc::new(ConceptEmbedder)).await.unwrap();
    engine.ingest("A", "docs/a.md", "vector search uses embeddings").await.unwrap();
    engine.ingest("B", "docs/b.md", "BM25 ranks by term frequency").await.unwrap();
    engine.ingest("C", "docs/c.md", "hybrid combines both").await.unwrap();
    engine
}

fn order(results: &[hybrid_search_core::search::RankedChunk]) -> Vec<String> {
    results.iter().map(|r| r.doc_id.clone()).collect()
}

fn score_of(results: &[hybrid_search_core::search::RankedChunk], doc: &str) -> f64 {
    results.iter().find(|r| r.doc_id == doc).map(|r| r.score).unwrap()
}

#[tokio::test]
async fn test_hybrid_query_ranks_lexical_and_semantic_match_first() {
    let engine = corpus(EngineParams::default()).await;
    let r = engine.query(QUERY, 3, &QueryOptions::default()).await.unwrap();

    assert_eq!(order(&r.results), vec!["C", "B", "A"]);
    let c = &r.results[0];
    assert!((c.score - 1.0).abs() < 1e-9);
    assert_eq!(c.components.bm25, 1.0);
    assert_eq!(c.components.vector, 1.0);
    // B is a dense-only candidate: cosine 0.5 normalized between A (0.316) and C (0.707)
    let b = &r.results[1];
    assert!(b.components.raw_bm25.is_none());
    assert!((b.score - 0.7 * 0.4707).abs() < 1e-3);
    assert_eq!(r.results[2].score, 0.0);
}

#[tokio::test]
async fn test_positive_feedback_moves_document_up_in_isolation() {
    // One judgment must close the 0.33 fused gap between B and A. The default
    // rate (0.02, clipped at 0.2) moves A up but can never pass B here.
    let mut params = EngineParams::default();
    params.feedback = FeedbackParams {
        learning_rate: 0.4,
        max_bias: 0.5,
    };
    let engine = corpus(params).await;

    let before = engine.query(QUERY, 3, &QueryOptions::default()).await.unwrap();
    assert_eq!(order(&before.results), vec!["C", "B", "A"]);

    engine.submit_feedback(QUERY, "A", "positive").await.unwrap();
    let after = engine.query(QUERY, 3, &QueryOptions::default()).await.unwrap();

    assert_eq!(order(&after.results), vec!["C", "A", "B"]);
    assert_eq!(score_of(&after.results, "B"), score_of(&before.results, "B"));
    assert_eq!(score_of(&after.results, "C"), score_of(&before.results, "C"));
    assert!((score_of(&after.results, "A") - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn test_bias_monotonicity_with_default_rate() {
    let engine = corpus(EngineParams::default()).await;
    let before = engine.query(QUERY, 3, &QueryOptions::default()).await.unwrap();
    engine.submit_feedback(QUERY, "B", "positive").await.unwrap();
    let after = engine.query(QUERY, 3, &QueryOptions::default()).await.unwrap();

    assert!(score_of(&after.results, "B") > score_of(&before.results, "B"));
    assert_eq!(score_of(&after.results, "A"), score_of(&before.results, "A"));
    assert_eq!(score_of(&after.results, "C"), score_of(&before.results, "C"));
}

#[tokio::test]
async fn test_fusion_is_deterministic() {
    let engine = corpus(EngineParams::default()).await;
    let first = engine.query("search ranks", 3, &QueryOptions::default()).await.unwrap();
    for _ in 0..20 {
        let again = engine.query("search ranks", 3, &QueryOptions::default()).await.unwrap();
        assert_eq!(order(&again.results), order(&first.results));
        for (a, b) in again.results.iter().zip(first.results.iter()) {
            assert_eq!(a.score, b.score);
        }
    }
}

#[tokio::test]
async fn test_normalized_components_bounded() {
    let engine = corpus(EngineParams::default()).await;
    for q in ["vector search", "term frequency ranks", "hybrid", QUERY] {
        let r = engine.query(q, 10, &QueryOptions::default()).await.unwrap();
        for c in &r.results {
            assert!((0.0..=1.0).contains(&c.components.bm25), "{q}: {:?}", c.components);
            assert!((0.0..=1.0).contains(&c.components.vector), "{q}: {:?}", c.components);
        }
        let keyword: Vec<f64> = r
            .results
            .iter()
            .filter(|c| c.components.raw_bm25.is_some())
            .map(|c| c.components.bm25)
            .collect();
        if !keyword.is_empty() {
            assert!(keyword.iter().any(|s| *s == 1.0), "{q}: no max keyword score");
        }
    }
}

#[tokio::test]
async fn test_weight_override() {
    let engine = corpus(EngineParams::default()).await;
    let opts = QueryOptions {
        weights: Some(hybrid_search_core::search::FusionWeights { bm25: 1.0, vector: 0.0 }),
        ..QueryOptions::default()
    };
    let r = engine.query("term frequency", 3, &opts).await.unwrap();
    assert_eq!(r.results[0].doc_id, "B");
    assert!((r.results[0].score - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_idempotent_and_changed_ingest() {
    let engine = corpus(EngineParams::default()).await;
    let chunks = engine.stats().chunks;

    let again = engine.ingest("A", "docs/a.md", "vector search uses embeddings").await.unwrap();
    assert!(again.skipped);
    assert_eq!(engine.stats().chunks, chunks);

    let changed = engine
        .ingest("A", "docs/a.md", "vector search uses embeddings and much more text")
        .await
        .unwrap();
    assert!(!changed.skipped);
    assert_eq!(changed.chunks_added, 1);
    let r = engine.query("much more", 3, &QueryOptions::default()).await.unwrap();
    assert_eq!(r.results[0].doc_id, "A");
}

#[tokio::test]
async fn test_purge_keeps_bias_for_reingest() {
    let engine = corpus(EngineParams::default()).await;
    engine.submit_feedback(QUERY, "C", "positive").await.unwrap();
    assert!(engine.purge("C").await.unwrap());

    let r = engine.query(QUERY, 3, &QueryOptions::default()).await.unwrap();
    assert!(r.results.iter().all(|c| c.doc_id != "C"));

    engine.ingest("C", "docs/c.md", "hybrid combines both").await.unwrap();
    let r = engine.query(QUERY, 3, &QueryOptions::default()).await.unwrap();
    assert_eq!(r.results[0].doc_id, "C");
    assert!((r.results[0].components.bias - 0.02).abs() < 1e-12);
}

#[tokio::test]
async fn test_hit_rate_counts_only_judged_queries() {
    let mut params = EngineParams::default();
    params.metrics = MetricsParams {
        hit_rate_k: 3,
        ..MetricsParams::default()
    };
    let engine = corpus(params).await;

    for i in 0..10 {
        let r = engine
            .query(&format!("vector q{i}"), 3, &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(r.results[0].doc_id, "A");
    }
    for i in 0..4 {
        let ack = engine
            .submit_feedback(&format!("vector q{i}"), "A", "positive")
            .await
            .unwrap();
        assert!(ack.attributed);
    }

    let m = engine.get_metrics();
    assert_eq!(m.sample_count, 10);
    assert_eq!(m.judged_count, 4);
    assert_eq!(m.hit_rate_at_k, Some(1.0));
    assert_eq!(m.k, 3);
    assert!(m.p95_ms >= m.p50_ms);
}

#[tokio::test]
async fn test_restart_restores_index_and_bias_without_reembedding() {
    let store = Arc::new(InMemoryStore::new());
    let first = Engine::open(EngineParams::default(), Arc::new(ConceptEmbedder), store.clone())
        .await
        .unwrap();
    first.ingest("A", "docs/a.md", "vector search uses embeddings").await.unwrap();
    first.ingest("B", "docs/b.md", "BM25 ranks by term frequency").await.unwrap();
    first.ingest("C", "docs/c.md", "hybrid combines both").await.unwrap();
    first.submit_feedback(QUERY, "B", "positive").await.unwrap();
    first.submit_feedback(QUERY, "A", "negative").await.unwrap();
    let expected = first.query(QUERY, 3, &QueryOptions::default()).await.unwrap();

    let counting = Arc::new(Counting {
        inner: HashEmbedder::new(4),
        calls: AtomicUsize::new(0),
    });
    let second = Engine::open(EngineParams::default(), counting.clone(), store.clone())
        .await
        .unwrap();
    assert_eq!(counting.calls.load(Ordering::SeqCst), 0);

    let stats = second.stats();
    assert_eq!(stats.live_documents, 3);
    assert_eq!(stats.chunks, 3);
    assert_eq!(stats.feedback_records, 2);
    assert_eq!(second.feedback().biases(), first.feedback().biases());
    assert_eq!(store.load_feedback().await.unwrap().len(), 2);

    // same snapshot content and bias table, so BM25 and bias agree exactly
    let keyword_only = QueryOptions {
        weights: Some(hybrid_search_core::search::FusionWeights { bm25: 1.0, vector: 0.0 }),
        ..QueryOptions::default()
    };
    let a = first.query("term frequency", 3, &keyword_only).await.unwrap();
    let b = second.query("term frequency", 3, &keyword_only).await.unwrap();
    assert_eq!(order(&a.results), order(&b.results));
    assert_eq!(a.results[0].score, b.results[0].score);
    assert!(!expected.results.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queries_never_see_partial_documents() {
    const CHUNKS_PER_DOC: usize = 5;
    let params = EngineParams {
        chunking: ChunkingParams {
            max_tokens: 8,
            overlap_tokens: 0,
            min_tokens: 1,
        },
        ..EngineParams::default()
    };
    let engine = Arc::new(Engine::in_memory(params, Arc::new(HashEmbedder::new(32))).await.unwrap());
    let text = vec!["needle"; 8 * CHUNKS_PER_DOC].join(" ");

    let writer = {
        let engine = engine.clone();
        let text = text.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                engine.ingest(&format!("doc-{i:02}"), "gen.txt", &text).await.unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut last_version = 0;
                for _ in 0..50 {
                    let r = engine.query("needle", 1000, &QueryOptions::default()).await.unwrap();
                    assert!(r.version >= last_version);
                    last_version = r.version;
                    let mut per_doc: HashMap<String, usize> = HashMap::new();
                    for c in &r.results {
                        *per_doc.entry(c.doc_id.clone()).or_default() += 1;
                    }
                    assert_eq!(per_doc.len() as u64, r.version);
                    assert!(per_doc.values().all(|n| *n == CHUNKS_PER_DOC), "{per_doc:?}");
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
    assert_eq!(engine.stats().chunks, 20 * CHUNKS_PER_DOC);
    assert_eq!(engine.snapshot().version(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_feedback_on_one_document() {
    let mut params = EngineParams::default();
    params.feedback = FeedbackParams {
        learning_rate: 0.001,
        max_bias: 10.0,
    };
    let engine = Arc::new(corpus(params).await);

    let tasks: Vec<_> = (0..8)
        .map(|t| {
            let engine = engine.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    engine
                        .submit_feedback(&format!("q {t} {i}"), "A", "positive")
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }

    assert!((engine.feedback().bias("A") - 0.4).abs() < 1e-9);
    assert_eq!(engine.feedback().bias("B"), 0.0);
    assert_eq!(engine.store().load_feedback().await.unwrap().len(), 400);
}

#[tokio::test]
async fn test_failed_store_write_does_not_hide_document_after_restart() {
    let store = Arc::new(FirstWriteFails {
        inner: InMemoryStore::new(),
        failed: AtomicBool::new(false),
    });
    let first = Engine::open(EngineParams::default(), Arc::new(ConceptEmbedder), store.clone())
        .await
        .unwrap();
    let err = first
        .ingest("B", "docs/b.md", "BM25 ranks by term frequency")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "store");
    assert!(first.snapshot().document("B").is_none());

    let second = Engine::open(EngineParams::default(), Arc::new(ConceptEmbedder), store.clone())
        .await
        .unwrap();
    assert_eq!(second.stats().live_documents, 0);

    let retry = second
        .ingest("B", "docs/b.md", "BM25 ranks by term frequency")
        .await
        .unwrap();
    assert!(!retry.skipped);
    assert_eq!(retry.chunks_added, 1);

    let r = second.query("term frequency", 3, &QueryOptions::default()).await.unwrap();
    assert_eq!(order(&r.results), vec!["B"]);

    let third = Engine::open(EngineParams::default(), Arc::new(ConceptEmbedder), store)
        .await
        .unwrap();
    assert_eq!(third.stats().chunks, 1);
}

#[tokio::test]
async fn test_reopen_with_different_dims_is_refused() {
    let store = Arc::new(InMemoryStore::new());
    let first = Engine::open(EngineParams::default(), Arc::new(HashEmbedder::new(16)), store.clone())
        .await
        .unwrap();
    first.ingest("A", "docs/a.md", "vector search uses embeddings").await.unwrap();

    let err = Engine::open(EngineParams::default(), Arc::new(HashEmbedder::new(32)), store.clone())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), "config");
    assert!(err.to_string().contains("16"), "{err}");

    // a disabled provider reports no dims and keeps serving BM25
    let sparse = Engine::open(EngineParams::default(), Arc::new(DisabledProvider), store.clone())
        .await
        .unwrap();
    let r = sparse.query("vector search", 3, &QueryOptions::default()).await.unwrap();
    assert!(r.degraded);
    assert_eq!(order(&r.results), vec!["A"]);

    let same = Engine::open(EngineParams::default(), Arc::new(HashEmbedder::new(16)), store)
        .await
        .unwrap();
    let r = same.query("vector search", 3, &QueryOptions::default()).await.unwrap();
    assert!(!r.degraded);
    assert!(r.results[0].components.raw_vector.is_some());
}

#[tokio::test]
async fn test_latency_percentiles_track_embedding_delay() {
    const DELAY_MS: f64 = 25.0;
    let engine = Engine::in_memory(
        EngineParams::default(),
        Arc::new(Slow {
            inner: HashEmbedder::new(16),
            delay: Duration::from_millis(DELAY_MS as u64),
        }),
    )
    .await
    .unwrap();
    engine.ingest("A", "docs/a.md", "vector search uses embeddings").await.unwrap();

    for _ in 0..20 {
        engine.query("vector search", 3, &QueryOptions::default()).await.unwrap();
    }

    let m = engine.get_metrics();
    assert_eq!(m.sample_count, 20);
    assert!(m.p50_ms >= DELAY_MS, "p50 {}", m.p50_ms);
    assert!(m.p95_ms >= m.p50_ms);
    // everything but the sleep is sub-millisecond on a 1-chunk index
    assert!(m.p50_ms < DELAY_MS + 100.0, "p50 {}", m.p50_ms);
    assert!(m.p95_ms < DELAY_MS + 200.0, "p95 {}", m.p95_ms);
    assert!(m.avg_dense_ms >= DELAY_MS);
    assert!(m.avg_sparse_ms < m.avg_dense_ms);
}

//! JSON HTTP server.
//!
//! Exposes the engine over HTTP for local tools and agents.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Index or re-index one document |
//! | `DELETE` | `/documents/{id}` | Purge a document |
//! | `POST` | `/query` | Hybrid query with feedback re-ranking |
//! | `POST` | `/feedback` | Record a positive/negative judgment |
//! | `POST` | `/answer` | Query, then generate an answer from the passages |
//! | `GET`  | `/metrics` | Latency percentiles and hit rate |
//! | `GET`  | `/stats` | Index statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "k must be >= 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `answer_disabled` (400), `not_found` (404),
//! `timeout` (408), `corrupt_index` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use hybrid_search_core::answer::AnswerGenerator;
use hybrid_search_core::engine::{AnswerResponse, FeedbackAck, IndexStats};
use hybrid_search_core::metrics::MetricsSnapshot;
use hybrid_search_core::models::IngestResult;
use hybrid_search_core::search::RetrieveFilters;
use hybrid_search_core::{Engine, EngineError, QueryOptions, QueryResponse};

use crate::answer::create_generator;
use crate::app::{open_engine, weight_override};
use crate::config::Config;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub generator: Option<Arc<dyn AnswerGenerator>>,
    pub query_timeout: Duration,
    /// Passages handed to the answer generator when a request gives no `k`.
    pub answer_k: usize,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, generator: Option<Arc<dyn AnswerGenerator>>, config: &Config) -> Self {
        Self {
            engine,
            generator,
            query_timeout: Duration::from_millis(config.server.query_timeout_ms),
            answer_k: config.answer.context_k,
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(open_engine(config).await?);
    let generator = create_generator(&config.answer)?;
    let state = AppState::new(engine, generator, config);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("hsx server listening on http://{}", config.server.bind);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/documents/{id}", delete(handle_purge))
        .route("/query", post(handle_query))
        .route("/feedback", post(handle_feedback))
        .route("/answer", post(handle_answer))
        .route("/metrics", get(handle_metrics))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn timeout_error(message: impl Into<String>) -> AppError {
    app_error(StatusCode::REQUEST_TIMEOUT, "timeout", message)
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::Validation(_) | EngineError::Config(_) => bad_request(message),
            EngineError::SnapshotCorruption(_) => {
                error!(error = %message, "index corruption surfaced to client");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_index", message)
            }
            EngineError::Embedding { .. } | EngineError::Store { .. } | EngineError::Answer { .. } => {
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

/// Run `fut` under the configured query timeout.
async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T, EngineError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(timeout_error(format!(
            "query timed out after {} ms",
            limit.as_millis()
        ))),
    }
}

// ============ POST /ingest ============

#[derive(Deserialize)]
pub struct IngestRequest {
    pub doc_id: String,
    /// Defaults to `doc_id`.
    #[serde(default)]
    pub source_path: Option<String>,
    pub text: String,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResult>, AppError> {
    let source_path = req.source_path.as_deref().unwrap_or(&req.doc_id);
    let result = state.engine.ingest(&req.doc_id, source_path, &req.text).await?;
    Ok(Json(result))
}

// ============ DELETE /documents/{id} ============

#[derive(Serialize)]
struct PurgeResponse {
    doc_id: String,
    purged: bool,
    version: u64,
}

async fn handle_purge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PurgeResponse>, AppError> {
    if !state.engine.purge(&id).await? {
        return Err(not_found(format!("no live document with id: {id}")));
    }
    Ok(Json(PurgeResponse {
        doc_id: id,
        purged: true,
        version: state.engine.snapshot().version(),
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub bm25_weight: Option<f64>,
    #[serde(default)]
    pub vector_weight: Option<f64>,
    #[serde(default)]
    pub filters: RetrieveFilters,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let params = &state.engine.params().retrieval;
    let k = req.k.unwrap_or(params.final_limit);
    let opts = QueryOptions {
        weights: weight_override(params.weights, req.bm25_weight, req.vector_weight),
        filters: req.filters,
    };

    let response = with_timeout(state.query_timeout, state.engine.query(&req.query, k, &opts)).await?;
    Ok(Json(response))
}

// ============ POST /feedback ============

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub query: String,
    pub doc_id: String,
    pub label: String,
}

async fn handle_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackAck>, AppError> {
    let ack = state
        .engine
        .submit_feedback(&req.query, &req.doc_id, &req.label)
        .await?;
    Ok(Json(ack))
}

// ============ POST /answer ============

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default)]
    pub k: Option<usize>,
}

async fn handle_answer(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    let generator = state.generator.clone().ok_or_else(|| {
        app_error(
            StatusCode::BAD_REQUEST,
            "answer_disabled",
            "no answer generator configured ([answer].provider = \"disabled\")",
        )
    })?;
    let k = req.k.unwrap_or(state.answer_k);
    // The timeout covers retrieval only; generation may legitimately take longer.
    let response = state.engine.answer(&req.question, k, generator.as_ref()).await?;
    Ok(Json(response))
}

// ============ GET /metrics, /stats, /health ============

async fn handle_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.engine.get_metrics())
}

async fn handle_stats(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.engine.stats())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

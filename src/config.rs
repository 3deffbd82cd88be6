use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use hybrid_search_core::chunk::ChunkingParams;
use hybrid_search_core::engine::EngineParams;
use hybrid_search_core::feedback::FeedbackParams;
use hybrid_search_core::metrics::MetricsParams;
use hybrid_search_core::search::{FusionWeights, RetrievalParams};
use hybrid_search_core::sparse::Bm25Params;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub source: Option<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            min_tokens: default_min_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    900
}
fn default_overlap() -> usize {
    120
}
fn default_min_tokens() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_rerank_depth")]
    pub rerank_depth: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_weight: default_bm25_weight(),
            vector_weight: default_vector_weight(),
            k1: default_k1(),
            b: default_b(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            rerank_depth: default_rerank_depth(),
        }
    }
}

fn default_bm25_weight() -> f64 {
    0.3
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_k1() -> f64 {
    1.5
}
fn default_b() -> f64 {
    0.75
}
fn default_candidate_k() -> usize {
    100
}
fn default_final_limit() -> usize {
    10
}
fn default_rerank_depth() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_bias")]
    pub max_bias: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            max_bias: default_max_bias(),
        }
    }
}

fn default_learning_rate() -> f64 {
    0.02
}
fn default_max_bias() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default = "default_hit_rate_k")]
    pub hit_rate_k: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_secs: None,
            hit_rate_k: default_hit_rate_k(),
        }
    }
}

fn default_window_size() -> usize {
    1000
}
fn default_hit_rate_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_answer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_context_k")]
    pub context_k: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_answer_timeout_secs(),
            context_k: default_context_k(),
        }
    }
}

fn default_answer_timeout_secs() -> u64 {
    60
}
fn default_context_k() -> usize {
    5
}

impl AnswerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_query_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

impl Config {
    /// Core engine parameters derived from this config.
    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            chunking: ChunkingParams {
                max_tokens: self.chunking.max_tokens,
                overlap_tokens: self.chunking.overlap_tokens,
                min_tokens: self.chunking.min_tokens,
            },
            retrieval: RetrievalParams {
                weights: FusionWeights {
                    bm25: self.retrieval.bm25_weight,
                    vector: self.retrieval.vector_weight,
                },
                bm25: Bm25Params {
                    k1: self.retrieval.k1,
                    b: self.retrieval.b,
                },
                candidate_k_keyword: self.retrieval.candidate_k_keyword,
                candidate_k_vector: self.retrieval.candidate_k_vector,
                final_limit: self.retrieval.final_limit,
                rerank_depth: self.retrieval.rerank_depth,
            },
            feedback: FeedbackParams {
                learning_rate: self.feedback.learning_rate,
                max_bias: self.feedback.max_bias,
            },
            metrics: MetricsParams {
                window_size: self.metrics.window_size,
                window_secs: self.metrics.window_secs,
                hit_rate_k: self.metrics.hit_rate_k,
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking, retrieval, feedback and metrics ranges
    config
        .engine_params()
        .validate()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider == "openai" && config.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'openai'");
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    // Validate answer generator
    match config.answer.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.answer.model.is_none() {
                bail!("answer.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown answer provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.answer.context_k == 0 {
        bail!("answer.context_k must be >= 1");
    }

    if config.server.query_timeout_ms == 0 {
        bail!("server.query_timeout_ms must be > 0");
    }

    Ok(())
}

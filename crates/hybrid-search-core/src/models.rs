//! Core data models shared by the indexer, retriever, feedback store and
//! metrics collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Identifier of a chunk: its parent document plus its position.
///
/// Ordering is `(doc_id, index)`, which is the deterministic tie-break used
/// everywhere results are sorted. Rendered as `"<doc_id>#<index>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChunkId {
    pub doc_id: String,
    pub index: u32,
}

impl ChunkId {
    pub fn new(doc_id: impl Into<String>, index: u32) -> Self {
        Self {
            doc_id: doc_id.into(),
            index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.doc_id, self.index)
    }
}

impl FromStr for ChunkId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (doc_id, index) = s
            .rsplit_once('#')
            .ok_or_else(|| EngineError::Validation(format!("malformed chunk id: {s}")))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| EngineError::Validation(format!("malformed chunk index in: {s}")))?;
        Ok(Self::new(doc_id, index))
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ChunkId {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One ingested source document.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub source_path: String,
    /// SHA-256 (hex) of the raw text. Identical hash ⇒ re-ingest is a no-op.
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    /// Set when the document was purged. Tombstoned documents contribute no
    /// chunks to either index.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// A token window of a document's text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub token_count: usize,
    /// SHA-256 (hex) of `text`.
    pub hash: String,
}

/// A user judgment on a (query, document) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLabel {
    Positive,
    Negative,
}

impl FeedbackLabel {
    /// Direction of the bias update: `+1` for positive, `-1` for negative.
    pub fn delta(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for FeedbackLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackLabel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            other => Err(EngineError::Validation(format!(
                "unknown feedback label '{other}': expected positive or negative"
            ))),
        }
    }
}

/// Append-only audit record of one feedback submission.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub query_fingerprint: String,
    pub query_text: String,
    pub doc_id: String,
    pub label: FeedbackLabel,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`Engine::ingest`](crate::engine::Engine::ingest).
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub doc_id: String,
    /// Chunks written into the published snapshot (0 when skipped).
    pub chunks_added: usize,
    /// `true` when the content was unchanged or empty; nothing was written.
    pub skipped: bool,
    /// Chunks whose embedding failed and that are only BM25-indexed.
    pub sparse_only: usize,
    /// Snapshot version visible after this call.
    pub version: u64,
}

//! Overlapping token-window chunker.
//!
//! Splits document text into [`Chunk`]s of at most `max_tokens`
//! whitespace-delimited tokens, with `overlap_tokens` tokens shared between
//! consecutive chunks. Chunk text is a verbatim slice of the source text, so
//! original spacing and line breaks survive.
//!
//! Each chunk receives a deterministic [`ChunkId`] derived from its document
//! ID and index, plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Locate the byte span of every whitespace-delimited token.
//! 2. If the document has at most `max_tokens` tokens, emit one chunk.
//! 3. Otherwise emit windows `[start, start + max_tokens)` advancing by
//!    `stride = max_tokens - overlap_tokens`.
//! 4. If the window after the current one would hold fewer than
//!    `min_tokens` tokens, pull its start back so it holds `min_tokens`
//!    (the last window then overlaps its predecessor by more than
//!    `overlap_tokens`).
//! 5. Empty or whitespace-only text yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use hybrid_search_core::chunk::{chunk_text, ChunkingParams};
//!
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", &ChunkingParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! assert_eq!(chunks[0].token_count, 4);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::{Chunk, ChunkId};
use crate::text::sha256_hex;

/// Chunk window parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingParams {
    /// Target (and maximum) tokens per chunk.
    pub max_tokens: usize,
    /// Tokens shared between consecutive chunks.
    pub overlap_tokens: usize,
    /// Minimum tokens of any chunk in a multi-chunk document.
    pub min_tokens: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            max_tokens: 900,
            overlap_tokens: 120,
            min_tokens: 32,
        }
    }
}

impl ChunkingParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(EngineError::Config("max_tokens must be > 0".into()));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(EngineError::Config(format!(
                "overlap_tokens ({}) must be less than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        if self.min_tokens > self.max_tokens {
            return Err(EngineError::Config(format!(
                "min_tokens ({}) must not exceed max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Split text into overlapping token windows.
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Every chunk has at most `max_tokens` tokens.
/// - In a multi-chunk document every chunk has at least `min_tokens` tokens.
/// - Deterministic: the same input always produces the same chunks and IDs.
pub fn chunk_text(doc_id: &str, text: &str, params: &ChunkingParams) -> Vec<Chunk> {
    let spans = token_spans(text);
    let n = spans.len();
    if n == 0 {
        return Vec::new();
    }

    let max = params.max_tokens.max(1);
    let stride = max.saturating_sub(params.overlap_tokens).max(1);
    let min = params.min_tokens.min(max);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max).min(n);
        let byte_range = spans[start].0..spans[end - 1].1;
        chunks.push(make_chunk(
            doc_id,
            chunks.len() as u32,
            &text[byte_range],
            end - start,
        ));
        if end == n {
            break;
        }

        let mut next = start + stride;
        if n - next < min {
            next = n.saturating_sub(min).max(start + 1);
        }
        start = next;
    }

    chunks
}

/// Number of whitespace-delimited tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Byte spans `(start, end)` of every whitespace-delimited token.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut token_start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = token_start.take() {
                spans.push((s, i));
            }
        } else if token_start.is_none() {
            token_start = Some(i);
        }
    }
    if let Some(s) = token_start {
        spans.push((s, text.len()));
    }
    spans
}

/// Create a single [`Chunk`] with a deterministic ID and SHA-256 content hash.
fn make_chunk(doc_id: &str, index: u32, text: &str, token_count: usize) -> Chunk {
    Chunk {
        id: ChunkId::new(doc_id, index),
        doc_id: doc_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        token_count,
        hash: sha256_hex(text.as_bytes()),
    }
}

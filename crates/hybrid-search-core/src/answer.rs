//! Answer-generator interface.
//!
//! The engine hands a generator the final re-ranked passages and returns
//! whatever it produces. Answers and citations are passed through without
//! validation. Concrete generators (e.g. an OpenAI-compatible chat model)
//! live in the app crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::search::RankedChunk;

/// One passage of context handed to a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPassage {
    pub chunk_text: String,
    pub source_file: String,
    pub score: f64,
}

impl From<&RankedChunk> for ContextPassage {
    fn from(r: &RankedChunk) -> Self {
        Self {
            chunk_text: r.text.clone(),
            source_file: r.source_path.clone(),
            score: r.score,
        }
    }
}

/// A span of a passage the answer cites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedSpan {
    pub source_file: String,
    pub quote: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub answer_text: String,
    #[serde(default)]
    pub cited_spans: Vec<CitedSpan>,
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Generator identifier used in errors and logs.
    fn name(&self) -> &str;

    async fn generate(&self, question: &str, passages: &[ContextPassage]) -> Result<GeneratedAnswer>;
}

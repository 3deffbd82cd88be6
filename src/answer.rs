//! OpenAI-compatible chat answer generator.
//!
//! Sends the question and the re-ranked passages to `/chat/completions` and
//! asks for a JSON object `{answer_text, cited_spans}`. Whatever comes back
//! is returned as-is; when the model ignores the JSON instruction the raw
//! message becomes the answer with no citations.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use hybrid_search_core::answer::{AnswerGenerator, ContextPassage, GeneratedAnswer};
use hybrid_search_core::error::EngineError;

use crate::config::AnswerConfig;
use crate::openai::OpenAIClient;

const SYSTEM_PROMPT: &str = "Answer the question using only the numbered passages. \
Reply with a JSON object {\"answer_text\": string, \"cited_spans\": \
[{\"source_file\": string, \"quote\": string}]} where each quote is copied verbatim \
from a passage.";

pub struct OpenAIAnswerGenerator {
    client: OpenAIClient,
    model: String,
}

impl OpenAIAnswerGenerator {
    pub fn new(config: &AnswerConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("answer.model required for OpenAI provider"))?;
        Ok(Self {
            client: OpenAIClient::from_env(config.timeout_secs, config.max_retries)?,
            model,
        })
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        EngineError::Answer {
            generator: format!("openai:{}", self.model),
            message: message.into(),
        }
    }
}

/// Render passages as the user message.
pub fn build_prompt(question: &str, passages: &[ContextPassage]) -> String {
    let mut prompt = String::new();
    for (i, p) in passages.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] ({}, score {:.3})\n{}\n\n",
            i + 1,
            p.source_file,
            p.score,
            p.chunk_text
        ));
    }
    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt
}

/// Turn the assistant message into a [`GeneratedAnswer`].
pub fn parse_answer(content: &str) -> GeneratedAnswer {
    serde_json::from_str::<GeneratedAnswer>(content.trim()).unwrap_or_else(|_| GeneratedAnswer {
        answer_text: content.to_string(),
        cited_spans: Vec::new(),
    })
}

#[async_trait]
impl AnswerGenerator for OpenAIAnswerGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        question: &str,
        passages: &[ContextPassage],
    ) -> Result<GeneratedAnswer, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(question, passages) },
            ],
        });

        let json = self
            .client
            .post_json("chat/completions", &body)
            .await
            .map_err(|e| self.error(e))?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| self.error("response has no message content"))?;

        Ok(parse_answer(content))
    }
}

/// The configured generator, or `None` when `[answer].provider = "disabled"`.
pub fn create_generator(config: &AnswerConfig) -> Result<Option<Arc<dyn AnswerGenerator>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIAnswerGenerator::new(config)?))),
        other => bail!("Unknown answer provider: {}", other),
    }
}

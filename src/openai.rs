//! Shared HTTP plumbing for OpenAI-compatible APIs.

use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for one OpenAI-compatible endpoint.
///
/// Reads `OPENAI_API_KEY`, and `OPENAI_BASE_URL` when set.
pub struct OpenAIClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAIClient {
    pub fn from_env(timeout_secs: u64, max_retries: u32) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            max_retries,
        })
    }

    /// POST `body` to `{base_url}/{path}` and return the JSON response.
    ///
    /// - HTTP 429 (rate limited) and 5xx (server error) → retry
    /// - HTTP 4xx (client error, not 429) → fail immediately
    /// - Network errors → retry
    /// - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, %url, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(|e| e.to_string());
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error; retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("API error {status}: {body_text}"));
                        continue;
                    }

                    return Err(format!("API error {status}: {body_text}"));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "request failed after retries".to_string()))
    }
}

use std::time::Duration;

use anyhow::Context;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

pub const TEMPERATURE: f64 = 0.6;
pub const MAX_TOKENS: u32 = 500;

#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("upstream response is not JSON: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Any of `choices`, the first choice, or its message may be null or absent.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Option<Vec<Option<Choice>>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Minimal client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatClient {
    http: Client,
    base_url: String,
    model: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ChatClient {
    pub fn new(cfg: &GroqConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("clinic-kpis/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            max_retries: cfg.max_retries,
            retry_backoff: cfg.retry_backoff,
        })
    }

    /// Returns the first choice's message content, if any.
    pub async fn complete(
        &self,
        api_key: &str,
        messages: &[ChatMessage<'_>],
    ) -> Result<Option<String>, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let attempts = self.max_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let last = attempt == attempts;
            let response = self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await;

            let resp = match response {
                Ok(resp) => resp,
                Err(err) => {
                    if last {
                        return Err(ChatError::Transport(err));
                    }
                    tracing::warn!(
                        "chat completion attempt {attempt}/{attempts} failed: {err}; retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
            };

            let status = resp.status();
            if status.is_success() {
                let parsed: ChatResponse = resp.json().await.map_err(ChatError::Decode)?;
                return Ok(parsed
                    .choices
                    .and_then(|choices| choices.into_iter().next())
                    .flatten()
                    .and_then(|c| c.message)
                    .and_then(|m| m.content));
            }

            let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER));
            let body = resp.text().await.unwrap_or_default();
            if is_retryable_status(status) && !last {
                tracing::warn!(
                    "chat completion attempt {attempt}/{attempts} got {status}; retrying. Body: {}",
                    truncate_for_log(&body)
                );
                tokio::time::sleep(retry_after.unwrap_or(self.retry_backoff)).await;
                continue;
            }
            return Err(ChatError::Status { status, body });
        }

        unreachable!("at least one attempt is always made")
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    let value = value?.to_str().ok()?.trim();
    let secs = value.parse::<u64>().ok()?;
    // Capped at 30s.
    Some(Duration::from_secs(secs.min(30)))
}

pub fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    let max_len = 300usize;
    match trimmed.char_indices().nth(max_len) {
        None => trimmed.to_string(),
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
    }
}

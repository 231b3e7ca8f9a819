//! Turns a KPI mapping into one plain-language sentence per metric.
//!
//! Formatting noise from the model (code fences, invalid JSON, non-string values) never
//! becomes an error: the caller gets fewer sentences, possibly none.

use std::sync::LazyLock;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::groq::{ChatClient, ChatError, ChatMessage, GroqConfig, truncate_for_log};

const SYSTEM_PROMPT: &str = "You are a clear, concise healthcare revenue analytics assistant.";

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)```json").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("KPIs are required")]
    BadRequest,
    #[error("Groq API key not configured")]
    NotConfigured,
    #[error("Groq API failed")]
    UpstreamFailed(#[source] ChatError),
    #[error("Failed to interpret KPIs")]
    Internal(#[source] anyhow::Error),
}

impl InterpretError {
    pub fn status(&self) -> StatusCode {
        match self {
            InterpretError::BadRequest => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for InterpretError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct BulletsResponse {
    pub bullets: Vec<String>,
}

pub struct Interpreter {
    api_key: Option<String>,
    client: ChatClient,
}

impl Interpreter {
    pub fn new(cfg: &GroqConfig) -> anyhow::Result<Self> {
        Ok(Self {
            api_key: cfg.api_key.clone(),
            client: ChatClient::new(cfg)?,
        })
    }

    /// Handles a raw `{"kpis": {...}}` request body.
    pub async fn interpret_body(&self, body: &[u8]) -> Result<Vec<String>, InterpretError> {
        let req: Value = serde_json::from_slice(body).map_err(|e| {
            InterpretError::Internal(anyhow::Error::new(e).context("parse request body"))
        })?;
        let Some(kpis) = req.get("kpis").and_then(Value::as_object) else {
            return Err(InterpretError::BadRequest);
        };
        let received = Value::Object(kpis.clone());
        tracing::info!("Received KPIs: {received}");
        self.interpret(kpis).await
    }

    pub async fn interpret(
        &self,
        kpis: &Map<String, Value>,
    ) -> Result<Vec<String>, InterpretError> {
        let api_key = self.api_key.as_deref().ok_or(InterpretError::NotConfigured)?;

        let prompt = build_prompt(kpis).map_err(InterpretError::Internal)?;
        let messages = [
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: &prompt,
            },
        ];

        let content = match self.client.complete(api_key, &messages).await {
            Ok(c) => c,
            Err(ChatError::Decode(e)) => {
                return Err(InterpretError::Internal(
                    anyhow::Error::new(e).context("decode chat completion"),
                ));
            }
            Err(e) => {
                tracing::error!("Groq API error: {}", truncate_for_log(&e.to_string()));
                return Err(InterpretError::UpstreamFailed(e));
            }
        };

        let text = content.as_deref().map(str::trim).unwrap_or("");
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(extract_bullets(&clean_reply(text)))
    }
}

pub fn build_prompt(kpis: &Map<String, Value>) -> anyhow::Result<String> {
    let metrics = serde_json::to_string_pretty(kpis)?;
    let prompt = format!(
        r#"
You are a healthcare revenue cycle analytics assistant.

You are given clinic metrics consisting of:
- Volume metrics that describe scale
- Normalized KPIs that describe efficiency or timing

For EACH metric, explain what the VALUE MEANS in practical terms.

Metrics (JSON):
```json
{metrics}
```

Instructions:
- Write EXACTLY one sentence per metric.
- Each sentence must:
  1. Reference the metric value
  2. Explain what that value indicates or implies
- Do NOT repeat the raw number without interpretation.
- Do NOT combine multiple metrics into one sentence.
- Do NOT use judgmental language.
- Focus on operational or financial meaning.

Metrics to interpret (use these exact keys):

Volume metrics:
- totalClaims
- totalBilled
- totalPaid

Normalized KPIs:
- collectionRate
- revenuePerClaim
- patientResponsibilityPct
- insuranceCollectionPct
- avgPaymentDays

Return STRICT JSON only in this format:
{{
  "interpretation": {{
    "totalClaims": "...",
    "totalBilled": "...",
    "totalPaid": "...",
    "collectionRate": "...",
    "revenuePerClaim": "...",
    "patientResponsibilityPct": "...",
    "insuranceCollectionPct": "...",
    "avgPaymentDays": "..."
  }}
}}
"#
    );
    Ok(prompt.trim().to_string())
}

/// Strips markdown code fences around the model's JSON.
pub fn clean_reply(text: &str) -> String {
    JSON_FENCE.replace_all(text, "").replace("```", "").trim().to_string()
}

/// String values under `interpretation`, in the order the model wrote them.
/// An array under `interpretation` is read the same way as an object's values.
pub fn extract_bullets(cleaned: &str) -> Vec<String> {
    let parsed: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("{e}: Invalid JSON from Groq: {}", truncate_for_log(cleaned));
            return Vec::new();
        }
    };

    let values: Vec<&Value> = match parsed.get("interpretation") {
        Some(Value::Object(map)) => map.values().collect(),
        Some(Value::Array(items)) => items.iter().collect(),
        _ => return Vec::new(),
    };
    values
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

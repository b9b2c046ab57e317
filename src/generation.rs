//! Structured generation on top of a free-form text model.
//!
//! The model is asked for a bare JSON value, but in practice it sometimes
//! wraps the answer in a markdown code fence. [`GenerationClient`] strips the
//! fence, parses the remainder and reports anything unparsable as
//! [`GenerationError::MalformedOutput`]. There is no automatic retry; the
//! caller decides whether to let the user try again.

use crate::debug_log::{DebugRecord, DebugSink, NoopSink};
use crate::keystore::ApiKey;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// A text-generation backend.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        temperature: f32,
        api_key: Option<&ApiKey>,
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub schema_description: String,
    pub example_format: String,
    pub temperature: Option<f32>,
    pub api_key: Option<ApiKey>,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        schema_description: impl Into<String>,
        example_format: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            schema_description: schema_description.into(),
            example_format: example_format.into(),
            temperature: None,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: ApiKey) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug)]
pub enum GenerationError {
    MissingApiKey,
    InvalidApiKey,
    Network(String),
    Upstream { status: u16, body: String },
    EmptyResponse,
    MalformedOutput { raw: String },
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::MissingApiKey => write!(f, "API key is required"),
            GenerationError::InvalidApiKey => write!(f, "API key was rejected"),
            GenerationError::Network(msg) => write!(f, "network error: {msg}"),
            GenerationError::Upstream { status, body } => {
                write!(f, "model provider returned HTTP {status}: {body}")
            }
            GenerationError::EmptyResponse => write!(f, "model returned no text"),
            GenerationError::MalformedOutput { raw } => {
                write!(f, "invalid JSON response: {raw}")
            }
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<reqwest::Error> for GenerationError {
    fn from(value: reqwest::Error) -> Self {
        GenerationError::Network(value.to_string())
    }
}

/// Wraps the caller's prompt in the JSON-only instruction envelope.
pub fn build_envelope(prompt: &str, schema_description: &str, example_format: &str) -> String {
    format!(
        "You are a JSON response generator. You MUST respond with ONLY a valid JSON object that matches the required schema exactly. Do not include any explanation, markdown formatting, or additional text - just the raw JSON object.

REQUIRED JSON SCHEMA:
{schema_description}

EXAMPLE FORMAT:
{example_format}

USER REQUEST:
{prompt}

IMPORTANT: Your response must be ONLY the JSON object, nothing else. No markdown code blocks, no explanations, no additional text."
    )
}

/// Trims model output and removes a surrounding markdown code fence.
///
/// The opening fence may carry a language tag (```` ```json ````); the
/// closing fence is optional.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((tag, body)) if is_fence_tag(tag) => body,
        _ => rest.strip_prefix("json").unwrap_or(rest),
    };
    let body = body.trim();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// An empty line or a language name; a bare number is content, not a tag.
fn is_fence_tag(line: &str) -> bool {
    let tag = line.trim();
    tag.is_empty()
        || (tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
            && tag.chars().any(|c| !c.is_ascii_digit()))
}

/// Parses cleaned model output, keeping the text on failure for diagnostics.
pub fn parse_model_output(raw: &str) -> Result<Value, GenerationError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned).map_err(|_| GenerationError::MalformedOutput {
        raw: cleaned.to_string(),
    })
}

#[derive(Clone)]
pub struct GenerationClient {
    model: Arc<dyn TextModel>,
    sink: Arc<dyn DebugSink>,
    default_temperature: f32,
}

impl GenerationClient {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self {
            model,
            sink: Arc::new(NoopSink),
            default_temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub async fn generate_structured(
        &self,
        request: &GenerationRequest,
    ) -> Result<Value, GenerationError> {
        let envelope = build_envelope(
            &request.prompt,
            &request.schema_description,
            &request.example_format,
        );
        let temperature = request.temperature.unwrap_or(self.default_temperature);
        debug!(
            schema = %request.schema_description,
            temperature,
            prompt_len = envelope.len(),
            "requesting structured generation"
        );

        let result = match self
            .model
            .generate_text(&envelope, temperature, request.api_key.as_ref())
            .await
        {
            Ok(text) => {
                debug!(response_len = text.len(), "model responded");
                parse_model_output(&text)
            }
            Err(err) => Err(err),
        };

        let logged = match &result {
            Ok(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            Err(err) => format!("ERROR: {err}"),
        };
        self.sink.record(&DebugRecord::new(
            request.schema_description.as_str(),
            envelope,
            logged,
        ));
        result
    }
}

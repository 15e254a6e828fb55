//! The external text-extraction capability and its Gemini implementation.
//!
//! The batch job only ever talks to [`TextExtractor`], a narrow trait that
//! accepts a prompt plus raw image bytes and returns extracted text. The
//! seam exists so tests can script outcomes per image without any network,
//! and so a different multimodal backend can be dropped in without touching
//! the batch state machine.
//!
//! Session construction goes through [`TextExtractorFactory`]: the
//! credential is an explicit argument on every call, never read from
//! ambient process state and never written to disk. Credential-format
//! problems are caught eagerly at `create` time, before the batch touches
//! any artifact.

use crate::error::{GleanError, ItemError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Model used when the caller does not name one.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini REST endpoint root.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Raw image bytes plus the MIME type the API should interpret them as.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    /// Build a payload for bytes read from `filename`, inferring the MIME
    /// type from its extension.
    pub fn new(filename: &str, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_for_name(filename).to_string(),
            bytes,
        }
    }
}

/// One multimodal text-extraction call: (prompt, image) → text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, prompt: &str, image: &ImagePayload) -> Result<String, ItemError>;
}

/// Constructs a [`TextExtractor`] session from a caller-supplied credential
/// and model identifier.
pub trait TextExtractorFactory: Send + Sync {
    fn create(&self, credential: &str, model: &str) -> Result<Arc<dyn TextExtractor>, GleanError>;
}

// ── Gemini ───────────────────────────────────────────────────────────────

/// Factory producing [`GeminiExtractor`] sessions.
pub struct GeminiFactory {
    /// Per-call HTTP timeout.
    pub api_timeout: Duration,
}

impl Default for GeminiFactory {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(120),
        }
    }
}

impl TextExtractorFactory for GeminiFactory {
    fn create(&self, credential: &str, model: &str) -> Result<Arc<dyn TextExtractor>, GleanError> {
        // API keys are opaque, but whitespace or control bytes always mean a
        // paste error; reject them before the first request goes out.
        if credential.is_empty()
            || credential
                .chars()
                .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(GleanError::SessionInit(
                "API key is malformed (contains whitespace or control characters)".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(self.api_timeout)
            .build()
            .map_err(|e| GleanError::SessionInit(e.to_string()))?;

        Ok(Arc::new(GeminiExtractor {
            http,
            api_key: credential.to_string(),
            model: model.to_string(),
        }))
    }
}

/// Text extraction via the Gemini `generateContent` REST API.
pub struct GeminiExtractor {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

#[async_trait]
impl TextExtractor for GeminiExtractor {
    async fn extract_text(&self, prompt: &str, image: &ImagePayload) -> Result<String, ItemError> {
        let url = format!("{GEMINI_API_BASE}/models/{}:generateContent", self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: STANDARD.encode(&image.bytes),
                        },
                    },
                ],
            }],
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ItemError::Network(e.to_string())
                } else {
                    ItemError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ApiErrorEnvelope>()
                .await
                .ok()
                .map(|e| e.error.message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(ItemError::Api(detail));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ItemError::Api(format!("unreadable response: {e}")))?;

        let text = parsed.text();
        debug!("model {} returned {} chars", self.model, text.len());
        if text.is_empty() {
            return Err(ItemError::EmptyResponse);
        }
        Ok(text)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenate the text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// MIME type for a stored image filename; PNG when unknown (matching the
/// extractor's own fallback extension).
fn mime_for_name(name: &str) -> &'static str {
    match Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

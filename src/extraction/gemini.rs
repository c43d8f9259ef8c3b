//! Gemini-backed extraction client.
//!
//! Talks to the Generative Language REST API directly over HTTP; page images
//! travel as base64 `inline_data` parts. HTTP 429 and `RESOURCE_EXHAUSTED`
//! responses are classified as quota failures so the retry policy can back
//! off; every other failure is fatal.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ExtractionClient, ExtractionError, PageImage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Extraction client for Google's Generative Language API.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    /// Build a client against the production endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, model)
    }

    /// Build a client against an explicit endpoint (used by tests to point
    /// at a mock server).
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    async fn generate(&self, parts: Vec<Value>) -> Result<String, ExtractionError> {
        let body = json!({ "contents": [{ "parts": parts }] });
        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|err| ExtractionError::Failed(format!("request failed: {err}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ExtractionError::Failed(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            return Err(classify_http_failure(status, &text));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|err| ExtractionError::Failed(format!("unexpected response shape: {err}")))?;
        let combined = parsed
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if combined.is_empty() {
            return Err(ExtractionError::Failed(
                "model returned no text candidates".to_string(),
            ));
        }
        Ok(combined)
    }
}

#[async_trait]
impl ExtractionClient for GeminiClient {
    async fn extract(&self, pages: &[PageImage], prompt: &str) -> Result<String, ExtractionError> {
        tracing::debug!(model = %self.model, pages = pages.len(), "Requesting text extraction");
        let mut parts = vec![json!({ "text": prompt })];
        for page in pages {
            parts.push(json!({
                "inline_data": {
                    "mime_type": page.mime_type,
                    "data": STANDARD.encode(&page.data),
                }
            }));
        }
        self.generate(parts).await
    }

    async fn classify(&self, text: &str, prompt: &str) -> Result<String, ExtractionError> {
        tracing::debug!(model = %self.model, chars = text.len(), "Requesting categorization");
        self.generate(vec![json!({ "text": format!("{prompt}\n\n{text}") })])
            .await
    }
}

fn classify_http_failure(status: StatusCode, body: &str) -> ExtractionError {
    let detail: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        ExtractionError::QuotaExceeded(format!("{status}: {detail}"))
    } else {
        ExtractionError::Failed(format!("{status}: {detail}"))
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

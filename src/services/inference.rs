use async_trait::async_trait;
use base64::Engine;
use garde::Validate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::analysis::AnalysisResult;

/// Instruction sent alongside every image.
pub const INSTRUCTION: &str = concat!(
    "You are an agronomist examining a photo of a plant. ",
    "Identify the plant or crop shown and list the diseases or disorders that could explain ",
    "what is visible. For each candidate give its name as label, a confidence between 0 and 1, ",
    "and a practical remedy a farmer can apply. If the plant looks healthy, return a single ",
    "finding labelled \"Healthy\" with remedy \"None\". ",
    "Respond with JSON only: {\"subject\": string, \"findings\": [{\"label\": string, ",
    "\"confidence\": number, \"remedy\": string}]}."
);

/// External image analysis capability. Returns the raw JSON text produced by the model.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(
        &self,
        image: &[u8],
        media_type: &str,
        instruction: &str,
    ) -> Result<String, InferenceError>;
}

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Gemini `generateContent` API.
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Output schema handed to the model, mirroring `AnalysisResult`.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "subject": { "type": "STRING" },
            "findings": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": { "type": "STRING" },
                        "confidence": { "type": "NUMBER" },
                        "remedy": { "type": "STRING" }
                    },
                    "required": ["label", "confidence", "remedy"]
                }
            }
        },
        "required": ["subject", "findings"]
    })
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate(
        &self,
        image: &[u8],
        media_type: &str,
        instruction: &str,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: instruction },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: media_type,
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        };

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(InferenceError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(InferenceError::from_http)?;

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(InferenceError::Blocked(reason));
        }

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(InferenceError::Empty);
        }
        Ok(text)
    }
}

/// Decode model output into an `AnalysisResult`, rejecting anything outside the schema.
pub fn decode_result(raw: &str) -> Result<AnalysisResult, InferenceError> {
    let result: AnalysisResult = serde_json::from_str(strip_code_fence(raw))?;
    result
        .validate()
        .map_err(|report| InferenceError::Schema(report.to_string()))?;
    Ok(result)
}

/// Models sometimes wrap JSON in a markdown fence even when asked not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    Http(reqwest::Error),

    #[error("Inference service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Inference request was blocked: {0}")]
    Blocked(String),

    #[error("Inference service returned no content")]
    Empty,

    #[error("Failed to parse analysis response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Analysis response does not match the expected shape: {0}")]
    Schema(String),

    #[error("Inference timed out after {0} seconds")]
    Timeout(u64),
}

impl InferenceError {
    /// Failure messages end up on job rows, so the request URL is dropped.
    fn from_http(err: reqwest::Error) -> Self {
        InferenceError::Http(err.without_url())
    }
}

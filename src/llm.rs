use backoff::ExponentialBackoff;
use log::{debug, info};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::CiphrError;
use crate::http::{build_client, retry_policy, send_with_retry};

/// Anything that turns a prompt into raw model output.
pub trait AnswerProvider {
    fn complete(&self, prompt: &str) -> Result<String, CiphrError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    policy: ExponentialBackoff,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, CiphrError> {
        let api_key = config
            .gemini_api_key
            .clone()
            .ok_or(CiphrError::MissingApiKey("GEMINI_API_KEY"))?;
        let model = config.gemini_model.trim_start_matches("models/");
        Ok(Self {
            client: build_client(config)?,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.gemini_base_url.trim_end_matches('/'),
                model
            ),
            api_key,
            policy: retry_policy(config),
        })
    }
}

impl AnswerProvider for GeminiClient {
    fn complete(&self, prompt: &str) -> Result<String, CiphrError> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };
        debug!("Sending prompt of {} characters to {}", prompt.len(), self.endpoint);

        let response = send_with_retry(self.policy.clone(), "Gemini API", || {
            self.client
                .post(&self.endpoint)
                .query(&[("key", self.api_key.as_str())])
                .json(&body)
        })?;
        let parsed: GenerateResponse = response.json()?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| CiphrError::ApiError("Gemini returned no candidates".to_string()))?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(CiphrError::ApiError(format!(
                "Gemini returned an empty answer (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        info!("Received {} characters from Gemini", text.len());
        Ok(text)
    }
}

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// The seam between the HTTP layer and the language model. Handlers only see
/// this trait, which keeps chat flows testable with a scripted stand-in.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One prompt in, one full reply out.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Identifier of the model actually answering, for /stats.
    fn model_name(&self) -> String;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<ResponseCandidate>>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Gemini REST client. Built through [`GeminiClient::probe`], which walks the
/// candidate list at startup and pins the first model that answers; a key
/// with no live candidate is a fatal configuration error.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub async fn probe(
        api_key: &str,
        candidates: &[String],
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        for candidate in candidates {
            let client = Self {
                http: http.clone(),
                api_key: api_key.to_string(),
                model: candidate.clone(),
            };
            match client.request("Bonjour").await {
                Ok(_) => {
                    info!(model = %candidate, "language model probe succeeded");
                    return Ok(client);
                }
                Err(err) => {
                    warn!(model = %candidate, error = %err, "language model probe failed");
                }
            }
        }
        bail!("no candidate language model responded: {:?}", candidates)
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );
        let body = GenerateRequest {
            contents: [RequestContent {
                parts: [RequestPart { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to model '{}' failed", self.model))?;

        let status = response.status();
        if !status.is_success() {
            bail!("model '{}' returned HTTP {}", self.model, status);
        }

        let decoded: GenerateResponse = response
            .json()
            .await
            .context("failed to decode model response")?;

        decoded
            .candidates
            .and_then(|mut candidates| candidates.drain(..).next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts)
            .and_then(|mut parts| parts.drain(..).next())
            .and_then(|part| part.text)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| anyhow!("model '{}' returned no text candidate", self.model))
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.request(prompt).await
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

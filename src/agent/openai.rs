use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{ChatModel, CompletionRequest, ContentPart, PromptRole};
use crate::config::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use crate::errors::RelayError;

// ── Wire types (OpenAI-compatible chat completions) ──────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl<'a> },
}

#[derive(Serialize)]
struct WireImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Deserialize)]
struct WireReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireErrorBody {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

fn role_name(role: PromptRole) -> &'static str {
    match role {
        PromptRole::System => "system",
        PromptRole::User => "user",
        PromptRole::Assistant => "assistant",
    }
}

fn to_wire<'a>(model: &'a str, request: &'a CompletionRequest) -> WireRequest<'a> {
    let messages = request
        .messages
        .iter()
        .map(|m| WireMessage {
            role: role_name(m.role),
            content: m
                .parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text(text) => WirePart::Text { text },
                    ContentPart::ImageUrl(url) => {
                        WirePart::ImageUrl { image_url: WireImageUrl { url } }
                    }
                })
                .collect(),
        })
        .collect();

    WireRequest {
        model,
        messages,
        temperature: request.sampling.temperature,
        max_tokens: request.sampling.max_tokens,
        top_p: request.sampling.top_p,
        frequency_penalty: request.sampling.frequency_penalty,
        presence_penalty: request.sampling.presence_penalty,
        response_format: ResponseFormat { kind: "text" },
    }
}

/// Maps a non-2xx provider response onto the relay's failure classes,
/// keeping the provider's own message when it sends one.
fn classify_failure(status: StatusCode, body: &str) -> RelayError {
    let message = serde_json::from_str::<WireErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("Model provider returned HTTP {status}"));

    if status == StatusCode::TOO_MANY_REQUESTS {
        RelayError::RateLimited { message }
    } else {
        RelayError::upstream(message)
    }
}

/// Chat-completion client for any OpenAI-compatible endpoint.
/// Built once in `main` and shared by every request.
#[derive(Clone)]
pub struct OpenAiChatModel {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Misconfigured(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, RelayError> {
        let body = to_wire(&self.model, request);
        debug!(model = %self.model, messages = body.messages.len(), "Sending chat completion");

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completion request to {} failed: {e}", self.base_url);
                RelayError::upstream(format!("Failed to reach model provider: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Model provider returned {status}: {text}");
            return Err(classify_failure(status, &text));
        }

        let parsed: WireResponse = response.json().await.map_err(|e| {
            error!("Unreadable chat completion response: {e}");
            RelayError::upstream(format!("Unreadable response from model provider: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RelayError::upstream("Model provider returned no content"))
    }
}

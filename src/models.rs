use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// Largest accepted image upload (5 MiB).
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prior message as sent by the client in the `messages` form field.
/// Unknown fields (e.g. a client-side image preview URL) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
}

/// How an attached image reaches the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStrategy {
    /// One multimodal call carrying the image next to the user's text.
    #[default]
    Inline,
    /// A separate description call whose text is embedded in the main prompt.
    #[serde(rename = "preanalysis")]
    PreAnalysis,
}

impl ImageStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStrategy::Inline => "inline",
            ImageStrategy::PreAnalysis => "preanalysis",
        }
    }
}

impl FromStr for ImageStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(ImageStrategy::Inline),
            "preanalysis" | "pre-analysis" => Ok(ImageStrategy::PreAnalysis),
            other => Err(format!("expected 'inline' or 'preanalysis', got '{other}'")),
        }
    }
}

/// The image half of a turn: either hosted elsewhere or uploaded with the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    Url(String),
    Upload { media_type: String, bytes: Vec<u8> },
}

impl ImagePayload {
    /// Checks an uploaded file against the accepted MIME family and size cap.
    pub fn upload(media_type: impl Into<String>, bytes: Vec<u8>) -> Result<Self, RelayError> {
        let media_type = media_type.into();
        if !media_type.starts_with("image/") {
            return Err(RelayError::invalid_input(format!(
                "Uploaded file must be an image (got '{media_type}')"
            )));
        }
        if bytes.is_empty() {
            return Err(RelayError::invalid_input("Uploaded image is empty"));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(RelayError::invalid_input(format!(
                "Image exceeds max size of {MAX_IMAGE_BYTES} bytes (actual: {})",
                bytes.len()
            )));
        }
        Ok(ImagePayload::Upload { media_type, bytes })
    }

    /// A URL the provider can fetch; uploads are inlined as a base64 `data:` URL.
    pub fn to_url(&self) -> String {
        match self {
            ImagePayload::Url(url) => url.clone(),
            ImagePayload::Upload { media_type, bytes } => {
                format!("data:{media_type};base64,{}", STANDARD.encode(bytes))
            }
        }
    }
}

/// Everything one `POST /api/chat` carries.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub message: String,
    pub image: Option<ImagePayload>,
    pub history: Vec<HistoryMessage>,
}

impl TurnInput {
    pub fn has_text(&self) -> bool {
        !self.message.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthReply {
    pub status: &'static str,
    pub model: String,
    pub image_strategy: ImageStrategy,
    pub configured: bool,
}

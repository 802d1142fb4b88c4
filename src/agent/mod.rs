pub mod openai;

use async_trait::async_trait;

use crate::errors::RelayError;
use crate::models::{HistoryMessage, MessageRole};

pub use openai::OpenAiChatModel;

/// Fixed sampling settings sent with every completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

pub const DEFAULT_SAMPLING: SamplingParams = SamplingParams {
    temperature: 0.7,
    max_tokens: 2048,
    top_p: 1.0,
    frequency_penalty: 0.0,
    presence_penalty: 0.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<MessageRole> for PromptRole {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => PromptRole::User,
            MessageRole::Assistant => PromptRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    ImageUrl(String),
}

/// A provider-neutral, optionally multimodal chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub parts: Vec<ContentPart>,
}

impl PromptMessage {
    pub fn system(text: &str) -> Self {
        Self { role: PromptRole::System, parts: vec![ContentPart::Text(text.to_string())] }
    }

    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self { role: PromptRole::User, parts }
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::ImageUrl(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ContentPart::ImageUrl(_)))
    }
}

impl From<&HistoryMessage> for PromptMessage {
    fn from(m: &HistoryMessage) -> Self {
        Self { role: m.role.into(), parts: vec![ContentPart::Text(m.content.clone())] }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    pub sampling: SamplingParams,
}

/// Anything that can turn a role-tagged message list into reply text.
/// Implementations must not retry; every failure is reported once.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, RelayError>;
}

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Failure classes a turn can end in. `Network` covers anything that never
/// produced a relay envelope (connection refused, unreadable body).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnErrorKind {
    InvalidInput,
    Cancelled,
    RateLimited,
    /// Any other server-side failure, including a missing credential.
    Upstream,
    Network,
}

impl TurnErrorKind {
    /// Maps a relay HTTP status onto a failure class.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => TurnErrorKind::InvalidInput,
            429 => TurnErrorKind::RateLimited,
            499 => TurnErrorKind::Cancelled,
            _ => TurnErrorKind::Upstream,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Error(TurnErrorKind),
}

/// One entry of the conversation as the user sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    /// Object URL of the attached image preview; revoked on reset.
    pub image: Option<String>,
    pub kind: MessageKind,
}

impl Message {
    pub fn is_error(&self) -> bool {
        matches!(self.kind, MessageKind::Error(_))
    }
}

/// Prior history as the relay expects it in the `messages` form field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self { role: m.role, content: m.content.clone() }
    }
}

/// Response envelope from `POST /api/chat`: exactly one field is set.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RelayReply {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

use axum::http::StatusCode;
use thiserror::Error;

/// Non-standard "client closed request" status, reported when the caller aborts a turn.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Every way a relayed chat turn can fail. Each variant maps to exactly one
/// HTTP status and is surfaced once, as a `{error}` envelope.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Caller errors ────────────────────────────────────────────────────────
    #[error("{0}")]
    InvalidInput(String),

    #[error("Request cancelled by user")]
    Cancelled,

    // ── Provider errors ──────────────────────────────────────────────────────
    #[error("Rate limited by the model provider: {message}")]
    RateLimited { message: String },

    #[error("{message}")]
    UpstreamFailure { message: String },

    // ── Server errors ────────────────────────────────────────────────────────
    #[error("{0}")]
    Misconfigured(String),
}

impl RelayError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        RelayError::InvalidInput(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        RelayError::UpstreamFailure { message: message.into() }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RelayError::InvalidInput(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_REQUEST),
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::UpstreamFailure { .. } | RelayError::Misconfigured(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

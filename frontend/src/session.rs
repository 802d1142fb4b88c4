//! Conversation session: message history plus the lifecycle of the single
//! turn that may be in flight.
//!
//! The session is platform independent. It hands out a [`Turn`] on submit,
//! the caller drives it over some [`TurnTransport`], and feeds the resulting
//! [`TurnCompletion`] back through [`Session::complete_turn`]. Cancellation
//! aborts the turn's future and detaches it from the session, so a completion
//! that loses the race is discarded rather than appended.

use std::future::Future;

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use thiserror::Error;

use crate::models::{Message, MessageKind, Role, TurnErrorKind, WireMessage};

/// Largest image a user may attach (5 MiB).
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

// ── Attachments ──────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("Please upload an image file")]
    NotAnImage,
    #[error("File size should be less than 5MB")]
    TooLarge,
    #[error("The selected file is empty")]
    Empty,
}

/// An image picked for the next turn, already read into memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAttachment {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
    /// Object URL used to render the image; owned by the message once sent.
    pub preview_url: Option<String>,
}

impl ImageAttachment {
    /// Cheap pre-check so oversized files are rejected before being read.
    pub fn validate(media_type: &str, size: usize) -> Result<(), AttachmentError> {
        if !media_type.starts_with("image/") {
            return Err(AttachmentError::NotAnImage);
        }
        if size == 0 {
            return Err(AttachmentError::Empty);
        }
        if size > MAX_IMAGE_BYTES {
            return Err(AttachmentError::TooLarge);
        }
        Ok(())
    }

    pub fn new(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, AttachmentError> {
        let media_type = media_type.into();
        Self::validate(&media_type, bytes.len())?;
        Ok(Self {
            file_name: file_name.into(),
            media_type,
            bytes,
            preview_url: None,
        })
    }

    pub fn with_preview(mut self, url: impl Into<String>) -> Self {
        self.preview_url = Some(url.into());
        self
    }
}

// ── Turns ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TurnId(u64);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TurnError {
    pub kind: TurnErrorKind,
    pub message: String,
}

impl TurnError {
    pub fn new(kind: TurnErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn cancelled() -> Self {
        Self::new(TurnErrorKind::Cancelled, "Request cancelled by user")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TurnErrorKind::Network, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TurnErrorKind::Cancelled
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Nothing to send: the message is empty and no image is attached")]
    Empty,
    #[error("A message is already being answered")]
    Busy,
}

/// What goes over the wire for one turn. History never includes the turn's
/// own user message, error entries, or image previews.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnRequest {
    pub text: String,
    pub image: Option<ImageAttachment>,
    pub history: Vec<WireMessage>,
}

impl TurnRequest {
    /// JSON for the `messages` field, or `None` when there is no prior history.
    pub fn history_json(&self) -> Result<Option<String>, serde_json::Error> {
        if self.history.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(&self.history).map(Some)
    }
}

/// Sends one turn and resolves to the assistant's reply text.
/// Dropping the returned future must abandon the request.
pub trait TurnTransport {
    fn send(&self, request: &TurnRequest) -> impl Future<Output = Result<String, TurnError>>;
}

/// A submitted turn, ready to be driven by the caller.
#[derive(Debug)]
pub struct Turn {
    id: TurnId,
    request: TurnRequest,
    registration: AbortRegistration,
}

impl Turn {
    pub fn id(&self) -> TurnId {
        self.id
    }

    pub fn request(&self) -> &TurnRequest {
        &self.request
    }

    /// Drives the turn to its terminal outcome. A `cancel_turn` on the owning
    /// session ends this future early with a `Cancelled` error.
    pub async fn run<T: TurnTransport>(self, transport: &T) -> TurnCompletion {
        let Turn { id, request, registration } = self;
        let outcome = match Abortable::new(transport.send(&request), registration).await {
            Ok(outcome) => outcome,
            Err(_aborted) => Err(TurnError::cancelled()),
        };
        TurnCompletion { id, outcome }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnCompletion {
    pub id: TurnId,
    pub outcome: Result<String, TurnError>,
}

/// What `complete_turn` did with a completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Replied,
    Failed,
    /// Cancelled, reset, or otherwise no longer the in-flight turn.
    Discarded,
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct InFlight {
    turn: TurnId,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
pub struct Session {
    messages: Vec<Message>,
    in_flight: Option<InFlight>,
    next_message_id: u64,
    next_turn_id: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts a turn: appends the user's message right away and returns the
    /// request to send. Rejected without side effects when there is nothing to
    /// send or another turn is still in flight.
    pub fn submit_turn(
        &mut self,
        text: &str,
        image: Option<ImageAttachment>,
    ) -> Result<Turn, SubmitError> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(SubmitError::Empty);
        }
        if self.is_busy() {
            return Err(SubmitError::Busy);
        }

        let history = self
            .messages
            .iter()
            .filter(|m| !m.is_error())
            .map(WireMessage::from)
            .collect();

        let preview = image.as_ref().and_then(|i| i.preview_url.clone());
        self.push(Role::User, text.to_string(), preview, MessageKind::Text);

        let id = TurnId(self.next_turn_id);
        self.next_turn_id += 1;
        let (abort, registration) = AbortHandle::new_pair();
        self.in_flight = Some(InFlight { turn: id, abort });

        Ok(Turn {
            id,
            request: TurnRequest { text: text.to_string(), image, history },
            registration,
        })
    }

    /// Aborts the in-flight turn. Returns `false` when there was nothing to cancel.
    pub fn cancel_turn(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.abort.abort();
                log::debug!("Cancelled turn {:?}", in_flight.turn);
                true
            }
            None => false,
        }
    }

    /// Records the outcome of a turn. Only the current in-flight turn can
    /// append anything; cancellations never do.
    pub fn complete_turn(&mut self, completion: TurnCompletion) -> TurnOutcome {
        match &self.in_flight {
            Some(in_flight) if in_flight.turn == completion.id => {}
            _ => return TurnOutcome::Discarded,
        }
        self.in_flight = None;

        match completion.outcome {
            Ok(reply) => {
                self.push(Role::Assistant, reply, None, MessageKind::Text);
                TurnOutcome::Replied
            }
            Err(err) if err.is_cancelled() => TurnOutcome::Discarded,
            Err(err) => {
                log::error!("Turn failed: {err}");
                let content = if err.message.is_empty() {
                    "Sorry, I encountered an error. Please try again.".to_string()
                } else {
                    err.message
                };
                self.push(Role::Assistant, content, None, MessageKind::Error(err.kind));
                TurnOutcome::Failed
            }
        }
    }

    /// Clears the conversation. Any in-flight turn is cancelled and every image
    /// preview is handed to `release` before the history is dropped.
    pub fn reset_session(&mut self, mut release: impl FnMut(&str)) {
        self.cancel_turn();
        for url in self.messages.iter().filter_map(|m| m.image.as_deref()) {
            release(url);
        }
        self.messages.clear();
    }

    fn push(&mut self, role: Role, content: String, image: Option<String>, kind: MessageKind) {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.messages.push(Message { id, role, content, image, kind });
    }
}

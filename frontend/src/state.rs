use js_sys::Uint8Array;
use leptos::prelude::*;
use leptos::task::spawn_local;
use wasm_bindgen_futures::JsFuture;
use web_sys::{File, Url};

use crate::api::HttpTransport;
use crate::models::Message;
use crate::session::{ImageAttachment, Session, TurnOutcome};

fn revoke_preview(url: &str) {
    if let Err(e) = Url::revoke_object_url(url) {
        log::warn!("Failed to revoke image preview {url}: {e:?}");
    }
}

/// Reads a picked file into an attachment with an object-URL preview.
async fn read_attachment(file: File) -> Result<ImageAttachment, String> {
    ImageAttachment::validate(&file.type_(), file.size() as usize).map_err(|e| e.to_string())?;

    let buffer = JsFuture::from(file.array_buffer())
        .await
        .map_err(|e| format!("Failed to read image: {e:?}"))?;
    let bytes = Uint8Array::new(&buffer).to_vec();
    let attachment =
        ImageAttachment::new(file.name(), file.type_(), bytes).map_err(|e| e.to_string())?;

    match Url::create_object_url_with_blob(&file) {
        Ok(url) => Ok(attachment.with_preview(url)),
        Err(e) => {
            log::warn!("No preview for {}: {e:?}", file.name());
            Ok(attachment)
        }
    }
}

/// Shared application state, provided via Leptos context.
#[derive(Clone, Copy)]
pub struct AppState {
    // --- Read signals (for components to subscribe to) ---
    pub session: ReadSignal<Session>,
    pub pending_image: ReadSignal<Option<ImageAttachment>>,
    pub error: ReadSignal<Option<String>>,

    // --- Write signals (for mutating state) ---
    pub set_session: WriteSignal<Session>,
    pub set_pending_image: WriteSignal<Option<ImageAttachment>>,
    pub set_error: WriteSignal<Option<String>>,
}

impl AppState {
    /// Create a new `AppState` and provide it in the current Leptos context.
    pub fn provide() -> Self {
        let (session, set_session) = signal(Session::new());
        let (pending_image, set_pending_image) = signal(None::<ImageAttachment>);
        let (error, set_error) = signal(None::<String>);

        let state = Self {
            session,
            pending_image,
            error,
            set_session,
            set_pending_image,
            set_error,
        };

        provide_context(state);
        state
    }

    pub fn messages(&self) -> Vec<Message> {
        self.session.with(|s| s.messages().to_vec())
    }

    pub fn is_loading(&self) -> bool {
        self.session.with(|s| s.is_busy())
    }

    /// Validates and reads a picked file, replacing any pending attachment.
    pub fn attach_file(&self, file: File) {
        let state = *self;
        spawn_local(async move {
            match read_attachment(file).await {
                Ok(attachment) => {
                    state.clear_attachment();
                    state.set_error.set(None);
                    state.set_pending_image.set(Some(attachment));
                }
                Err(e) => {
                    log::warn!("Rejected attachment: {e}");
                    state.set_error.set(Some(e));
                }
            }
        });
    }

    /// Drops the pending attachment and its preview.
    pub fn clear_attachment(&self) {
        let previous = self.set_pending_image.try_update(Option::take).flatten();
        if let Some(url) = previous.and_then(|a| a.preview_url) {
            revoke_preview(&url);
        }
    }

    /// Submits a turn and drives it in the background. Returns `false` if the
    /// session rejected it (nothing to send, or a turn already in flight).
    pub fn send_message(&self, text: String) -> bool {
        let image = self.pending_image.get_untracked();
        let turn = match self.set_session.try_update(|s| s.submit_turn(&text, image)) {
            Some(Ok(turn)) => turn,
            Some(Err(e)) => {
                log::debug!("Turn not submitted: {e}");
                return false;
            }
            None => return false,
        };

        // The preview now belongs to the user's message; don't revoke it here.
        self.set_pending_image.set(None);
        self.set_error.set(None);

        let set_session = self.set_session;
        spawn_local(async move {
            let completion = turn.run(&HttpTransport::default()).await;
            let outcome = set_session.try_update(|s| s.complete_turn(completion));
            if outcome == Some(TurnOutcome::Discarded) {
                log::debug!("Turn result discarded");
            }
        });
        true
    }

    /// Stops the in-flight turn, if any.
    pub fn stop(&self) {
        self.set_session.update(|s| {
            s.cancel_turn();
        });
    }

    /// Starts over: cancels, clears history, and releases every preview.
    pub fn new_conversation(&self) {
        self.set_session.update(|s| s.reset_session(revoke_preview));
        self.clear_attachment();
        self.set_error.set(None);
    }
}

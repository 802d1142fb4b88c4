use std::future::Future;

use gloo_net::http::Request;
use js_sys::{Array, Uint8Array};
use wasm_bindgen::JsValue;
use web_sys::{AbortController, Blob, BlobPropertyBag, FormData};

use crate::models::{RelayReply, TurnErrorKind};
use crate::session::{TurnError, TurnRequest, TurnTransport};

/// Base URL of the relay server.
const API_BASE: &str = "http://localhost:3000";

fn js_error(context: &str, err: JsValue) -> TurnError {
    TurnError::network(format!("{context}: {err:?}"))
}

/// Aborts the underlying fetch when dropped, unless disarmed first. This is
/// what turns a cancelled turn future into an actual aborted request.
struct AbortOnDrop(Option<AbortController>);

impl AbortOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(controller) = self.0.take() {
            controller.abort();
        }
    }
}

/// Builds the multipart body: `message`, optional `file`, optional `messages`.
fn build_form(request: &TurnRequest) -> Result<FormData, TurnError> {
    let form = FormData::new().map_err(|e| js_error("Failed to create form", e))?;
    form.append_with_str("message", &request.text)
        .map_err(|e| js_error("Failed to add message", e))?;

    if let Some(image) = &request.image {
        let bytes = Uint8Array::from(image.bytes.as_slice());
        let options = BlobPropertyBag::new();
        options.set_type(&image.media_type);
        let blob = Blob::new_with_u8_array_sequence_and_options(&Array::of1(&bytes), &options)
            .map_err(|e| js_error("Failed to wrap image", e))?;
        form.append_with_blob_and_filename("file", &blob, &image.file_name)
            .map_err(|e| js_error("Failed to add image", e))?;
    }

    let history = request
        .history_json()
        .map_err(|e| TurnError::network(format!("Failed to encode history: {e}")))?;
    if let Some(history) = history {
        form.append_with_str("messages", &history)
            .map_err(|e| js_error("Failed to add history", e))?;
    }
    Ok(form)
}

/// Maps a relay envelope and status onto the turn's outcome.
fn interpret_reply(status: u16, reply: RelayReply) -> Result<String, TurnError> {
    let ok = (200..300).contains(&status);
    match (ok, reply.response, reply.error) {
        (true, Some(response), None) => Ok(response),
        (_, _, Some(error)) => {
            let kind = if ok { TurnErrorKind::Upstream } else { TurnErrorKind::from_status(status) };
            Err(TurnError::new(kind, error))
        }
        (true, None, None) => Err(TurnError::new(TurnErrorKind::Upstream, "Empty response from server")),
        (false, _, None) => Err(TurnError::new(
            TurnErrorKind::from_status(status),
            format!("HTTP error! status: {status}"),
        )),
    }
}

/// Sends turns to the relay's `POST /api/chat` endpoint.
pub struct HttpTransport {
    endpoint: String,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self { endpoint: format!("{API_BASE}/api/chat") }
    }
}

impl TurnTransport for HttpTransport {
    fn send(&self, request: &TurnRequest) -> impl Future<Output = Result<String, TurnError>> {
        let endpoint = self.endpoint.clone();
        let form = build_form(request);

        async move {
            let form = form?;
            let controller =
                AbortController::new().map_err(|e| js_error("Failed to create abort controller", e))?;
            let mut guard = AbortOnDrop(Some(controller.clone()));

            let resp = Request::post(&endpoint)
                .abort_signal(Some(&controller.signal()))
                .body(form)
                .map_err(|e| TurnError::network(format!("Failed to build request: {e}")))?
                .send()
                .await
                .map_err(|e| TurnError::network(format!("Network error: {e}")))?;

            let status = resp.status();
            let reply = resp.json::<RelayReply>().await;
            guard.disarm();

            match reply {
                Ok(reply) => interpret_reply(status, reply),
                Err(e) if (200..300).contains(&status) => {
                    Err(TurnError::network(format!("Parse error: {e}")))
                }
                Err(_) => Err(TurnError::new(
                    TurnErrorKind::from_status(status),
                    format!("HTTP error! status: {status}"),
                )),
            }
        }
    }
}

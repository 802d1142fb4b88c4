use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::errors::RelayError;
use crate::models::{ChatReply, ErrorReply, HealthReply, HistoryMessage, ImagePayload, TurnInput};
use crate::service::relay_service::RelayService;

use super::MAX_BODY_BYTES;

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST `/api/chat` — multipart turn in, `{response}` or `{error}` out
pub async fn chat_handler(
    State(svc): State<RelayService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return error_response(&RelayError::invalid_input(format!(
                "Expected multipart form data: {rejection}"
            )));
        }
    };
    let input = match read_turn_input(multipart).await {
        Ok(input) => input,
        Err(err) => return error_response(&err),
    };

    match relay_detached(svc, input).await {
        Ok(response) => (StatusCode::OK, Json(ChatReply { response })).into_response(),
        Err(err) => error_response(&err),
    }
}

/// GET `/api/health` — liveness plus the relay's effective settings
pub async fn health_handler(State(svc): State<RelayService>) -> impl IntoResponse {
    Json(HealthReply {
        status: "ok",
        model: svc.model_name().unwrap_or_default().to_string(),
        image_strategy: svc.strategy(),
        configured: svc.is_configured(),
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Runs the turn on its own task. If the caller goes away (axum drops this
/// future when the client disconnects) the drop guard cancels the token and
/// the outbound model call is abandoned.
async fn relay_detached(svc: RelayService, input: TurnInput) -> Result<String, RelayError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let task = tokio::spawn(async move { svc.relay(input, &cancel).await });
    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!("Relay task failed: {e}");
            Err(RelayError::upstream("Internal error while relaying the message"))
        }
    }
}

async fn read_turn_input(mut multipart: Multipart) -> Result<TurnInput, RelayError> {
    let mut input = TurnInput::default();
    let mut image_url: Option<String> = None;
    let mut upload: Option<ImagePayload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error("Malformed form data", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "message" => input.message = field_text(field).await?,
            "image_url" => {
                let url = field_text(field).await?;
                if !url.trim().is_empty() {
                    image_url = Some(url.trim().to_string());
                }
            }
            "messages" => {
                let raw = field_text(field).await?;
                if !raw.trim().is_empty() {
                    input.history = serde_json::from_str::<Vec<HistoryMessage>>(&raw).map_err(|e| {
                        RelayError::invalid_input(format!("Field 'messages' is not a valid history: {e}"))
                    })?;
                }
            }
            "file" => {
                let media_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| form_error("Failed to read uploaded file", e))?;
                // An empty file part is what a form sends when nothing was picked.
                if !bytes.is_empty() {
                    upload = Some(ImagePayload::upload(media_type, bytes.to_vec())?);
                }
            }
            other => warn!("Ignoring unexpected form field '{other}'"),
        }
    }

    input.image = match (image_url, upload) {
        (Some(_), Some(_)) => {
            return Err(RelayError::invalid_input("Send either image_url or file, not both"));
        }
        (Some(url), None) => Some(ImagePayload::Url(url)),
        (None, upload) => upload,
    };
    Ok(input)
}

async fn field_text(field: Field<'_>) -> Result<String, RelayError> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|e| form_error(&format!("Failed to read field '{name}'"), e))
}

/// Body-limit hits surface as multipart errors mid-stream; name them plainly.
fn form_error(context: &str, err: MultipartError) -> RelayError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return RelayError::invalid_input(format!(
            "Request is too large (limit {MAX_BODY_BYTES} bytes)"
        ));
    }
    RelayError::invalid_input(format!("{context}: {err}"))
}

fn error_response(err: &RelayError) -> Response {
    if err.is_cancelled() || err.is_validation() {
        warn!("Chat turn rejected: {err}");
    } else {
        error!("Chat turn failed: {err}");
    }
    (err.status_code(), Json(ErrorReply { error: err.to_string() })).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;
    use tokio::sync::oneshot;

    use super::*;
    use crate::agent::{ChatModel, CompletionRequest};
    use crate::models::{ImageStrategy, MAX_IMAGE_BYTES};
    use crate::routes::router;

    /// Echoes how many prompt messages it received and whether an image came along.
    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, RelayError> {
            let last = request.messages.last().map(|m| m.text()).unwrap_or_default();
            let image = request.messages.iter().any(|m| m.has_image());
            Ok(format!("{}|{}|{}", request.messages.len(), last, image))
        }
    }

    struct FailingModel(fn() -> RelayError);

    #[async_trait]
    impl ChatModel for FailingModel {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, RelayError> {
            Err((self.0)())
        }
    }

    /// Hangs forever; drops its sender when the call is abandoned.
    struct DropSignalModel {
        on_drop: Mutex<Option<oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl ChatModel for DropSignalModel {
        fn model_name(&self) -> &str {
            "drop-signal"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, RelayError> {
            let _held = self.on_drop.lock().unwrap().take();
            std::future::pending::<Result<String, RelayError>>().await
        }
    }

    async fn spawn_app(svc: RelayService) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(svc)).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn post_form(base: &str, form: Form) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json::<Value>().await.unwrap())
    }

    fn echo_service() -> RelayService {
        RelayService::new(Some(Arc::new(EchoModel)), ImageStrategy::Inline)
    }

    #[tokio::test]
    async fn text_turn_returns_response_envelope() {
        let base = spawn_app(echo_service()).await;
        let form = Form::new()
            .text("message", "leaky faucet")
            .text("messages", r#"[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]"#);

        let (status, body) = post_form(&base, form).await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "4|leaky faucet|false");
    }

    #[tokio::test]
    async fn uploaded_image_reaches_the_model() {
        let base = spawn_app(echo_service()).await;
        let file = Part::bytes(vec![0x89, 0x50, 0x4E, 0x47])
            .file_name("sink.png")
            .mime_str("image/png")
            .unwrap();
        let form = Form::new().text("message", "").part("file", file);

        let (status, body) = post_form(&base, form).await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "2||true");
    }

    fn png(len: usize) -> Part {
        Part::bytes(vec![0u8; len]).file_name("leak.png").mime_str("image/png").unwrap()
    }

    #[tokio::test]
    async fn image_at_the_cap_with_long_history_is_accepted() {
        let base = spawn_app(echo_service()).await;
        let turn = serde_json::json!({"role": "user", "content": "x".repeat(1500)});
        let history = serde_json::to_string(&vec![turn; 1000]).unwrap();
        let form = Form::new()
            .text("message", "")
            .text("messages", history)
            .part("file", png(MAX_IMAGE_BYTES));

        let (status, body) = post_form(&base, form).await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["response"], "1002||true");
    }

    #[tokio::test]
    async fn oversized_upload_is_400() {
        let base = spawn_app(echo_service()).await;
        let form = Form::new().text("message", "").part("file", png(MAX_IMAGE_BYTES + 1));

        let (status, body) = post_form(&base, form).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("exceeds max size"), "{body}");
    }

    #[tokio::test]
    async fn image_url_reaches_the_model() {
        let base = spawn_app(echo_service()).await;
        let form = Form::new()
            .text("message", "what is this?")
            .text("image_url", "https://example.com/outlet.jpg");

        let (status, body) = post_form(&base, form).await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "2|what is this?|true");
    }

    #[tokio::test]
    async fn image_url_and_file_together_is_400() {
        let base = spawn_app(echo_service()).await;
        let form = Form::new()
            .text("message", "which one?")
            .text("image_url", "https://example.com/outlet.jpg")
            .part("file", png(4));

        let (status, body) = post_form(&base, form).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Send either image_url or file, not both");
    }

    #[tokio::test]
    async fn missing_text_and_image_is_400() {
        let base = spawn_app(echo_service()).await;
        let (status, body) = post_form(&base, Form::new().text("message", "  ")).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Message or image is required");
    }

    #[tokio::test]
    async fn non_image_upload_is_400() {
        let base = spawn_app(echo_service()).await;
        let file = Part::bytes(b"hello".to_vec())
            .file_name("notes.txt")
            .mime_str("text/plain")
            .unwrap();
        let (status, body) = post_form(&base, Form::new().part("file", file)).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("must be an image"));
    }

    #[tokio::test]
    async fn malformed_history_is_400() {
        let base = spawn_app(echo_service()).await;
        let form = Form::new().text("message", "hi").text("messages", "{not json");
        let (status, _) = post_form(&base, form).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn non_multipart_body_gets_json_error() {
        let base = spawn_app(echo_service()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&serde_json::json!({"message": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Expected multipart form data"));
    }

    #[tokio::test]
    async fn missing_credential_is_500() {
        let base = spawn_app(RelayService::new(None, ImageStrategy::Inline)).await;
        let (status, body) = post_form(&base, Form::new().text("message", "hi")).await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "OpenAI API key is not configured");
    }

    #[tokio::test]
    async fn upstream_rate_limit_is_429() {
        let model = FailingModel(|| RelayError::RateLimited { message: "Rate limit reached".into() });
        let base = spawn_app(RelayService::new(Some(Arc::new(model)), ImageStrategy::Inline)).await;
        let (status, body) = post_form(&base, Form::new().text("message", "hi")).await;
        assert_eq!(status, 429);
        assert!(body["error"].as_str().unwrap().contains("Rate limit reached"));
    }

    #[tokio::test]
    async fn upstream_failure_is_500_with_message() {
        let model = FailingModel(|| RelayError::upstream("The model is overloaded"));
        let base = spawn_app(RelayService::new(Some(Arc::new(model)), ImageStrategy::Inline)).await;
        let (status, body) = post_form(&base, Form::new().text("message", "hi")).await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "The model is overloaded");
    }

    #[tokio::test]
    async fn health_reports_configuration() {
        let base = spawn_app(echo_service()).await;
        let body: Value = reqwest::get(format!("{base}/api/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model"], "echo");
        assert_eq!(body["image_strategy"], "inline");
        assert_eq!(body["configured"], true);
    }

    #[tokio::test]
    async fn dropping_the_caller_abandons_the_model_call() {
        let (tx, rx) = oneshot::channel();
        let model = DropSignalModel { on_drop: Mutex::new(Some(tx)) };
        let svc = RelayService::new(Some(Arc::new(model)), ImageStrategy::Inline);
        let input = TurnInput { message: "hello?".into(), ..TurnInput::default() };

        let outcome = tokio::time::timeout(Duration::from_millis(50), relay_detached(svc, input)).await;
        assert!(outcome.is_err(), "relay should still be pending when the caller gives up");

        let dropped = tokio::time::timeout(Duration::from_secs(2), rx).await;
        assert!(matches!(dropped, Ok(Err(_))), "model call should be dropped after cancellation");
    }
}

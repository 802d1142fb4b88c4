pub mod api_routes;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::models::MAX_IMAGE_BYTES;
use crate::service::relay_service::RelayService;
use api_routes::{chat_handler, health_handler};

/// Budget for the serialized `messages` history and the `message` text.
const MAX_TEXT_BYTES: usize = 8 * 1024 * 1024;

/// Room for the largest image, a long history, and multipart framing.
pub(crate) const MAX_BODY_BYTES: usize = MAX_IMAGE_BYTES + MAX_TEXT_BYTES + 64 * 1024;

pub fn router(svc: RelayService) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(svc)
}

//! HTTP router assembly.

pub mod audio;
pub mod chat;
pub mod control;
pub mod health;
pub mod live;
pub mod transcription;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::state::SharedState;

/// Uploads are capped at 50 MB.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.settings.cors_allow_origins);

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/status", get(control::status))
        .route("/start", post(control::start_listener))
        .route("/stop", post(control::stop_listener))
        .route("/shutdown", post(control::shutdown_server))
        .route("/live", get(live::live_latest))
        .route("/_temp/:name", get(live::temp_file))
        .route("/audio/devices", get(audio::get_devices))
        .route("/audio/select", post(audio::select_device))
        .route("/transcribe", post(transcription::transcribe_endpoint))
        .route("/chat", post(chat::chat_endpoint))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "server", origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}

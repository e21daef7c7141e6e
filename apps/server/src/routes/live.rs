//! Live snapshot polling and synthesized-audio serving.

use std::time::Duration;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use jarvin_core::LiveSnapshot;
use serde::Deserialize;

use crate::state::SharedState;

#[derive(Deserialize, Default)]
pub struct LiveQuery {
    /// Long-poll: block until `seq` passes this value or a status flips.
    pub since: Option<u64>,
    pub timeout_ms: Option<u64>,
}

/// Latest snapshot; with `since` this long-polls via the live-state waiters.
pub async fn live_latest(
    State(state): State<SharedState>,
    Query(query): Query<LiveQuery>,
) -> Json<LiveSnapshot> {
    let timeout = Duration::from_millis(query.timeout_ms.unwrap_or(25_000).min(60_000));
    Json(state.live.wait_next(query.since, Some(timeout)).await)
}

/// Serve a synthesized WAV from the temp directory (the `tts_url` target).
pub async fn temp_file(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    // Only bare file names are served; anything path-like is rejected.
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return (StatusCode::BAD_REQUEST, "invalid file name").into_response();
    }
    let path = state.settings.temp_dir.join(&name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "no such file").into_response(),
    }
}

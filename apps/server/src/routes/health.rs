//! Liveness probe.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::SharedState;

/// Process-level `ok` plus whether the listener task is running.
pub async fn healthz(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "listening": state.listening().await,
    }))
}

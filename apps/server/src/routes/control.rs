//! Listener lifecycle and server shutdown.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub listening: bool,
}

#[derive(Serialize)]
pub struct SimpleMessage {
    pub ok: bool,
    pub message: String,
}

impl SimpleMessage {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        listening: state.listening().await,
    })
}

pub async fn start_listener(State(state): State<SharedState>) -> Json<SimpleMessage> {
    if state.start_listener(Duration::ZERO).await {
        info!(target: "server", "Listener started via control API");
        SimpleMessage::ok("Listener started.")
    } else {
        SimpleMessage::ok("Listener already running.")
    }
}

pub async fn stop_listener(State(state): State<SharedState>) -> Json<SimpleMessage> {
    if state.request_stop().await {
        info!(target: "server", "Listener stop requested via control API");
        SimpleMessage::ok("Listener stopping...")
    } else {
        SimpleMessage::ok("Listener already stopped.")
    }
}

/// Stop the listener, then ask the server to exit *after* this response is
/// sent so the client sees a clean 200.
pub async fn shutdown_server(State(state): State<SharedState>) -> Json<SimpleMessage> {
    info!(target: "server", "Shutdown requested via control API");
    state.stop_listener(Duration::from_secs(3)).await;

    let state = state.clone();
    tokio::spawn(async move {
        // Give the client a moment to fully receive the response.
        tokio::time::sleep(Duration::from_millis(150)).await;
        if let Some(tx) = state.shutdown_tx.lock().await.take() {
            info!(target: "server", "Signaling server exit");
            let _ = tx.send(());
        }
    });

    SimpleMessage::ok("Server is shutting down...")
}

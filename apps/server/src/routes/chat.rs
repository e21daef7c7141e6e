//! Stateless chat endpoint with optional server-side memory.

use axum::extract::State;
use axum::Json;
use jarvin_core::llm::build_context;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub user_text: String,
    pub context: Option<String>,
    pub system_instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub use_history: bool,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_true")]
    pub use_profile: bool,
}

fn default_true() -> bool {
    true
}

fn default_history_window() -> usize {
    6
}

/// `{reply}` on success, `{error}` on failure. The client may pass a
/// prebuilt context; otherwise one is assembled from the store.
pub async fn chat_endpoint(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Json<Value> {
    let text = payload.user_text.trim().to_string();
    if text.is_empty() {
        return Json(json!({ "error": "empty user_text" }));
    }

    let context = match payload.context {
        Some(ctx) if !ctx.trim().is_empty() => Some(ctx),
        _ => {
            let profile = if payload.use_profile {
                state.store.get_user_profile().unwrap_or_default()
            } else {
                Default::default()
            };
            let history = if payload.use_history {
                state.store.get_history(None).unwrap_or_default()
            } else {
                Vec::new()
            };
            let ctx = build_context(&profile, &history, payload.history_window);
            if ctx.is_empty() {
                None
            } else {
                Some(ctx)
            }
        }
    };

    match state
        .assistant
        .reply_with(
            &text,
            context.as_deref(),
            payload.system_instructions.as_deref(),
            payload.temperature,
            payload.max_tokens,
        )
        .await
    {
        Ok(reply) => Json(json!({ "reply": reply })),
        Err(e) => {
            warn!(target: "server", error = %e, "Chat generation failed");
            Json(json!({ "error": "chat generation failed" }))
        }
    }
}

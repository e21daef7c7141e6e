//! One-off transcription of an uploaded WAV.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use jarvin_core::paths::temp_unique_path;
use jarvin_core::Transcriber;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::state::SharedState;

fn error(message: &str) -> Json<Value> {
    Json(json!({ "error": message }))
}

/// Multipart upload (`audio_file` field) -> `{transcribed_text}` | `{error}`.
pub async fn transcribe_endpoint(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Json<Value> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("audio_file") {
                    continue;
                }
                let content_type = field.content_type().unwrap_or("").to_lowercase();
                if !content_type.is_empty()
                    && !content_type.starts_with("audio/")
                    && content_type != "application/octet-stream"
                {
                    return error(&format!("unsupported content type: {}", content_type));
                }
                let filename = field.file_name().unwrap_or("upload.wav").to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((filename, bytes.to_vec()));
                        break;
                    }
                    Err(e) => return error(&format!("failed to read upload: {}", e)),
                }
            }
            Ok(None) => break,
            Err(e) => return error(&format!("malformed multipart body: {}", e)),
        }
    }

    let Some((filename, data)) = upload else {
        return error("missing audio_file field");
    };
    if data.is_empty() {
        return error("empty upload");
    }

    let path = match temp_unique_path(&state.settings.temp_dir, "up_", ".wav") {
        Ok(p) => p,
        Err(e) => return error(&format!("temp dir unavailable: {}", e)),
    };
    if let Err(e) = tokio::fs::write(&path, &data).await {
        return error(&format!("failed to store upload: {}", e));
    }
    info!(
        target: "server",
        file = %filename,
        bytes = data.len(),
        "Received upload for one-off transcription"
    );

    let asr = Arc::clone(&state.asr);
    let asr_path = path.clone();
    let result = tokio::task::spawn_blocking(move || asr.transcribe(&asr_path)).await;
    let _ = tokio::fs::remove_file(&path).await;

    match result {
        Ok(Ok(text)) => Json(json!({ "transcribed_text": text })),
        Ok(Err(e)) => {
            warn!(target: "server", error = %e, "One-off transcription failed");
            error("transcription failed")
        }
        Err(e) => {
            warn!(target: "server", error = %e, "Transcription worker failed");
            error("transcription failed")
        }
    }
}

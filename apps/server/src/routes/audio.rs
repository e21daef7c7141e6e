//! Input device listing and selection.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use jarvin_core::audio::{list_input_devices, selected_input_device, set_selected_input_device, AudioDevice};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::SharedState;

#[derive(Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<AudioDevice>,
    pub selected_index: Option<usize>,
    pub selected_name: Option<String>,
}

#[derive(Deserialize)]
pub struct SelectRequest {
    pub index: usize,
    #[serde(default = "default_restart")]
    pub restart: bool,
}

fn default_restart() -> bool {
    true
}

#[derive(Serialize)]
pub struct SelectResponse {
    pub ok: bool,
    pub selected_index: Option<usize>,
    pub selected_name: Option<String>,
    pub message: Option<String>,
}

pub async fn get_devices(State(_state): State<SharedState>) -> Json<DevicesResponse> {
    let devices = match list_input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(target: "server", error = %e, "Failed to enumerate input devices");
            Vec::new()
        }
    };
    let selected = selected_input_device();
    Json(DevicesResponse {
        devices,
        selected_index: selected.as_ref().map(|d| d.index),
        selected_name: selected.map(|d| d.name),
    })
}

/// Pin an input device; with `restart`, bounce the listener so the new
/// device takes effect immediately.
pub async fn select_device(
    State(state): State<SharedState>,
    Json(payload): Json<SelectRequest>,
) -> Json<SelectResponse> {
    let name = list_input_devices()
        .ok()
        .and_then(|devs| devs.into_iter().find(|d| d.index == payload.index))
        .map(|d| d.name);
    set_selected_input_device(payload.index, name.clone());

    if payload.restart {
        info!(target: "server", "Restarting listener to apply new input device");
        state.stop_listener(Duration::from_millis(2_500)).await;
        state.start_listener(Duration::ZERO).await;
    }

    Json(SelectResponse {
        ok: true,
        selected_index: Some(payload.index),
        selected_name: name,
        message: Some("applied".into()),
    })
}

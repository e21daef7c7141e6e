use std::sync::Arc;
use std::time::Duration;

use jarvin_core::{
    Assistant, CliTts, ConversationStore, Settings, Synthesizer, Transcriber, UtterancePipeline,
    WhisperCliAsr,
};
use jarvin_server::routes;
use jarvin_server::state::AppState;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Env overrides first so JARVIN_LOG_LEVEL can shape the filter.
    let settings = Settings::load();
    init_logging(&settings.log_level);

    info!(
        target = "server",
        "Starting Jarvin: Mic -> VAD -> ASR -> LLM -> TTS"
    );

    jarvin_core::paths::ensure_temp_dir(&settings.temp_dir)?;
    let store = Arc::new(ConversationStore::open(&settings.db_path()?)?);
    let asr: Arc<dyn Transcriber> = Arc::new(WhisperCliAsr::from_settings(&settings));
    let assistant = Arc::new(Assistant::from_settings(&settings)?);
    let tts: Arc<dyn Synthesizer> = Arc::new(CliTts::from_settings(&settings));
    let pipeline = Arc::new(UtterancePipeline::new(
        &settings,
        Arc::clone(&asr),
        Arc::clone(&assistant) as _,
        tts,
        Arc::clone(&store),
    ));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state = Arc::new(AppState {
        live: Arc::new(jarvin_core::LiveState::new()),
        store,
        pipeline,
        asr,
        assistant,
        listener: Mutex::new(None),
        shutdown_tx: Mutex::new(Some(shutdown_tx)),
        settings: settings.clone(),
    });

    if settings.start_listener_on_boot {
        state
            .start_listener(Duration::from_secs_f32(settings.initial_listener_delay_sec))
            .await;
        info!(target = "server", "Listener task started automatically on boot");
    } else {
        info!(
            target = "server",
            "start_listener_on_boot is off; server starts deaf, use POST /start"
        );
    }

    let app = routes::build_router(Arc::clone(&state));
    let addr = format!("{}:{}", settings.server_host, settings.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(target = "server", url = %format!("http://{}", addr), "Control API ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_rx))
        .await?;

    info!(target = "server", "Shutting down listener...");
    state.stop_listener(Duration::from_secs(3)).await;
    info!(target = "server", "Jarvin stopped");
    Ok(())
}

/// Resolve on Ctrl+C or a POST /shutdown signal, whichever comes first.
async fn shutdown_signal(shutdown_rx: oneshot::Receiver<()>) {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    tokio::select! {
        _ = ctrl_c => info!(target = "server", "Ctrl+C received"),
        _ = shutdown_rx => {}
    }
}

fn init_logging(level: &str) {
    // Our levels mirror the config surface; tracing has no "critical".
    let default = match level {
        "debug" => "debug",
        "warning" => "warn",
        "error" | "critical" => "error",
        _ => "info",
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

//! Shared server state and listener lifecycle management.

use std::sync::Arc;
use std::time::Duration;

use jarvin_core::{
    run_listener, Assistant, ConversationStore, FrameSource, ListenerDeps, LiveState, MicStream,
    Settings, SourceFactory, StopEvent, Transcriber, UtterancePipeline,
};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One running listener: its private stop event plus the task handle.
pub struct ListenerHandle {
    pub stop: Arc<StopEvent>,
    pub task: JoinHandle<()>,
}

pub struct AppState {
    pub settings: Settings,
    pub live: Arc<LiveState>,
    pub store: Arc<ConversationStore>,
    pub pipeline: Arc<UtterancePipeline>,
    pub asr: Arc<dyn Transcriber>,
    pub assistant: Arc<Assistant>,
    pub listener: Mutex<Option<ListenerHandle>>,
    /// Fires once to begin graceful server shutdown.
    pub shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub async fn listening(&self) -> bool {
        match self.listener.lock().await.as_ref() {
            Some(handle) => !handle.task.is_finished(),
            None => false,
        }
    }

    /// Start the listener if it is not already running. Returns false when a
    /// run was already active.
    pub async fn start_listener(self: &Arc<Self>, initial_delay: Duration) -> bool {
        let mut guard = self.listener.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.task.is_finished() {
                return false;
            }
        }

        let stop = Arc::new(StopEvent::new());
        let deps = self.listener_deps();
        let task = tokio::spawn(run_listener(deps, Arc::clone(&stop), initial_delay));
        *guard = Some(ListenerHandle { stop, task });
        info!(target: "server", "Listener task started");
        true
    }

    /// Signal the current run to stop without waiting for it.
    pub async fn request_stop(&self) -> bool {
        let guard = self.listener.lock().await;
        match guard.as_ref() {
            Some(handle) if !handle.task.is_finished() => {
                handle.stop.set();
                true
            }
            _ => false,
        }
    }

    /// Stop the current run and wait for it (bounded by `grace`).
    pub async fn stop_listener(&self, grace: Duration) {
        let handle = self.listener.lock().await.take();
        if let Some(handle) = handle {
            handle.stop.set();
            if !handle.task.is_finished() {
                if let Err(e) = tokio::time::timeout(grace, handle.task).await {
                    warn!(target: "server", error = %e, "Listener did not stop within grace period");
                }
            }
        }
    }

    fn listener_deps(&self) -> ListenerDeps {
        let settings = self.settings.clone();
        let factory: SourceFactory = Arc::new(move || {
            // Resolve the (possibly user-pinned) device at open time so a
            // restart picks up /audio/select changes.
            let device_index = match jarvin_core::audio::default_input_device_index() {
                Ok(index) => Some(index),
                Err(e) => {
                    warn!(target: "server", error = %e, "No resolvable input device; trying system default");
                    None
                }
            };
            let mut mic = MicStream::new(settings.sample_rate, settings.chunk, device_index);
            mic.open()?;
            Ok(Box::new(mic) as Box<dyn FrameSource>)
        });

        ListenerDeps {
            settings: self.settings.clone(),
            live: Arc::clone(&self.live),
            store: Arc::clone(&self.store),
            pipeline: Arc::clone(&self.pipeline),
            asr: Arc::clone(&self.asr),
            source_factory: factory,
        }
    }
}

//! Listener orchestrator.
//!
//! Owns the VAD for a run, drives the utterance loop, publishes live state,
//! and handles voice shutdown intents. The orchestrator itself is one
//! cooperative tokio task; the capture/VAD loop runs on a blocking worker
//! feeding a bounded channel, and a watcher task translates the external
//! stop event into `SourceControl::stop` so blocking device reads unblock
//! within a frame duration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio::task;
use tracing::{error, info, warn};

use crate::audio::vad::RecordingCallback;
use crate::audio::{FrameSource, NoiseGateVad, Utterance};
use crate::config::Settings;
use crate::intents::{intent_confirm, intent_shutdown, CONFIRM_WINDOW_SEC};
use crate::live::{LiveState, SnapshotUpdate};
use crate::memory::{ConversationStore, Role};
use crate::pipeline::UtterancePipeline;
use crate::{Result, Transcriber};

const CONFIRM_PROMPT: &str = "To confirm shutdown, say: 'confirm shutdown'.";

/// Cooperative cancellation signal shared between the HTTP layer and the
/// listener. Once set it stays set for the rest of the run.
#[derive(Default)]
pub struct StopEvent {
    flag: AtomicBool,
    notify: Notify,
}

impl StopEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Wait for the event with a timeout; true iff the event fired.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Opens a fresh frame source for one listener run.
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

pub struct ListenerDeps {
    pub settings: Settings,
    pub live: Arc<LiveState>,
    pub store: Arc<ConversationStore>,
    pub pipeline: Arc<UtterancePipeline>,
    pub asr: Arc<dyn Transcriber>,
    pub source_factory: SourceFactory,
}

/// The run-loop: calibrate, iterate utterances, process, publish.
///
/// Returns when `stop` fires, the source ends, or a voice shutdown intent
/// lands. All exit paths publish `recording=false, processing=false`.
pub async fn run_listener(deps: ListenerDeps, stop: Arc<StopEvent>, initial_delay: Duration) {
    if !initial_delay.is_zero() && stop.wait_timeout(initial_delay).await {
        return;
    }

    // Warm-start ASR so the first utterance does not pay model setup.
    {
        let asr = Arc::clone(&deps.asr);
        match task::spawn_blocking(move || asr.warm_up()).await {
            Ok(Ok(())) => {
                info!(target: "listener", engine = %deps.asr.describe(), "ASR ready")
            }
            Ok(Err(e)) => warn!(target: "listener", error = %e, "ASR warm-up failed"),
            Err(e) => warn!(target: "listener", error = %e, "ASR warm-up worker failed"),
        }
    }

    let source = {
        let factory = Arc::clone(&deps.source_factory);
        match task::spawn_blocking(move || factory()).await {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => {
                error!(target: "listener", error = %e, "Failed to open audio source");
                deps.live.publish_status(Some(false), Some(false));
                return;
            }
            Err(e) => {
                error!(target: "listener", error = %e, "Audio source worker failed");
                deps.live.publish_status(Some(false), Some(false));
                return;
            }
        }
    };
    let control = source.control();

    // Translate the external stop into a device stop so blocking reads
    // unblock promptly.
    let watcher = {
        let stop = Arc::clone(&stop);
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            stop.wait().await;
            control.stop();
        })
    };

    let settings = deps.settings.clone();
    let (utt_tx, mut utt_rx) = mpsc::channel::<Result<Utterance>>(1);
    let vad_worker = {
        let live = Arc::clone(&deps.live);
        let vad_cfg = settings.vad_config();
        let calibration_sec = settings.vad_calibration_sec;
        task::spawn_blocking(move || {
            let on_recording: RecordingCallback =
                Box::new(move |flag| live.publish_status(Some(flag), None));
            let mut vad = NoiseGateVad::new(source, vad_cfg).with_recording_callback(on_recording);

            info!(
                target: "listener",
                chunk = vad.config().chunk,
                frame_ms = vad.config().frame_ms(),
                "Calibrating noise floor for {:.1}s...",
                calibration_sec
            );
            if let Err(e) = vad.calibrate(calibration_sec) {
                warn!(target: "listener", error = %e, "Calibration aborted");
                vad.close();
                return;
            }

            loop {
                match vad.next_utterance() {
                    Ok(Some(utt)) => {
                        if utt_tx.blocking_send(Ok(utt)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        if utt_tx.blocking_send(Err(e)).is_err() {
                            break;
                        }
                    }
                }
            }
            vad.close();
        })
    };

    deps.live.publish_status(Some(false), Some(false));
    let mut pending_shutdown_deadline: Option<Instant> = None;

    while !stop.is_set() {
        let cycle_t0 = Instant::now();

        let utterance = match utt_rx.recv().await {
            None => break, // end-of-stream
            Some(Err(e)) => {
                if stop.is_set() {
                    break;
                }
                error!(target: "listener", error = %e, "VAD stream error");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            Some(Ok(utt)) => utt,
        };

        deps.live.publish_status(None, Some(true));

        let outcome = match deps
            .pipeline
            .process(utterance.pcm, utterance.sample_rate)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(target: "listener", error = %e, "Utterance processing failed");
                deps.live.publish_status(None, Some(false));
                continue;
            }
        };
        let text = outcome.transcript.clone();
        let reply = outcome.reply.clone();

        // Voice shutdown handling (no hard exit; just stop the listener).
        if !settings.voice_shutdown_confirm {
            if !text.is_empty() && intent_shutdown(&text) {
                info!(target: "listener", "Voice shutdown requested. Stopping listener...");
                deps.live.publish_status(None, Some(false));
                stop.set();
                break;
            }
        } else {
            let now = Instant::now();
            if pending_shutdown_deadline.is_some_and(|d| now > d) {
                pending_shutdown_deadline = None;
            }
            if pending_shutdown_deadline.is_none() {
                if !text.is_empty() && intent_shutdown(&text) {
                    pending_shutdown_deadline =
                        Some(now + Duration::from_secs_f64(CONFIRM_WINDOW_SEC));
                    info!(
                        target: "listener",
                        window_sec = CONFIRM_WINDOW_SEC,
                        "Shutdown intent detected; waiting for confirmation"
                    );
                    deps.live.publish_snapshot(SnapshotUpdate {
                        transcript: Some(text),
                        reply: Some(CONFIRM_PROMPT.to_string()),
                        utter_ms: Some(outcome.timings.utter_ms),
                        cycle_ms: None,
                        wav_path: Some(outcome.wav_path.display().to_string()),
                        tts_url: None,
                    });
                    deps.live.publish_status(None, Some(false));
                    stop.wait_timeout(Duration::from_millis(50)).await;
                    continue;
                }
            } else if !text.is_empty() && intent_confirm(&text) {
                info!(target: "listener", "Voice confirmation received. Stopping listener...");
                deps.live.publish_status(None, Some(false));
                stop.set();
                break;
            }
        }

        let cycle_ms = cycle_t0.elapsed().as_millis() as u32;
        if text.is_empty() {
            info!(
                target: "listener",
                asr_ms = outcome.timings.transcribe_ms,
                "[result] (empty)"
            );
        } else {
            info!(
                target: "listener",
                asr_ms = outcome.timings.transcribe_ms,
                "[result] {:?}",
                text
            );
        }
        if !reply.is_empty() {
            info!(target: "listener", "[reply] {}", reply);
        }
        info!(target: "listener", cycle_ms, "[cycle] done");

        // Persist the turn for future context.
        if !text.is_empty() {
            if let Err(e) = deps.store.append_turn(Role::User, &text, None) {
                warn!(target: "listener", error = %e, "Failed to persist user turn");
            }
        }
        if !reply.is_empty() {
            if let Err(e) = deps.store.append_turn(Role::Assistant, &reply, None) {
                warn!(target: "listener", error = %e, "Failed to persist assistant turn");
            }
        }

        let tts_url = outcome
            .tts_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| format!("/_temp/{}", name.to_string_lossy()));
        deps.live.publish_snapshot(SnapshotUpdate {
            transcript: if text.is_empty() { None } else { Some(text) },
            reply: if reply.is_empty() { None } else { Some(reply) },
            utter_ms: Some(outcome.timings.utter_ms),
            cycle_ms: Some(cycle_ms),
            wav_path: Some(outcome.wav_path.display().to_string()),
            tts_url,
        });
        deps.live.publish_status(None, Some(false));

        stop.wait_timeout(Duration::from_millis(50)).await;
    }

    watcher.abort();
    control.stop();
    utt_rx.close();
    let _ = vad_worker.await;
    deps.live.publish_status(Some(false), Some(false));
}

//! Per-utterance processing: persist WAV, transcribe, reply, synthesize.
//!
//! Strictly sequential per call and free of shared mutable state; blocking
//! stages run on worker threads so the orchestrator task stays responsive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::task;
use tracing::warn;

use crate::asr::Transcriber;
use crate::audio::wav;
use crate::config::Settings;
use crate::llm::{build_context, ChatEngine};
use crate::memory::ConversationStore;
use crate::paths::temp_unique_path;
use crate::tts::Synthesizer;
use crate::{JarvinError, Result};

#[derive(Clone, Copy, Debug, Default)]
pub struct Timings {
    pub utter_ms: u32,
    pub transcribe_ms: u32,
    pub reply_ms: u32,
    pub tts_ms: u32,
}

#[derive(Clone, Debug)]
pub struct UtteranceOutcome {
    pub transcript: String,
    pub reply: String,
    pub timings: Timings,
    pub wav_path: PathBuf,
    pub tts_path: Option<PathBuf>,
}

pub struct UtterancePipeline {
    temp_dir: PathBuf,
    normalize_to_dbfs: Option<f32>,
    history_window: usize,
    asr: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatEngine>,
    tts: Arc<dyn Synthesizer>,
    store: Arc<ConversationStore>,
}

impl UtterancePipeline {
    pub fn new(
        settings: &Settings,
        asr: Arc<dyn Transcriber>,
        chat: Arc<dyn ChatEngine>,
        tts: Arc<dyn Synthesizer>,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            temp_dir: settings.temp_dir.clone(),
            normalize_to_dbfs: settings.normalize_to_dbfs,
            history_window: settings.history_window,
            asr,
            chat,
            tts,
            store,
        }
    }

    /// Run one utterance through the whole chain.
    ///
    /// An ASR failure aborts the call; LLM and TTS failures degrade (empty
    /// reply / no synthesized audio) so the loop still publishes what it has.
    pub async fn process(&self, pcm: Vec<i16>, sample_rate: u32) -> Result<UtteranceOutcome> {
        let mut timings = Timings {
            utter_ms: ((pcm.len() as u64 * 1000) / sample_rate.max(1) as u64) as u32,
            ..Timings::default()
        };

        let wav_path = temp_unique_path(&self.temp_dir, "live_", ".wav")?;
        {
            let path = wav_path.clone();
            let normalize = self.normalize_to_dbfs;
            run_blocking(move || wav::write_int16_mono(&path, &pcm, sample_rate, normalize))
                .await?;
        }

        let t0 = Instant::now();
        let transcript = {
            let asr = Arc::clone(&self.asr);
            let path = wav_path.clone();
            run_blocking(move || asr.transcribe(&path)).await?
        };
        let transcript = transcript.trim().to_string();
        timings.transcribe_ms = t0.elapsed().as_millis() as u32;

        let mut reply = String::new();
        if !transcript.is_empty() {
            let context = self.reply_context();
            let t1 = Instant::now();
            match self.chat.reply(&transcript, context.as_deref()).await {
                Ok(r) => reply = r,
                Err(e) => warn!(target: "pipeline", error = %e, "Reply generation failed"),
            }
            timings.reply_ms = t1.elapsed().as_millis() as u32;
        }

        let mut tts_path = None;
        if !reply.is_empty() {
            let t2 = Instant::now();
            let tts = Arc::clone(&self.tts);
            let text = reply.clone();
            match run_blocking(move || tts.synth_to_wav(&text)).await {
                Ok(path) => tts_path = Some(path),
                Err(e) => warn!(target: "pipeline", error = %e, "TTS synthesis failed"),
            }
            timings.tts_ms = t2.elapsed().as_millis() as u32;
        }

        Ok(UtteranceOutcome {
            transcript,
            reply,
            timings,
            wav_path,
            tts_path,
        })
    }

    /// Compact profile + recent-history context for the reply, or `None`.
    fn reply_context(&self) -> Option<String> {
        let profile = self.store.get_user_profile().unwrap_or_default();
        let history = self.store.get_history(None).unwrap_or_default();
        let ctx = build_context(&profile, &history, self.history_window);
        if ctx.is_empty() {
            None
        } else {
            Some(ctx)
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| JarvinError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

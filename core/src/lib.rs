// Jarvin Core Library
// Local always-on voice assistant: capture -> VAD -> ASR -> LLM -> TTS

pub mod asr;
pub mod audio;
pub mod config;
pub mod intents;
pub mod listener;
pub mod live;
pub mod llm;
pub mod memory;
pub mod paths;
pub mod pipeline;
pub mod tts;
pub mod util;

// Export core types
pub use asr::{Transcriber, WhisperCliAsr};
pub use audio::{Frame, FrameSource, MicStream, NoiseGateVad, SourceControl, Utterance, VadConfig};
pub use config::Settings;
pub use intents::{intent_confirm, intent_shutdown, CONFIRM_WINDOW_SEC};
pub use listener::{run_listener, ListenerDeps, SourceFactory, StopEvent};
pub use live::{LiveSnapshot, LiveState, SnapshotUpdate};
pub use llm::{Assistant, ChatEngine, LlmClient, LlmClientConfig};
pub use memory::{ConversationStore, Role};
pub use pipeline::{Timings, UtteranceOutcome, UtterancePipeline};
pub use tts::{CliTts, Synthesizer};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JarvinError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No input device available")]
    NoInputDevice,

    #[error("Failed to open capture device: {0}")]
    DeviceOpenFailed(String),

    #[error("Frame read error: {0}")]
    FrameRead(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("ASR error: {0}")]
    Asr(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, JarvinError>;

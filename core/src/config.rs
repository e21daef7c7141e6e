//! Global configuration.
//!
//! Defaults are overridden by `JARVIN_*` environment variables, then by an
//! optional TOML file (path via `JARVIN_CONFIG`, default `jarvin.toml`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::audio::VadConfig;

const ENV_PREFIX: &str = "JARVIN_";

const LOG_LEVELS: [&str; 5] = ["debug", "info", "warning", "error", "critical"];

/// Immutable per-run configuration for the whole assistant.
#[derive(Clone, Debug)]
pub struct Settings {
    // Audio / capture
    pub sample_rate: u32,
    pub chunk: usize,

    // VAD
    pub vad_calibration_sec: f32,
    pub vad_threshold_mult: f32,
    pub vad_threshold_abs: f32,
    pub vad_attack_ms: u32,
    pub vad_release_ms: u32,
    pub vad_hangover_ms: u32,
    pub vad_pre_roll_ms: u32,
    pub vad_min_utterance_ms: u32,
    pub vad_max_utterance_sec: f32,
    pub vad_use_instant_rms_for_trigger: bool,
    pub vad_floor_adapt_margin: f32,
    pub vad_floor_min: f32,
    pub vad_floor_max: f32,

    /// Peak-normalize written WAVs to this dBFS target; `None` disables.
    pub normalize_to_dbfs: Option<f32>,

    // Server
    pub server_host: String,
    pub server_port: u16,
    pub log_level: String,
    pub cors_allow_origins: Vec<String>,

    // Paths
    pub temp_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_filename: String,

    // Listener / startup behavior
    pub start_listener_on_boot: bool,
    pub initial_listener_delay_sec: f32,
    pub voice_shutdown_confirm: bool,

    // ASR (whisper.cpp CLI)
    pub whisper_bin: PathBuf,
    pub whisper_model: PathBuf,
    pub whisper_lang: String,

    // LLM (OpenAI-compatible local server)
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_timeout_ms: u64,
    pub system_instructions: String,
    pub history_window: usize,

    // TTS
    pub piper_bin: Option<PathBuf>,
    pub piper_voice: Option<PathBuf>,
    pub espeak_bin: Option<PathBuf>,
    pub tts_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk: 1024,

            vad_calibration_sec: 1.5,
            vad_threshold_mult: 3.0,
            vad_threshold_abs: 200.0,
            vad_attack_ms: 120,
            vad_release_ms: 350,
            vad_hangover_ms: 300,
            vad_pre_roll_ms: 300,
            vad_min_utterance_ms: 250,
            vad_max_utterance_sec: 30.0,
            vad_use_instant_rms_for_trigger: true,
            vad_floor_adapt_margin: 0.8,
            vad_floor_min: 20.0,
            vad_floor_max: 1000.0,

            normalize_to_dbfs: Some(-3.0),

            server_host: "127.0.0.1".into(),
            server_port: 8000,
            log_level: "info".into(),
            cors_allow_origins: vec!["*".into()],

            temp_dir: PathBuf::from("temp"),
            data_dir: PathBuf::from("data"),
            db_filename: "jarvin.sqlite3".into(),

            start_listener_on_boot: true,
            initial_listener_delay_sec: 0.2,
            voice_shutdown_confirm: false,

            whisper_bin: PathBuf::from("whisper"),
            whisper_model: PathBuf::from("ggml-base.en.bin"),
            whisper_lang: "en".into(),

            llm_base_url: "http://127.0.0.1:11434/v1".into(),
            llm_model: "phi3:mini".into(),
            llm_api_key: None,
            llm_temperature: 0.5,
            llm_max_tokens: 48,
            llm_timeout_ms: 30_000,
            system_instructions: crate::llm::DEFAULT_SYSTEM_INSTRUCTIONS.into(),
            history_window: 6,

            piper_bin: None,
            piper_voice: None,
            espeak_bin: None,
            tts_timeout_ms: 20_000,
        }
    }
}

impl Settings {
    /// Defaults + environment overrides + optional TOML overlay.
    pub fn load() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let mut s = Self::default().overlaid_with_vars(&vars);

        let path = vars
            .get("JARVIN_CONFIG")
            .cloned()
            .unwrap_or_else(|| "jarvin.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::debug!(target = "config", path = %path, "No TOML config found; using defaults/env");
            return s;
        }
        match std::fs::read_to_string(p) {
            Ok(text) => match toml::from_str::<SettingsOverlay>(&text) {
                Ok(overlay) => overlay.apply(&mut s),
                Err(e) => {
                    tracing::warn!(target = "config", error = %e, "Failed to parse TOML; using defaults/env")
                }
            },
            Err(e) => {
                tracing::warn!(target = "config", error = %e, "Failed to read TOML; using defaults/env")
            }
        }
        s
    }

    /// Defaults + environment overrides only (no TOML).
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::default().overlaid_with_vars(&vars)
    }

    /// Apply `JARVIN_*` overrides from an explicit variable map.
    pub fn overlaid_with_vars(mut self, vars: &HashMap<String, String>) -> Self {
        set(vars, "SAMPLE_RATE", &mut self.sample_rate);
        set(vars, "CHUNK", &mut self.chunk);

        set(vars, "VAD_CALIBRATION_SEC", &mut self.vad_calibration_sec);
        set(vars, "VAD_THRESHOLD_MULT", &mut self.vad_threshold_mult);
        set(vars, "VAD_THRESHOLD_ABS", &mut self.vad_threshold_abs);
        set(vars, "VAD_ATTACK_MS", &mut self.vad_attack_ms);
        set(vars, "VAD_RELEASE_MS", &mut self.vad_release_ms);
        set(vars, "VAD_HANGOVER_MS", &mut self.vad_hangover_ms);
        set(vars, "VAD_PRE_ROLL_MS", &mut self.vad_pre_roll_ms);
        set(vars, "VAD_MIN_UTTERANCE_MS", &mut self.vad_min_utterance_ms);
        set(vars, "VAD_MAX_UTTERANCE_SEC", &mut self.vad_max_utterance_sec);
        set_flag(
            vars,
            "VAD_USE_INSTANT_RMS_FOR_TRIGGER",
            &mut self.vad_use_instant_rms_for_trigger,
        );
        set(vars, "VAD_FLOOR_ADAPT_MARGIN", &mut self.vad_floor_adapt_margin);
        set(vars, "VAD_FLOOR_MIN", &mut self.vad_floor_min);
        set(vars, "VAD_FLOOR_MAX", &mut self.vad_floor_max);

        if let Some(v) = get(vars, "NORMALIZE_TO_DBFS") {
            self.normalize_to_dbfs = parse_optional_dbfs(&v);
        }

        if let Some(v) = get(vars, "SERVER_HOST") {
            self.server_host = v;
        }
        set(vars, "SERVER_PORT", &mut self.server_port);
        if let Some(v) = get(vars, "LOG_LEVEL") {
            self.log_level = normalize_log_level(&v);
        }
        if let Some(v) = get(vars, "CORS_ALLOW_ORIGINS") {
            self.cors_allow_origins = parse_origins(&v);
        }

        set_path(vars, "TEMP_DIR", &mut self.temp_dir);
        set_path(vars, "DATA_DIR", &mut self.data_dir);
        if let Some(v) = get(vars, "DB_FILENAME") {
            self.db_filename = v;
        }

        set_flag(vars, "START_LISTENER_ON_BOOT", &mut self.start_listener_on_boot);
        set(
            vars,
            "INITIAL_LISTENER_DELAY_SEC",
            &mut self.initial_listener_delay_sec,
        );
        set_flag(vars, "VOICE_SHUTDOWN_CONFIRM", &mut self.voice_shutdown_confirm);

        set_path(vars, "WHISPER_BIN", &mut self.whisper_bin);
        set_path(vars, "WHISPER_MODEL", &mut self.whisper_model);
        if let Some(v) = get(vars, "WHISPER_LANG") {
            self.whisper_lang = v;
        }

        if let Some(v) = get(vars, "LLM_BASE_URL") {
            self.llm_base_url = v;
        }
        if let Some(v) = get(vars, "LLM_MODEL") {
            self.llm_model = v;
        }
        if let Some(v) = get(vars, "LLM_API_KEY") {
            self.llm_api_key = if v.is_empty() { None } else { Some(v) };
        }
        set(vars, "LLM_TEMPERATURE", &mut self.llm_temperature);
        set(vars, "LLM_MAX_TOKENS", &mut self.llm_max_tokens);
        set(vars, "LLM_TIMEOUT_MS", &mut self.llm_timeout_ms);
        if let Some(v) = get(vars, "SYSTEM_INSTRUCTIONS") {
            if !v.trim().is_empty() {
                self.system_instructions = v;
            }
        }
        set(vars, "HISTORY_WINDOW", &mut self.history_window);

        if let Some(v) = get(vars, "PIPER_BIN") {
            self.piper_bin = non_empty_path(&v);
        }
        if let Some(v) = get(vars, "PIPER_VOICE") {
            self.piper_voice = non_empty_path(&v);
        }
        if let Some(v) = get(vars, "ESPEAK_BIN") {
            self.espeak_bin = non_empty_path(&v);
        }
        set(vars, "TTS_TIMEOUT_MS", &mut self.tts_timeout_ms);

        self
    }

    /// Duration of one capture frame in milliseconds.
    pub fn frame_ms(&self) -> u32 {
        ((self.chunk as u64 * 1000) / self.sample_rate.max(1) as u64) as u32
    }

    /// Derive the VAD configuration from these settings.
    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            sample_rate: self.sample_rate,
            chunk: self.chunk,
            calibration_sec: self.vad_calibration_sec,
            threshold_mult: self.vad_threshold_mult,
            threshold_abs: self.vad_threshold_abs,
            attack_ms: self.vad_attack_ms,
            release_ms: self.vad_release_ms,
            hangover_ms: self.vad_hangover_ms,
            pre_roll_ms: self.vad_pre_roll_ms,
            min_utterance_ms: self.vad_min_utterance_ms,
            max_utterance_sec: self.vad_max_utterance_sec,
            use_instant_rms_for_trigger: self.vad_use_instant_rms_for_trigger,
            floor_adapt_margin: self.vad_floor_adapt_margin,
            floor_min: self.vad_floor_min,
            floor_max: self.vad_floor_max,
            ..VadConfig::default()
        }
    }

    /// Absolute path of the conversation database; creates `data_dir`.
    pub fn db_path(&self) -> crate::Result<PathBuf> {
        let dir = if self.data_dir.is_absolute() {
            self.data_dir.clone()
        } else {
            std::env::current_dir()?.join(&self.data_dir)
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(&self.db_filename))
    }
}

fn get(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(&format!("{}{}", ENV_PREFIX, key)).cloned()
}

fn set<T: FromStr>(vars: &HashMap<String, String>, key: &str, target: &mut T) {
    if let Some(v) = get(vars, key) {
        if let Ok(parsed) = v.trim().parse::<T>() {
            *target = parsed;
        }
    }
}

fn set_flag(vars: &HashMap<String, String>, key: &str, target: &mut bool) {
    if let Some(v) = get(vars, key) {
        *target = matches!(
            v.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
}

fn set_path(vars: &HashMap<String, String>, key: &str, target: &mut PathBuf) {
    if let Some(v) = get(vars, key) {
        if !v.trim().is_empty() {
            *target = PathBuf::from(v);
        }
    }
}

fn non_empty_path(v: &str) -> Option<PathBuf> {
    let v = v.trim();
    if v.is_empty() {
        None
    } else {
        Some(PathBuf::from(v))
    }
}

/// Invalid levels fall back to "info" rather than failing startup.
fn normalize_log_level(v: &str) -> String {
    let lvl = v.trim().to_lowercase();
    if LOG_LEVELS.contains(&lvl.as_str()) {
        lvl
    } else {
        "info".into()
    }
}

/// `"none"`/`"auto"`/empty disable normalization.
fn parse_optional_dbfs(v: &str) -> Option<f32> {
    let v = v.trim().to_lowercase();
    if v.is_empty() || v == "none" || v == "auto" {
        return None;
    }
    v.parse::<f32>().ok()
}

/// CORS origins arrive as a JSON list, e.g. `["http://localhost:3000"]`.
fn parse_origins(v: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(v) {
        Ok(list) if !list.is_empty() => list,
        _ => vec!["*".into()],
    }
}

/// TOML overlay: every field optional, present fields win.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsOverlay {
    sample_rate: Option<u32>,
    chunk: Option<usize>,
    vad_calibration_sec: Option<f32>,
    vad_threshold_mult: Option<f32>,
    vad_threshold_abs: Option<f32>,
    vad_attack_ms: Option<u32>,
    vad_release_ms: Option<u32>,
    vad_hangover_ms: Option<u32>,
    vad_pre_roll_ms: Option<u32>,
    vad_min_utterance_ms: Option<u32>,
    vad_max_utterance_sec: Option<f32>,
    vad_use_instant_rms_for_trigger: Option<bool>,
    vad_floor_adapt_margin: Option<f32>,
    vad_floor_min: Option<f32>,
    vad_floor_max: Option<f32>,
    normalize_to_dbfs: Option<f32>,
    server_host: Option<String>,
    server_port: Option<u16>,
    log_level: Option<String>,
    cors_allow_origins: Option<Vec<String>>,
    temp_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    db_filename: Option<String>,
    start_listener_on_boot: Option<bool>,
    initial_listener_delay_sec: Option<f32>,
    voice_shutdown_confirm: Option<bool>,
    whisper_bin: Option<PathBuf>,
    whisper_model: Option<PathBuf>,
    whisper_lang: Option<String>,
    llm_base_url: Option<String>,
    llm_model: Option<String>,
    llm_api_key: Option<String>,
    llm_temperature: Option<f32>,
    llm_max_tokens: Option<u32>,
    llm_timeout_ms: Option<u64>,
    system_instructions: Option<String>,
    history_window: Option<usize>,
    piper_bin: Option<PathBuf>,
    piper_voice: Option<PathBuf>,
    espeak_bin: Option<PathBuf>,
    tts_timeout_ms: Option<u64>,
}

macro_rules! overlay {
    ($src:ident, $dst:ident, $($field:ident),+ $(,)?) => {
        $( if let Some(v) = $src.$field { $dst.$field = v; } )+
    };
}

impl SettingsOverlay {
    fn apply(self, s: &mut Settings) {
        let o = self;
        overlay!(
            o, s, sample_rate, chunk, vad_calibration_sec, vad_threshold_mult,
            vad_threshold_abs, vad_attack_ms, vad_release_ms, vad_hangover_ms,
            vad_pre_roll_ms, vad_min_utterance_ms, vad_max_utterance_sec,
            vad_use_instant_rms_for_trigger, vad_floor_adapt_margin,
            vad_floor_min, vad_floor_max, server_host, server_port,
            cors_allow_origins, temp_dir, data_dir, db_filename,
            start_listener_on_boot, initial_listener_delay_sec,
            voice_shutdown_confirm, whisper_bin, whisper_model, whisper_lang,
            llm_base_url, llm_model, llm_temperature, llm_max_tokens,
            llm_timeout_ms, system_instructions, history_window, tts_timeout_ms,
        );
        if let Some(v) = o.normalize_to_dbfs {
            s.normalize_to_dbfs = Some(v);
        }
        if let Some(v) = o.log_level {
            s.log_level = normalize_log_level(&v);
        }
        if let Some(v) = o.llm_api_key {
            s.llm_api_key = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = o.piper_bin {
            s.piper_bin = Some(v);
        }
        if let Some(v) = o.piper_voice {
            s.piper_voice = Some(v);
        }
        if let Some(v) = o.espeak_bin {
            s.espeak_bin = Some(v);
        }
    }
}

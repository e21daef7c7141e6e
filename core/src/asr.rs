//! Speech-to-text capability.
//!
//! The contract is deliberately narrow: a blocking `transcribe` that takes a
//! 16-bit mono WAV path and returns whitespace-trimmed text, or an error.
//! The default implementation shells out to a whisper.cpp binary; inputs are
//! first normalized to 16 kHz mono, which whisper.cpp requires.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::audio::wav;
use crate::config::Settings;
use crate::paths::temp_unique_path;
use crate::{JarvinError, Result};

pub trait Transcriber: Send + Sync {
    /// Blocking. Any failure becomes an error return, never a partial string.
    fn transcribe(&self, wav_path: &Path) -> Result<String>;

    /// Validate that the engine can run; called once before the listener
    /// starts so the first utterance does not pay the setup cost.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "asr".into()
    }
}

/// whisper.cpp CLI transcriber.
pub struct WhisperCliAsr {
    bin: PathBuf,
    model: PathBuf,
    language: String,
    temp_dir: PathBuf,
}

impl WhisperCliAsr {
    pub fn new(bin: PathBuf, model: PathBuf, language: String, temp_dir: PathBuf) -> Self {
        Self {
            bin,
            model,
            language,
            temp_dir,
        }
    }

    pub fn from_settings(s: &Settings) -> Self {
        Self::new(
            s.whisper_bin.clone(),
            s.whisper_model.clone(),
            s.whisper_lang.clone(),
            s.temp_dir.clone(),
        )
    }

    /// Rewrite arbitrary-rate input as the 16 kHz mono WAV whisper.cpp wants.
    /// Returns `None` when the input is already in that shape.
    fn normalized_input(&self, wav_path: &Path) -> Result<Option<PathBuf>> {
        let audio = wav::read_as_float32_mono_16k(wav_path)?;
        let spec_matches = hound::WavReader::open(wav_path)
            .map(|r| r.spec().sample_rate == 16_000 && r.spec().channels == 1)
            .unwrap_or(false);
        if spec_matches {
            return Ok(None);
        }
        let pcm: Vec<i16> = audio
            .iter()
            .map(|&f| (f * 32768.0).clamp(-32768.0, 32767.0) as i16)
            .collect();
        let out = temp_unique_path(&self.temp_dir, "asr_", ".wav")?;
        wav::write_int16_mono(&out, &pcm, 16_000, None)?;
        Ok(Some(out))
    }
}

impl Transcriber for WhisperCliAsr {
    fn transcribe(&self, wav_path: &Path) -> Result<String> {
        let resampled = self.normalized_input(wav_path)?;
        let input = resampled.as_deref().unwrap_or(wav_path);

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-m").arg(&self.model);
        cmd.arg("-f").arg(input);
        if !self.language.is_empty() && self.language != "auto" {
            cmd.arg("-l").arg(&self.language);
        }
        cmd.arg("--no-timestamps");
        cmd.arg("--no-prints");

        debug!(target: "asr", command = ?cmd, "Running whisper");
        let output = cmd.output();

        if let Some(tmp) = &resampled {
            let _ = std::fs::remove_file(tmp);
        }

        let output = output.map_err(|e| JarvinError::Asr(format!("failed to run whisper: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JarvinError::Asr(format!(
                "whisper failed with status {}: {}",
                output.status, stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_whisper_stdout(&stdout))
    }

    fn warm_up(&self) -> Result<()> {
        if !self.bin.exists() {
            warn!(
                target: "asr",
                bin = ?self.bin,
                "Whisper binary not found; transcription will fail until JARVIN_WHISPER_BIN points at whisper.cpp"
            );
        } else {
            info!(target: "asr", bin = ?self.bin, "Found whisper binary");
        }
        if !self.model.exists() {
            warn!(
                target: "asr",
                model = ?self.model,
                "Whisper model not found; set JARVIN_WHISPER_MODEL or download a ggml model"
            );
        } else {
            info!(target: "asr", model = ?self.model, "Found whisper model");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("whisper.cpp ({})", self.model.display())
    }
}

/// whisper.cpp prints the transcript to stdout along with loader noise;
/// keep only the text lines.
fn parse_whisper_stdout(stdout: &str) -> String {
    stdout
        .lines()
        .filter(|line| {
            !line.starts_with('[')
                && !line.trim().is_empty()
                && !line.contains("whisper_")
                && !line.contains("load time")
                && !line.contains("system_info")
        })
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_filter_keeps_only_transcript_lines() {
        let raw = "whisper_init_from_file: loading model\n\
                   [00:00.000 --> 00:02.000] ignored timestamp line\n\
                   system_info: n_threads = 4\n\
                   \n\
                   Hello there.\n\
                   General Kenobi.\n";
        assert_eq!(parse_whisper_stdout(raw), "Hello there. General Kenobi.");
    }

    #[test]
    fn stdout_filter_handles_empty_output() {
        assert_eq!(parse_whisper_stdout(""), "");
        assert_eq!(parse_whisper_stdout("whisper_print_timings: total\n"), "");
    }
}

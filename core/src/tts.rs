//! Text-to-speech capability.
//!
//! Synthesizes to a WAV on disk using local CLI engines: Piper when a voice
//! model is available, espeak-ng otherwise. The contract is a blocking
//! `synth_to_wav(text)` returning the path of a non-empty WAV, or an error.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::Settings;
use crate::paths::temp_unique_path;
use crate::{JarvinError, Result};

pub trait Synthesizer: Send + Sync {
    /// Blocking. `text` must be non-empty; the returned WAV is non-empty.
    fn synth_to_wav(&self, text: &str) -> Result<PathBuf>;
}

/// Piper-first, espeak-ng-fallback CLI synthesizer.
pub struct CliTts {
    temp_dir: PathBuf,
    piper_bin: Option<PathBuf>,
    piper_voice: Option<PathBuf>,
    espeak_bin: Option<PathBuf>,
    sample_rate: u32,
    timeout: Duration,
}

impl CliTts {
    pub fn from_settings(s: &Settings) -> Self {
        let piper_bin = s
            .piper_bin
            .clone()
            .filter(|p| p.exists())
            .or_else(|| find_in_path("piper"));
        let espeak_bin = s
            .espeak_bin
            .clone()
            .filter(|p| p.exists())
            .or_else(|| find_in_path("espeak-ng"))
            .or_else(|| find_in_path("espeak"));

        if let Some(ref p) = piper_bin {
            info!(target: "tts", bin = ?p, "Detected Piper binary");
        }
        if let Some(ref e) = espeak_bin {
            info!(target: "tts", bin = ?e, "Detected espeak binary");
        }

        Self {
            temp_dir: s.temp_dir.clone(),
            piper_bin,
            piper_voice: s.piper_voice.clone(),
            espeak_bin,
            sample_rate: s.sample_rate,
            timeout: Duration::from_millis(s.tts_timeout_ms),
        }
    }
}

impl Synthesizer for CliTts {
    fn synth_to_wav(&self, text: &str) -> Result<PathBuf> {
        if text.trim().is_empty() {
            return Err(JarvinError::Tts("received empty text".into()));
        }

        let out = temp_unique_path(&self.temp_dir, "tts_", ".wav")?;

        if let (Some(bin), Some(voice)) = (&self.piper_bin, &self.piper_voice) {
            synth_with_piper(bin, voice, self.sample_rate, text, &out, self.timeout)?;
        } else if let Some(bin) = &self.espeak_bin {
            synth_with_espeak(bin, text, &out, self.timeout)?;
        } else {
            return Err(JarvinError::Tts(
                "no TTS engine available (install piper or espeak-ng)".into(),
            ));
        }

        let size = std::fs::metadata(&out).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            let _ = std::fs::remove_file(&out);
            return Err(JarvinError::Tts("engine produced no audio output".into()));
        }
        Ok(out)
    }
}

fn synth_with_piper(
    bin: &Path,
    voice: &Path,
    sample_rate: u32,
    text: &str,
    out_wav: &Path,
    timeout: Duration,
) -> Result<()> {
    let mut cmd = Command::new(bin);
    cmd.arg("-m").arg(voice);
    cmd.arg("-f").arg(out_wav);
    cmd.arg("--sample_rate").arg(sample_rate.to_string());
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());

    debug!(target: "tts", command = ?cmd, "Running piper");
    let mut child = cmd
        .spawn()
        .map_err(|e| JarvinError::Tts(format!("failed to spawn piper: {}", e)))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .map_err(|e| JarvinError::Tts(format!("failed to feed piper: {}", e)))?;
    }
    wait_with_timeout(child, "piper", timeout)
}

fn synth_with_espeak(bin: &Path, text: &str, out_wav: &Path, timeout: Duration) -> Result<()> {
    let mut cmd = Command::new(bin);
    cmd.arg("-w").arg(out_wav);
    cmd.arg(text);
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());

    debug!(target: "tts", command = ?cmd, "Running espeak");
    let child = cmd
        .spawn()
        .map_err(|e| JarvinError::Tts(format!("failed to spawn espeak: {}", e)))?;
    wait_with_timeout(child, "espeak", timeout)
}

/// Poll the child until it exits or the deadline passes, then kill it.
fn wait_with_timeout(
    mut child: std::process::Child,
    engine: &str,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    return Ok(());
                }
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    use std::io::Read;
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Err(JarvinError::Tts(format!(
                    "{} failed with status {}: {}",
                    engine, status, stderr
                )));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(JarvinError::Tts(format!("{} timed out", engine)));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                return Err(JarvinError::Tts(format!("failed to wait for {}: {}", engine, e)))
            }
        }
    }
}

fn find_in_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }
    if let Some(paths_os) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths_os) {
            let candidate = dir.join(bin);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

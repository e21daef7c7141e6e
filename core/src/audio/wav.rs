//! WAV encode/decode for the pipeline.
//!
//! Written files are canonical 16-bit mono PCM at the capture rate, with
//! optional peak normalization. Reads accept mono or stereo 16-bit PCM and
//! come back as float32 mono at 16 kHz, the shape the ASR contract expects.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::{JarvinError, Result};

const ASR_RATE: u32 = 16_000;

fn wav_err(e: hound::Error) -> JarvinError {
    match e {
        hound::Error::IoError(io) => JarvinError::Io(io),
        other => JarvinError::UnsupportedFormat(other.to_string()),
    }
}

/// Write mono int16 PCM as a canonical WAV, creating parent directories.
///
/// With `normalize_dbfs = Some(d)` the signal is peak-normalized to `d`
/// dBFS before writing; an all-zero signal is written untouched.
pub fn write_int16_mono(
    path: &Path,
    pcm: &[i16],
    sample_rate: u32,
    normalize_dbfs: Option<f32>,
) -> Result<()> {
    let samples: Vec<i16> = match normalize_dbfs {
        Some(target) => peak_normalize_int16(pcm, target),
        None => pcm.to_vec(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;
    for &s in &samples {
        writer.write_sample(s).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}

/// Load a 16-bit PCM WAV (mono or stereo) as float32 mono at 16 kHz.
///
/// Stereo channels are averaged; other rates are linearly resampled.
/// Output samples are in `[-1, 1]`.
pub fn read_as_float32_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let mut reader = WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();

    if spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
        return Err(JarvinError::UnsupportedFormat(format!(
            "expected 16-bit PCM; got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.channels == 0 || spec.channels > 2 {
        return Err(JarvinError::UnsupportedFormat(format!(
            "expected mono or stereo; got {} channels",
            spec.channels
        )));
    }

    let raw: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<_, _>>()
        .map_err(wav_err)?;

    let mut audio: Vec<f32> = if spec.channels == 2 {
        raw.chunks_exact(2)
            .map(|lr| (lr[0] as f32 + lr[1] as f32) / 2.0 / 32768.0)
            .collect()
    } else {
        raw.iter().map(|&s| s as f32 / 32768.0).collect()
    };

    if spec.sample_rate != ASR_RATE {
        audio = linear_resample(&audio, spec.sample_rate, ASR_RATE);
    }
    Ok(audio)
}

/// Linear-interpolation resampler. Identity when the rates already match;
/// adequate for speech and keeps the decode path dependency-free.
pub fn linear_resample(audio: &[f32], src_hz: u32, dst_hz: u32) -> Vec<f32> {
    if src_hz == dst_hz || audio.is_empty() {
        return audio.to_vec();
    }
    let src_len = audio.len();
    let ratio = dst_hz as f64 / src_hz as f64;
    let dst_len = ((src_len as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(dst_len);
    for j in 0..dst_len {
        let pos = j as f64 * src_len as f64 / dst_len as f64;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(src_len - 1);
        let frac = (pos - lo as f64) as f32;
        out.push(audio[lo] * (1.0 - frac) + audio[hi] * frac);
    }
    out
}

/// Scale so the peak lands at `target_dbfs`, clipping into int16 range.
fn peak_normalize_int16(pcm: &[i16], target_dbfs: f32) -> Vec<i16> {
    let peak = pcm.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0);
    if peak == 0 {
        return pcm.to_vec();
    }
    let target_linear = 32767.0 * 10f32.powf(target_dbfs / 20.0);
    let gain = target_linear / peak as f32;
    pcm.iter()
        .map(|&s| (s as f32 * gain).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::gen_id;
    use std::path::PathBuf;

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("jarvin_wav_{}_{}.wav", name, gen_id()))
    }

    #[test]
    fn write_then_read_round_trips_at_16k() {
        let path = temp_wav("roundtrip");
        let pcm: Vec<i16> = (0..1600).map(|i| ((i % 100) as i16 - 50) * 100).collect();
        write_int16_mono(&path, &pcm, 16_000, None).unwrap();

        let audio = read_as_float32_mono_16k(&path).unwrap();
        assert_eq!(audio.len(), pcm.len());
        for (f, s) in audio.iter().zip(&pcm) {
            assert!((f - *s as f32 / 32768.0).abs() < 1e-6);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let audio = vec![0.1, -0.2, 0.3, -0.4];
        assert_eq!(linear_resample(&audio, 16_000, 16_000), audio);
    }

    #[test]
    fn resample_halves_and_doubles_length() {
        let audio: Vec<f32> = (0..800).map(|i| (i as f32 / 800.0).sin()).collect();
        assert_eq!(linear_resample(&audio, 32_000, 16_000).len(), 400);
        assert_eq!(linear_resample(&audio, 8_000, 16_000).len(), 1600);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let path = temp_wav("stereo");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(1000i16).unwrap();
            writer.write_sample(3000i16).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_as_float32_mono_16k(&path).unwrap();
        assert_eq!(audio.len(), 100);
        assert!((audio[0] - 2000.0 / 32768.0).abs() < 1e-6);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn non_16_bit_input_is_rejected() {
        let path = temp_wav("format");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..32 {
            writer.write_sample(1i8).unwrap();
        }
        writer.finalize().unwrap();

        match read_as_float32_mono_16k(&path) {
            Err(JarvinError::UnsupportedFormat(_)) => {}
            other => panic!("expected UnsupportedFormat, got {:?}", other.map(|v| v.len())),
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn normalization_scales_peak_to_target() {
        let pcm = vec![0i16, 8192, -4096, 8192];
        let out = peak_normalize_int16(&pcm, -6.0);
        let peak = out.iter().map(|&s| (s as i32).abs()).max().unwrap();
        let expected = (32767.0 * 10f32.powf(-6.0 / 20.0)) as i32;
        assert!((peak - expected).abs() <= 1, "peak {} vs {}", peak, expected);
        // silence passes through untouched
        assert_eq!(peak_normalize_int16(&[0, 0, 0], -3.0), vec![0, 0, 0]);
    }
}

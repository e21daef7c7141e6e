//! Adaptive noise-gate voice activity detection.
//!
//! Transforms the frame stream from a [`FrameSource`] into a lazy sequence of
//! endpointed utterances. A slow EMA tracks the ambient noise floor, a faster
//! EMA tracks the signal envelope, and an attack/release/hangover state
//! machine debounces the start and end of speech. A bounded pre-roll ring
//! prepends the audio just before the trigger so the first phoneme survives.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Frame, FrameSource, SourceControl, Utterance};
use crate::{JarvinError, Result};

/// Invoked on Idle->Speech (`true`) and Speech->Idle (`false`) transitions.
pub type RecordingCallback = Box<dyn Fn(bool) + Send>;

#[derive(Clone, Debug)]
pub struct VadConfig {
    pub sample_rate: u32,
    pub chunk: usize,
    /// Slow EMA coefficient for the noise floor.
    pub alpha_floor: f32,
    /// Faster EMA coefficient for the envelope.
    pub alpha_env: f32,
    pub calibration_sec: f32,
    pub threshold_mult: f32,
    pub threshold_abs: f32,
    pub attack_ms: u32,
    pub release_ms: u32,
    pub hangover_ms: u32,
    pub pre_roll_ms: u32,
    pub min_utterance_ms: u32,
    pub max_utterance_sec: f32,
    /// Compare the instantaneous RMS against the threshold instead of the
    /// envelope when deciding the trigger.
    pub use_instant_rms_for_trigger: bool,
    /// The floor only adapts while instantaneous RMS stays below
    /// `margin * threshold`, so it never chases near-speech energy.
    pub floor_adapt_margin: f32,
    pub floor_min: f32,
    pub floor_max: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk: 1024,
            alpha_floor: 0.98,
            alpha_env: 0.85,
            calibration_sec: 1.5,
            threshold_mult: 3.0,
            threshold_abs: 200.0,
            attack_ms: 120,
            release_ms: 350,
            hangover_ms: 300,
            pre_roll_ms: 300,
            min_utterance_ms: 250,
            max_utterance_sec: 30.0,
            use_instant_rms_for_trigger: true,
            floor_adapt_margin: 0.8,
            floor_min: 20.0,
            floor_max: 1000.0,
        }
    }
}

impl VadConfig {
    /// Duration of one frame in milliseconds (at least 1).
    pub fn frame_ms(&self) -> u32 {
        (((self.chunk as u64 * 1000) / self.sample_rate.max(1) as u64) as u32).max(1)
    }

    fn attack_needed(&self) -> u32 {
        div_ceil(self.attack_ms, self.frame_ms()).max(1)
    }

    fn release_needed(&self) -> u32 {
        div_ceil(self.release_ms, self.frame_ms()).max(1)
    }

    fn hangover_frames(&self) -> u32 {
        self.hangover_ms / self.frame_ms()
    }

    fn pre_roll_frames(&self) -> usize {
        (self.pre_roll_ms / self.frame_ms()) as usize
    }

    fn max_frames(&self) -> usize {
        (((self.max_utterance_sec as f64 * 1000.0) as u64 / self.frame_ms() as u64) as usize)
            .max(1)
    }
}

pub struct NoiseGateVad {
    source: Box<dyn FrameSource>,
    cfg: VadConfig,

    // Adaptive state
    floor_rms: f32,
    env_rms: f32,

    // State machine
    in_speech: bool,
    above_count: u32,
    below_count: u32,
    hangover: u32,
    current: Vec<Frame>,
    preroll: VecDeque<Frame>,

    frame_idx: u64,
    on_recording: Option<RecordingCallback>,
}

impl NoiseGateVad {
    pub fn new(source: Box<dyn FrameSource>, cfg: VadConfig) -> Self {
        let floor = cfg.floor_min.max(50.0).min(cfg.floor_max);
        Self {
            source,
            floor_rms: floor,
            env_rms: floor,
            in_speech: false,
            above_count: 0,
            below_count: 0,
            hangover: 0,
            current: Vec::new(),
            preroll: VecDeque::with_capacity(cfg.pre_roll_frames()),
            frame_idx: 0,
            on_recording: None,
            cfg,
        }
    }

    pub fn with_recording_callback(mut self, cb: RecordingCallback) -> Self {
        self.on_recording = Some(cb);
        self
    }

    pub fn config(&self) -> &VadConfig {
        &self.cfg
    }

    pub fn floor_rms(&self) -> f32 {
        self.floor_rms
    }

    pub fn env_rms(&self) -> f32 {
        self.env_rms
    }

    /// Stop handle for the underlying source.
    pub fn control(&self) -> Arc<dyn SourceControl> {
        self.source.control()
    }

    /// Release the capture device. Safe to call more than once.
    pub fn close(&mut self) {
        self.source.close();
        self.notify_recording(false);
    }

    fn notify_recording(&self, flag: bool) {
        if let Some(cb) = &self.on_recording {
            // A misbehaving observer must never take down the detector.
            let _ = catch_unwind(AssertUnwindSafe(|| cb(flag)));
        }
    }

    fn threshold(&self) -> f32 {
        self.cfg.threshold_abs.max(self.floor_rms * self.cfg.threshold_mult)
    }

    fn clamp_floor(&self, x: f32) -> f32 {
        x.clamp(self.cfg.floor_min, self.cfg.floor_max)
    }

    /// Estimate the noise floor from the first `seconds` of audio.
    ///
    /// The 10th percentile of per-frame RMS tolerates transient spikes
    /// during startup; the envelope starts at the floor so a cold start
    /// cannot false-trigger.
    pub fn calibrate(&mut self, seconds: f32) -> Result<()> {
        let frame_ms = self.cfg.frame_ms();
        let n_frames = (((seconds as f64 * 1000.0) / frame_ms as f64).ceil() as usize).max(1);
        let mut floors = Vec::with_capacity(n_frames);
        for _ in 0..n_frames {
            match self.source.read_frame()? {
                Some(frame) => floors.push(rms_int16(&frame)),
                None => return Err(JarvinError::Cancelled),
            }
        }
        let p10 = percentile(&floors, 10.0);
        let p90 = percentile(&floors, 90.0);
        self.floor_rms = self.clamp_floor(p10);
        self.env_rms = self.floor_rms;
        info!(
            target: "vad",
            floor = self.floor_rms,
            p10,
            p90,
            thr = self.threshold(),
            "Noise floor calibrated"
        );
        Ok(())
    }

    /// Advance the stream until the next finalized utterance.
    ///
    /// Returns `Ok(None)` when the source signals end-of-stream; a stop mid
    /// utterance discards the partial segment. Frame-read errors propagate
    /// without disturbing detector state.
    pub fn next_utterance(&mut self) -> Result<Option<Utterance>> {
        let attack_needed = self.cfg.attack_needed();
        let release_needed = self.cfg.release_needed();
        let hangover_frames = self.cfg.hangover_frames();
        let pre_frames = self.cfg.pre_roll_frames();
        let max_frames = self.cfg.max_frames();
        let frame_ms = self.cfg.frame_ms();

        loop {
            let frame = match self.source.read_frame()? {
                Some(f) => f,
                None => return Ok(None),
            };
            self.frame_idx += 1;

            if pre_frames > 0 {
                if self.preroll.len() == pre_frames {
                    self.preroll.pop_front();
                }
                self.preroll.push_back(frame.clone());
            }

            let r_inst = rms_int16(&frame);
            self.env_rms = ema(r_inst, self.env_rms, self.cfg.alpha_env);
            let thr = self.threshold();
            let is_above = if self.cfg.use_instant_rms_for_trigger {
                r_inst >= thr
            } else {
                self.env_rms >= thr
            };

            // Idle floor tracking, gated away from near-speech energy.
            if !self.in_speech && r_inst < self.cfg.floor_adapt_margin * thr {
                self.floor_rms =
                    self.clamp_floor(ema(r_inst, self.floor_rms, self.cfg.alpha_floor));
            }

            debug!(
                target: "vad",
                frame = self.frame_idx,
                r = r_inst,
                env = self.env_rms,
                floor = self.floor_rms,
                thr,
                above = is_above,
                "frame"
            );

            if !self.in_speech {
                self.above_count = if is_above { self.above_count + 1 } else { 0 };
                if self.above_count >= attack_needed {
                    self.in_speech = true;
                    self.notify_recording(true);
                    self.hangover = 0;
                    self.below_count = 0;
                    self.current = self.preroll.iter().cloned().collect();
                    self.current.push(frame);
                    info!(
                        target: "vad",
                        r = r_inst,
                        thr,
                        attack_frames = attack_needed,
                        pre_roll_frames = self.preroll.len(),
                        "Speech START"
                    );
                }
                continue;
            }

            // In speech
            self.current.push(frame);
            if is_above {
                self.below_count = 0;
                self.hangover = hangover_frames;
            } else if self.hangover > 0 {
                self.hangover -= 1;
                self.below_count = 0;
            } else {
                self.below_count += 1;
            }

            let stop_reason = if self.below_count >= release_needed {
                Some("release")
            } else if self.current.len() >= max_frames {
                Some("max_len")
            } else {
                None
            };

            if let Some(reason) = stop_reason {
                let frames = std::mem::take(&mut self.current);
                let utt_ms = frames.len() as u64 * frame_ms as u64;
                self.in_speech = false;
                self.above_count = 0;
                self.below_count = 0;
                self.hangover = 0;
                self.notify_recording(false);

                if utt_ms >= self.cfg.min_utterance_ms as u64 {
                    let total: usize = frames.iter().map(|f| f.len()).sum();
                    let mut pcm = Vec::with_capacity(total);
                    for f in &frames {
                        pcm.extend_from_slice(f);
                    }
                    info!(
                        target: "vad",
                        reason,
                        dur_ms = utt_ms,
                        frames = frames.len(),
                        thr,
                        "Speech END"
                    );
                    return Ok(Some(Utterance {
                        pcm,
                        sample_rate: self.cfg.sample_rate,
                    }));
                }
                warn!(
                    target: "vad",
                    dur_ms = utt_ms,
                    min_ms = self.cfg.min_utterance_ms,
                    "Dropped utterance (too short)"
                );
            }
        }
    }
}

/// Root-mean-square of an int16 frame, computed in f32. Empty frames are 0.
pub fn rms_int16(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / frame.len() as f64).sqrt() as f32
}

#[inline]
fn ema(value: f32, prev: f32, alpha: f32) -> f32 {
    alpha * prev + (1.0 - alpha) * value
}

#[inline]
fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b.max(1)
}

/// Linear-interpolated percentile over an unsorted sample.
fn percentile(values: &[f32], p: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = (rank - lo as f64) as f32;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        let frame = vec![3000i16; 1024];
        assert!((rms_int16(&frame) - 3000.0).abs() < 1.0);
        assert_eq!(rms_int16(&[]), 0.0);
        assert_eq!(rms_int16(&vec![0i16; 256]), 0.0);
    }

    #[test]
    fn percentile_interpolates() {
        let values = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&values, 0.0), 10.0);
        assert_eq!(percentile(&values, 100.0), 50.0);
        assert_eq!(percentile(&values, 50.0), 30.0);
        assert!((percentile(&values, 10.0) - 14.0).abs() < 1e-4);
    }

    #[test]
    fn frame_math_rounds_to_whole_frames() {
        let cfg = VadConfig::default(); // 1024 @ 16 kHz -> 64 ms frames
        assert_eq!(cfg.frame_ms(), 64);
        assert_eq!(cfg.attack_needed(), 2); // ceil(120 / 64)
        assert_eq!(cfg.release_needed(), 6); // ceil(350 / 64)
        assert_eq!(cfg.pre_roll_frames(), 4); // floor(300 / 64)
        assert_eq!(cfg.max_frames(), 468); // floor(30_000 / 64)
    }

    #[test]
    fn threshold_honors_absolute_guard() {
        let cfg = VadConfig::default();
        let vad = NoiseGateVad::new(Box::new(NullSource), cfg);
        // floor starts at 50 -> 50 * 3 = 150 < abs guard 200
        assert_eq!(vad.threshold(), 200.0);
    }

    struct NullSource;
    impl crate::audio::FrameSource for NullSource {
        fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
            Ok(None)
        }
        fn control(&self) -> Arc<dyn SourceControl> {
            struct Noop;
            impl SourceControl for Noop {
                fn stop(&self) {}
            }
            Arc::new(Noop)
        }
        fn close(&mut self) {}
    }
}

//! Microphone frame source backed by cpal.
//!
//! Linux build note: `cpal` needs the ALSA development headers.
//! On Debian/Ubuntu:
//!   sudo apt-get update && sudo apt-get install -y libasound2-dev pkg-config
//!
//! The (non-`Send`) cpal stream is owned by a dedicated producer thread;
//! frames cross to the caller over a bounded channel. `stop` is cooperative:
//! it tears the stream down, which closes the channel and unblocks any
//! in-flight `read_frame` within a frame duration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use super::device::device_by_index;
use super::{Frame, FrameSource, SourceControl};
use crate::{JarvinError, Result};

pub struct MicStream {
    sample_rate: u32,
    chunk: usize,
    device_index: Option<usize>,
    rx: Option<Receiver<Frame>>,
    ctl: Arc<MicControl>,
    worker: Option<JoinHandle<()>>,
}

struct MicControl {
    stop: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
}

impl SourceControl for MicControl {
    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Ok(guard) = self.shutdown_tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(());
            }
        }
    }
}

impl MicStream {
    pub fn new(sample_rate: u32, chunk: usize, device_index: Option<usize>) -> Self {
        Self {
            sample_rate,
            chunk,
            device_index,
            rx: None,
            ctl: Arc::new(MicControl {
                stop: AtomicBool::new(false),
                shutdown_tx: Mutex::new(None),
            }),
            worker: None,
        }
    }

    /// Acquire the capture device and start producing frames.
    ///
    /// A requested device that fails to open falls back to the system
    /// default exactly once before surfacing `DeviceOpenFailed`.
    pub fn open(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (frame_tx, frame_rx) = mpsc::sync_channel::<Frame>(64);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        *self.ctl.shutdown_tx.lock().expect("mic control poisoned") = Some(shutdown_tx);

        let device_index = self.device_index;
        let sample_rate = self.sample_rate;
        let chunk = self.chunk;
        let worker = std::thread::spawn(move || {
            capture_thread(device_index, sample_rate, chunk, frame_tx, ready_tx, shutdown_rx);
        });

        match ready_rx.recv() {
            Ok(Ok(device_name)) => {
                info!(
                    target: "audio",
                    device = %device_name,
                    rate = sample_rate,
                    chunk,
                    "Microphone stream opened"
                );
                self.rx = Some(frame_rx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(JarvinError::DeviceOpenFailed(
                    "capture thread exited before the stream started".into(),
                ))
            }
        }
    }
}

impl FrameSource for MicStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| JarvinError::FrameRead("stream not open".into()))?;
        if self.ctl.stop.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match rx.recv() {
            Ok(frame) => Ok(Some(frame)),
            // Channel closed: end-of-stream if a stop was requested,
            // otherwise the capture stream died underneath us.
            Err(_) if self.ctl.stop.load(Ordering::SeqCst) => Ok(None),
            Err(_) => Err(JarvinError::FrameRead("capture stream terminated".into())),
        }
    }

    fn control(&self) -> Arc<dyn SourceControl> {
        Arc::clone(&self.ctl) as Arc<dyn SourceControl>
    }

    fn close(&mut self) {
        self.ctl.stop();
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        self.ctl.stop();
    }
}

/// Owns the cpal stream for its whole lifetime; exits when `shutdown_rx`
/// fires (or its sender is dropped), which drops the stream and closes the
/// frame channel.
fn capture_thread(
    device_index: Option<usize>,
    sample_rate: u32,
    chunk: usize,
    frame_tx: SyncSender<Frame>,
    ready_tx: Sender<Result<String>>,
    shutdown_rx: Receiver<()>,
) {
    let host = cpal::default_host();

    let requested = match device_index {
        Some(index) => match device_by_index(index) {
            Ok(dev) => Some(dev),
            Err(e) => {
                warn!(target: "audio", index, error = %e, "Requested input device unavailable");
                None
            }
        },
        None => host.default_input_device(),
    };

    let (stream, device_name) = match requested
        .and_then(|dev| try_build(&dev, sample_rate, chunk, frame_tx.clone()))
    {
        Some(ok) => ok,
        None => {
            // Fall back to the system default exactly once.
            let fallback = host.default_input_device();
            match fallback.and_then(|dev| {
                warn!(target: "audio", "Retrying capture on the system default input");
                try_build(&dev, sample_rate, chunk, frame_tx.clone())
            }) {
                Some(ok) => ok,
                None => {
                    let err = if host.input_devices().map(|mut d| d.next().is_none()).unwrap_or(true)
                    {
                        JarvinError::NoInputDevice
                    } else {
                        JarvinError::DeviceOpenFailed(
                            "could not configure any input device".into(),
                        )
                    };
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            }
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(JarvinError::DeviceOpenFailed(format!(
            "failed to start input stream: {}",
            e
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(device_name));

    // Park until stop/close; dropping `stream` here ends the callbacks and
    // closes the frame channel.
    let _ = shutdown_rx.recv();
    drop(stream);
}

fn try_build(
    device: &cpal::Device,
    sample_rate: u32,
    chunk: usize,
    tx: SyncSender<Frame>,
) -> Option<(cpal::Stream, String)> {
    let name = device.name().unwrap_or_else(|_| "unknown".into());
    match build_capture_stream(device, sample_rate, chunk, tx) {
        Ok(stream) => Some((stream, name)),
        Err(e) => {
            warn!(target: "audio", device = %name, error = %e, "Failed to build input stream");
            None
        }
    }
}

/// Build an input stream at the requested rate, converting whatever sample
/// format the device offers into chunked mono i16 frames.
fn build_capture_stream(
    device: &cpal::Device,
    sample_rate: u32,
    chunk: usize,
    tx: SyncSender<Frame>,
) -> Result<cpal::Stream> {
    let supported = device
        .default_input_config()
        .map_err(|e| JarvinError::DeviceOpenFailed(e.to_string()))?;
    let channels = supported.channels();
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err: cpal::StreamError| {
        error!(target: "audio", "cpal input stream error: {}", err);
    };

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => {
            let mut acc: Vec<i16> = Vec::with_capacity(chunk * 2);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    emit_chunks(&mono, &mut acc, chunk, |frame| {
                        let _ = tx.try_send(frame);
                    });
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::F32 => {
            let mut acc: Vec<i16> = Vec::with_capacity(chunk * 2);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    let mono = downmix(&converted, channels);
                    emit_chunks(&mono, &mut acc, chunk, |frame| {
                        let _ = tx.try_send(frame);
                    });
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let mut acc: Vec<i16> = Vec::with_capacity(chunk * 2);
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data.iter().map(|&s| u16_to_i16(s)).collect();
                    let mono = downmix(&converted, channels);
                    emit_chunks(&mono, &mut acc, chunk, |frame| {
                        let _ = tx.try_send(frame);
                    });
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U8 => {
            let mut acc: Vec<i16> = Vec::with_capacity(chunk * 2);
            device.build_input_stream(
                &config,
                move |data: &[u8], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data.iter().map(|&s| u8_to_i16(s)).collect();
                    let mono = downmix(&converted, channels);
                    emit_chunks(&mono, &mut acc, chunk, |frame| {
                        let _ = tx.try_send(frame);
                    });
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(JarvinError::UnsupportedFormat(format!(
                "input sample format {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| JarvinError::DeviceOpenFailed(format!("failed to build input stream: {}", e)))
}

/// Average interleaved channels down to mono. Mono input passes through.
fn downmix(data: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    let mut mono = Vec::with_capacity(data.len() / ch);
    for frame in data.chunks_exact(ch) {
        let mut acc: i32 = 0;
        for &s in frame {
            acc += s as i32;
        }
        mono.push((acc / ch as i32) as i16);
    }
    mono
}

/// Accumulate samples and hand off exactly `chunk_samples`-sized frames.
fn emit_chunks<F: FnMut(Frame)>(data: &[i16], acc: &mut Vec<i16>, chunk_samples: usize, mut emit: F) {
    acc.extend_from_slice(data);
    while acc.len() >= chunk_samples {
        let frame: Frame = acc.drain(..chunk_samples).collect();
        emit(frame);
    }
}

#[inline]
fn f32_to_i16(s: f32) -> i16 {
    let s = s.clamp(-1.0, 1.0);
    (s * i16::MAX as f32) as i16
}

#[inline]
fn u16_to_i16(s: u16) -> i16 {
    // Map 0..=65535 to -32768..=32767
    (s as i32 - 32768) as i16
}

#[inline]
fn u8_to_i16(s: u8) -> i16 {
    // Map 0..=255 unsigned to -32768..=32767 by centering at 128 and scaling
    ((s as i16) - 128) << 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_chunks_produces_exact_frames() {
        let mut acc = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        emit_chunks(&[1; 100], &mut acc, 64, |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        assert_eq!(acc.len(), 36);
        emit_chunks(&[1; 100], &mut acc, 64, |f| frames.push(f));
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 64));
        assert_eq!(acc.len(), 8);
    }

    #[test]
    fn downmix_averages_stereo_pairs() {
        let stereo = [100i16, 200, -100, -200, 0, 50];
        assert_eq!(downmix(&stereo, 2), vec![150, -150, 25]);
        // mono passthrough
        assert_eq!(downmix(&[7, 8], 1), vec![7, 8]);
    }

    #[test]
    fn sample_conversions_cover_the_ranges() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(u16_to_i16(0), i16::MIN);
        assert_eq!(u16_to_i16(65535), i16::MAX);
        assert_eq!(u8_to_i16(128), 0);
    }
}

//! Audio capture and endpointing.

pub mod device;
pub mod mic;
pub mod vad;
pub mod wav;

pub use device::{
    default_input_device_index, list_input_devices, selected_input_device,
    set_selected_input_device, AudioDevice,
};
pub use mic::MicStream;
pub use vad::{NoiseGateVad, VadConfig};

use std::sync::Arc;

use crate::Result;

/// One fixed-size block of mono PCM samples read from the capture device.
pub type Frame = Vec<i16>;

/// Handle for cooperatively stopping a source from another task.
/// `stop` must be non-blocking and unblock any in-flight `read_frame`.
pub trait SourceControl: Send + Sync {
    fn stop(&self);
}

/// Blocking producer of fixed-size PCM frames.
///
/// `read_frame` returns `Ok(None)` once the stream has ended (after `stop`
/// was requested, or the device went away during a requested stop).
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<Frame>>;
    fn control(&self) -> Arc<dyn SourceControl>;
    fn close(&mut self);
}

/// A single endpointed span of speech. Immutable once emitted by the VAD.
#[derive(Clone, Debug)]
pub struct Utterance {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        ((self.pcm.len() as u64 * 1000) / self.sample_rate as u64) as u32
    }
}

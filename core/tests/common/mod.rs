//! Shared helpers for integration tests: a scripted frame source and
//! synthetic PCM generators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jarvin_core::{Frame, FrameSource, Result, SourceControl};

pub struct ScriptedControl {
    stopped: AtomicBool,
}

impl SourceControl for ScriptedControl {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Feeds a pre-built frame script, then signals end-of-stream. Honors
/// cooperative stop like a real device.
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    ctl: Arc<ScriptedControl>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            ctl: Arc::new(ScriptedControl {
                stopped: AtomicBool::new(false),
            }),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.ctl.stopped.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.frames.pop_front())
    }

    fn control(&self) -> Arc<dyn SourceControl> {
        Arc::clone(&self.ctl) as Arc<dyn SourceControl>
    }

    fn close(&mut self) {
        self.frames.clear();
    }
}

/// `count` frames of constant amplitude; a constant signal's RMS equals the
/// amplitude, which makes threshold arithmetic exact in assertions.
pub fn tone_frames(amplitude: i16, count: usize, chunk: usize) -> Vec<Frame> {
    (0..count).map(|_| vec![amplitude; chunk]).collect()
}

pub fn silence_frames(count: usize, chunk: usize) -> Vec<Frame> {
    (0..count).map(|_| vec![0i16; chunk]).collect()
}

/// Concatenate frame scripts in order.
pub fn script(parts: Vec<Vec<Frame>>) -> Vec<Frame> {
    parts.into_iter().flatten().collect()
}

//! Live-state publisher.
//!
//! The single piece of shared mutable state: the most recent utterance
//! snapshot plus the `recording`/`processing` flags. Publishers run on the
//! orchestrator task and the VAD thread (sync); consumers are the HTTP
//! handlers (async). `seq` advances exactly once per finalized utterance so
//! pollers and streams can dedupe; a reader that observes a new `seq` is
//! guaranteed to see every field written by the same publication.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Notify;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic seconds since process start, for the `ts` field.
fn monotonic_secs() -> f64 {
    PROCESS_START.elapsed().as_secs_f64()
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct LiveSnapshot {
    pub seq: u64,
    /// Monotonic seconds of the last update; `None` before the first one.
    pub ts: Option<f64>,
    pub transcript: Option<String>,
    pub reply: Option<String>,
    pub utter_ms: Option<u32>,
    pub cycle_ms: Option<u32>,
    pub wav_path: Option<String>,
    pub tts_url: Option<String>,
    pub recording: bool,
    pub processing: bool,
}

/// Fields replaced by one snapshot publication.
#[derive(Clone, Debug, Default)]
pub struct SnapshotUpdate {
    pub transcript: Option<String>,
    pub reply: Option<String>,
    pub utter_ms: Option<u32>,
    pub cycle_ms: Option<u32>,
    pub wav_path: Option<String>,
    pub tts_url: Option<String>,
}

#[derive(Default)]
pub struct LiveState {
    inner: Mutex<LiveSnapshot>,
    notify: Notify,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic snapshot publish after a finalized utterance cycle.
    /// Bumps `seq` and wakes all waiters; the status flags are untouched
    /// (they are driven by `publish_status`).
    pub fn publish_snapshot(&self, update: SnapshotUpdate) {
        {
            let mut state = self.inner.lock().expect("live state poisoned");
            state.seq += 1;
            state.ts = Some(monotonic_secs());
            state.transcript = update.transcript;
            state.reply = update.reply;
            state.utter_ms = update.utter_ms;
            state.cycle_ms = update.cycle_ms;
            state.wav_path = update.wav_path;
            state.tts_url = update.tts_url;
        }
        self.notify.notify_waiters();
    }

    /// Lightweight status update that can occur mid-utterance. Wakes
    /// waiters but never changes `seq`.
    pub fn publish_status(&self, recording: Option<bool>, processing: Option<bool>) {
        if recording.is_none() && processing.is_none() {
            return;
        }
        {
            let mut state = self.inner.lock().expect("live state poisoned");
            if let Some(r) = recording {
                state.recording = r;
            }
            if let Some(p) = processing {
                state.processing = p;
            }
            state.ts = Some(monotonic_secs());
        }
        self.notify.notify_waiters();
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self) -> LiveSnapshot {
        self.inner.lock().expect("live state poisoned").clone()
    }

    /// Block until `seq` passes `since`, any status flips, or the timeout
    /// elapses; returns the current snapshot either way. `since = None`
    /// returns immediately.
    pub async fn wait_next(&self, since: Option<u64>, timeout: Option<Duration>) -> LiveSnapshot {
        let Some(since) = since else {
            return self.snapshot();
        };

        // Register before checking so a publication in between cannot be
        // missed.
        let notified = self.notify.notified();
        {
            let state = self.inner.lock().expect("live state poisoned");
            if state.seq > since {
                return state.clone();
            }
        }

        match timeout {
            Some(t) => {
                let _ = tokio::time::timeout(t, notified).await;
            }
            None => notified.await,
        }
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(transcript: &str) -> SnapshotUpdate {
        SnapshotUpdate {
            transcript: Some(transcript.to_string()),
            reply: Some("ok".to_string()),
            utter_ms: Some(1200),
            cycle_ms: Some(1500),
            wav_path: Some("/tmp/u.wav".to_string()),
            tts_url: None,
        }
    }

    #[test]
    fn seq_increments_exactly_once_per_snapshot() {
        let live = LiveState::new();
        assert_eq!(live.snapshot().seq, 0);
        live.publish_snapshot(update("one"));
        let s1 = live.snapshot();
        live.publish_snapshot(update("two"));
        let s2 = live.snapshot();
        assert_eq!(s1.seq, 1);
        assert_eq!(s2.seq, s1.seq + 1);
        assert_eq!(s2.transcript.as_deref(), Some("two"));
    }

    #[test]
    fn status_updates_leave_seq_untouched() {
        let live = LiveState::new();
        live.publish_snapshot(update("one"));
        let before = live.snapshot();
        live.publish_status(Some(true), None);
        live.publish_status(None, Some(true));
        let after = live.snapshot();
        assert_eq!(after.seq, before.seq);
        assert!(after.recording);
        assert!(after.processing);
        // snapshot publication left the flags alone
        live.publish_snapshot(update("two"));
        assert!(live.snapshot().recording);
    }

    #[test]
    fn empty_status_update_is_a_no_op() {
        let live = LiveState::new();
        let before = live.snapshot();
        live.publish_status(None, None);
        let after = live.snapshot();
        assert_eq!(after.ts, before.ts);
    }

    #[tokio::test]
    async fn wait_next_returns_immediately_without_since() {
        let live = LiveState::new();
        let snap = live.wait_next(None, Some(Duration::from_secs(5))).await;
        assert_eq!(snap.seq, 0);
    }

    #[tokio::test]
    async fn wait_next_wakes_on_snapshot_publication() {
        let live = std::sync::Arc::new(LiveState::new());
        let waiter = {
            let live = live.clone();
            tokio::spawn(async move { live.wait_next(Some(0), Some(Duration::from_secs(5))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        live.publish_snapshot(update("wake"));
        let snap = waiter.await.unwrap();
        assert_eq!(snap.seq, 1);
        assert_eq!(snap.transcript.as_deref(), Some("wake"));
    }

    #[tokio::test]
    async fn wait_next_wakes_on_status_flip_without_seq_change() {
        let live = std::sync::Arc::new(LiveState::new());
        let waiter = {
            let live = live.clone();
            tokio::spawn(async move { live.wait_next(Some(0), Some(Duration::from_secs(5))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        live.publish_status(Some(true), None);
        let snap = waiter.await.unwrap();
        assert_eq!(snap.seq, 0);
        assert!(snap.recording);
    }

    #[tokio::test]
    async fn wait_next_times_out_to_current_state() {
        let live = LiveState::new();
        let t0 = Instant::now();
        let snap = live.wait_next(Some(0), Some(Duration::from_millis(50))).await;
        assert!(t0.elapsed() >= Duration::from_millis(45));
        assert_eq!(snap.seq, 0);
    }

    #[tokio::test]
    async fn wait_next_returns_fast_when_seq_already_passed() {
        let live = LiveState::new();
        live.publish_snapshot(update("old"));
        let snap = live.wait_next(Some(0), Some(Duration::from_secs(5))).await;
        assert_eq!(snap.seq, 1);
    }
}

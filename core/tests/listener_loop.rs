//! End-to-end listener runs with a scripted source and mock engines.

mod common;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{script, silence_frames, tone_frames, ScriptedSource};
use jarvin_core::{
    run_listener, ChatEngine, ConversationStore, Frame, FrameSource, ListenerDeps, LiveState,
    Result, Role, Settings, SourceFactory, StopEvent, Synthesizer, Transcriber,
    UtterancePipeline,
};

const CHUNK: usize = 1024;

/// Returns scripted transcripts in order, then empty strings.
struct MockAsr {
    texts: Mutex<VecDeque<String>>,
}

impl MockAsr {
    fn new(texts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            texts: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
        })
    }
}

impl Transcriber for MockAsr {
    fn transcribe(&self, _wav_path: &Path) -> Result<String> {
        Ok(self.texts.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}

struct EchoChat;

#[async_trait]
impl ChatEngine for EchoChat {
    async fn reply(&self, user_text: &str, _context: Option<&str>) -> Result<String> {
        Ok(format!("reply to {}", user_text))
    }
}

/// Writes a tiny real WAV so the tts_url path is exercised.
struct MockTts {
    temp_dir: PathBuf,
}

impl Synthesizer for MockTts {
    fn synth_to_wav(&self, _text: &str) -> Result<PathBuf> {
        let path = jarvin_core::paths::temp_unique_path(&self.temp_dir, "tts_", ".wav")?;
        jarvin_core::audio::wav::write_int16_mono(&path, &[0i16; 160], 16_000, None)?;
        Ok(path)
    }
}

fn test_settings(confirm_mode: bool) -> Settings {
    let mut s = Settings::default();
    s.temp_dir = std::env::temp_dir().join(format!("jarvin_listener_{}", jarvin_core::util::gen_id()));
    s.vad_calibration_sec = 0.2; // 4 frames
    s.voice_shutdown_confirm = confirm_mode;
    s
}

/// One endpointed utterance: calibration padding, speech, release tail.
fn one_utterance_script() -> Vec<Frame> {
    script(vec![
        silence_frames(8, CHUNK), // calibration (4) + idle
        tone_frames(3000, 10, CHUNK),
        silence_frames(16, CHUNK),
    ])
}

fn two_utterance_script() -> Vec<Frame> {
    script(vec![
        silence_frames(8, CHUNK),
        tone_frames(3000, 10, CHUNK),
        silence_frames(12, CHUNK),
        tone_frames(3000, 10, CHUNK),
        silence_frames(16, CHUNK),
    ])
}

/// Status flips also wake live-state waiters, so poll until the sequence
/// number actually advances.
async fn wait_for_seq(live: &LiveState, seq: u64) -> jarvin_core::LiveSnapshot {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snap = live
            .wait_next(Some(seq - 1), Some(Duration::from_millis(100)))
            .await;
        if snap.seq >= seq {
            return snap;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for seq {}",
            seq
        );
    }
}

fn deps_for(
    settings: &Settings,
    asr: Arc<MockAsr>,
    frames: Vec<Frame>,
) -> (ListenerDeps, Arc<LiveState>, Arc<ConversationStore>) {
    let live = Arc::new(LiveState::new());
    let store = Arc::new(ConversationStore::open_in_memory().unwrap());
    let tts = Arc::new(MockTts {
        temp_dir: settings.temp_dir.clone(),
    });
    let pipeline = Arc::new(UtterancePipeline::new(
        settings,
        asr.clone() as Arc<dyn Transcriber>,
        Arc::new(EchoChat),
        tts,
        Arc::clone(&store),
    ));

    let frames = Mutex::new(Some(frames));
    let factory: SourceFactory = Arc::new(move || {
        let frames = frames.lock().unwrap().take().expect("source opened twice");
        Ok(Box::new(ScriptedSource::new(frames)) as Box<dyn FrameSource>)
    });

    let deps = ListenerDeps {
        settings: settings.clone(),
        live: Arc::clone(&live),
        store: Arc::clone(&store),
        pipeline,
        asr,
        source_factory: factory,
    };
    (deps, live, store)
}

#[tokio::test]
async fn one_cycle_publishes_one_snapshot_with_timings() {
    let settings = test_settings(false);
    let asr = MockAsr::new(&["hello there"]);
    let (deps, live, store) = deps_for(&settings, asr, one_utterance_script());

    let stop = Arc::new(StopEvent::new());
    let task = tokio::spawn(run_listener(deps, Arc::clone(&stop), Duration::ZERO));

    let snap = wait_for_seq(&live, 1).await;
    assert_eq!(snap.seq, 1);
    assert_eq!(snap.transcript.as_deref(), Some("hello there"));
    assert_eq!(snap.reply.as_deref(), Some("reply to hello there"));
    assert!(snap.utter_ms.unwrap() > 0);
    assert!(snap.cycle_ms.is_some());
    assert!(snap.wav_path.is_some());
    assert!(snap.tts_url.as_deref().unwrap().starts_with("/_temp/tts_"));

    // source end-of-stream lets the loop exit on its own
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("listener did not exit")
        .unwrap();

    let end = live.snapshot();
    assert_eq!(end.seq, 1, "exactly one snapshot for one utterance");
    assert!(!end.recording);
    assert!(!end.processing);

    let history = store.get_history(None).unwrap();
    assert_eq!(
        history,
        vec![
            (Role::User, "hello there".to_string()),
            (Role::Assistant, "reply to hello there".to_string()),
        ]
    );

    std::fs::remove_dir_all(&settings.temp_dir).ok();
}

#[tokio::test]
async fn shutdown_intent_stops_the_loop_without_a_snapshot() {
    let settings = test_settings(false);
    let asr = MockAsr::new(&["please shut down now"]);
    let (deps, live, store) = deps_for(&settings, asr, two_utterance_script());

    let stop = Arc::new(StopEvent::new());
    let task = tokio::spawn(run_listener(deps, Arc::clone(&stop), Duration::ZERO));

    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("listener did not exit")
        .unwrap();

    assert!(stop.is_set(), "orchestrator signals stop on shutdown intent");
    let snap = live.snapshot();
    assert_eq!(snap.seq, 0, "no snapshot published for the shutdown turn");
    assert!(!snap.recording);
    assert!(!snap.processing);
    assert!(store.get_history(None).unwrap().is_empty());

    std::fs::remove_dir_all(&settings.temp_dir).ok();
}

#[tokio::test]
async fn confirm_mode_arms_a_window_then_confirmation_stops() {
    let settings = test_settings(true);
    let asr = MockAsr::new(&["please shut down now", "confirm shutdown"]);
    let (deps, live, _store) = deps_for(&settings, asr, two_utterance_script());

    let stop = Arc::new(StopEvent::new());
    let task = tokio::spawn(run_listener(deps, Arc::clone(&stop), Duration::ZERO));

    // the armed turn publishes the canned confirmation prompt
    let snap = wait_for_seq(&live, 1).await;
    assert_eq!(snap.seq, 1);
    assert_eq!(snap.transcript.as_deref(), Some("please shut down now"));
    assert!(snap.reply.as_deref().unwrap().contains("confirm shutdown"));
    assert_eq!(snap.cycle_ms, None);

    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("listener did not exit")
        .unwrap();

    assert!(stop.is_set());
    assert_eq!(live.snapshot().seq, 1, "confirmation turn publishes nothing new");

    std::fs::remove_dir_all(&settings.temp_dir).ok();
}

#[tokio::test]
async fn external_stop_event_ends_an_idle_run() {
    let settings = test_settings(false);
    let asr = MockAsr::new(&[]);
    // endless-ish silence; the run must end via the stop event
    let (deps, live, _store) = deps_for(&settings, asr, silence_frames(4000, CHUNK));

    let stop = Arc::new(StopEvent::new());
    let task = tokio::spawn(run_listener(deps, Arc::clone(&stop), Duration::ZERO));

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.set();

    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("listener did not exit after stop")
        .unwrap();

    let snap = live.snapshot();
    assert!(!snap.recording);
    assert!(!snap.processing);
}

#[tokio::test]
async fn initial_delay_races_the_stop_event() {
    let settings = test_settings(false);
    let asr = MockAsr::new(&[]);
    let (deps, live, _store) = deps_for(&settings, asr, Vec::new());

    let stop = Arc::new(StopEvent::new());
    stop.set();
    // a pre-set stop during the initial delay returns before opening audio
    run_listener(deps, Arc::clone(&stop), Duration::from_secs(5)).await;
    assert_eq!(live.snapshot().seq, 0);
}

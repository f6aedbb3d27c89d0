//! Controller tests against a fake capture tool.
//!
//! The tool is a `/bin/sh` script, so the whole module is unix-only.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::controller::SessionController;
use super::hotkeys::{channel_source, unavailable_source, KeySourceFactory};
use super::overlay::{OverlayIndicator, OverlaySurface};
use super::testing::{
    display, kill_process, process_alive, temp_dir, Observed, RecordingObserver, ShellTool,
    GOOD_TOOL, QUIET_TOOL, SELF_EXITING_TOOL,
};
use super::types::{OverlayState, Region, SessionConfig, SessionState, StopReason};
use crate::config::{KeyId, RecorderConfig};
use crate::error::{ConfigError, ErrorKind, StartError};

const WAIT: Duration = Duration::from_secs(5);

struct NullSurface;

impl OverlaySurface for NullSurface {
    fn render(&mut self, _state: &OverlayState) {}
}

fn fast_config() -> RecorderConfig {
    RecorderConfig {
        liveness_window_ms: 100,
        stop_timeout_ms: 500,
        kill_timeout_ms: 2_000,
        drain_poll_ms: 10,
        hotkey_poll_ms: 5,
        ..Default::default()
    }
}

struct Harness {
    controller: SessionController,
    observer: Arc<RecordingObserver>,
    keys: Option<Sender<KeyId>>,
    overlay: OverlayIndicator<NullSurface>,
    dir: std::path::PathBuf,
}

impl Harness {
    fn new(script: &str) -> Self {
        let (tx, source) = channel_source();
        let mut harness = Self::with_source(script, source);
        harness.keys = Some(tx);
        harness
    }

    fn with_source(script: &str, source: KeySourceFactory) -> Self {
        Self::with_config(script, fast_config(), source)
    }

    fn with_config(script: &str, config: RecorderConfig, source: KeySourceFactory) -> Self {
        let observer = Arc::new(RecordingObserver::default());
        let overlay = OverlayIndicator::new(NullSurface, Duration::from_millis(500));
        let controller = SessionController::init(
            &config,
            Arc::new(ShellTool::new(script)),
            source,
            overlay.handle(),
            observer.clone(),
        );
        Self {
            controller,
            observer,
            keys: None,
            overlay,
            dir: temp_dir(),
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig::for_display(display(), self.dir.join("capture.mp4"))
    }

    fn press(&self, key: &str) {
        if let Some(keys) = &self.keys {
            keys.send(KeyId::parse(key).unwrap()).unwrap();
        }
    }

    fn overlay_visible(&mut self) -> bool {
        self.overlay.pump(Instant::now());
        self.overlay.state().visible
    }

    fn wait_for_endings(&self, count: usize) -> bool {
        self.observer.wait_for(WAIT, |events| {
            events
                .iter()
                .filter(|e| matches!(e, Observed::Ended(..)))
                .count()
                >= count
        })
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.controller.teardown();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[test]
fn normal_session_lifecycle() {
    let mut h = Harness::new(GOOD_TOOL);

    h.controller.begin_session(h.session_config()).unwrap();
    assert_eq!(h.controller.state(), SessionState::Recording);
    assert!(h.overlay_visible());

    let outcome = h.controller.end_session(StopReason::UserButton).unwrap();
    assert_eq!(outcome.final_state, SessionState::Stopped);
    assert_eq!(h.controller.state(), SessionState::Stopped);
    assert!(!h.overlay_visible());

    let states: Vec<SessionState> = h
        .observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Observed::State(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SessionState::Starting,
            SessionState::Recording,
            SessionState::Stopping,
            SessionState::Stopped
        ]
    );

    let endings = h.observer.endings();
    assert_eq!(endings.len(), 1);
    assert_eq!(endings[0].1, StopReason::UserButton);
    assert_eq!(h.controller.last_outcome().map(|(o, _)| o), Some(outcome));
}

#[test]
fn repeated_stop_notifies_once() {
    let h = Harness::new(GOOD_TOOL);
    h.controller.begin_session(h.session_config()).unwrap();

    let first = h.controller.end_session(StopReason::UserButton);
    let second = h.controller.end_session(StopReason::UserButton);
    h.controller.request_end(StopReason::UserButton);
    h.controller.request_end(StopReason::HotkeySignal);
    h.press("s");

    assert!(first.is_some());
    assert_eq!(first, second);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(h.observer.endings().len(), 1);
}

#[test]
fn concurrent_button_and_hotkey_tear_down_once() {
    let h = Harness::new(GOOD_TOOL);
    h.controller.begin_session(h.session_config()).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let keys = h.keys.clone().unwrap();
    let hotkey = {
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            keys.send(KeyId::parse("s").unwrap()).unwrap();
        })
    };
    barrier.wait();
    h.controller.end_session(StopReason::UserButton);
    hotkey.join().unwrap();

    assert!(h.wait_for_endings(1));
    thread::sleep(Duration::from_millis(200));

    let endings = h.observer.endings();
    assert_eq!(endings.len(), 1);
    assert!(matches!(
        endings[0].1,
        StopReason::UserButton | StopReason::HotkeySignal
    ));
    assert_eq!(h.controller.state(), SessionState::Stopped);
}

#[test]
fn hotkey_stops_recording() {
    let mut h = Harness::new(GOOD_TOOL);
    h.controller.begin_session(h.session_config()).unwrap();

    h.press("p");
    h.press("s");
    assert!(h.wait_for_endings(1));

    let endings = h.observer.endings();
    assert_eq!(endings[0].1, StopReason::HotkeySignal);
    assert_eq!(h.controller.state(), SessionState::Stopped);
    assert!(!h.overlay_visible());
}

#[test]
fn stop_key_is_inert_while_idle() {
    let h = Harness::new(GOOD_TOOL);
    h.press("s");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.controller.state(), SessionState::Idle);

    h.controller.begin_session(h.session_config()).unwrap();
    assert_eq!(h.controller.state(), SessionState::Recording);
    assert!(h.observer.endings().is_empty());
}

#[test]
fn external_kill_fails_session() {
    let mut h = Harness::new(GOOD_TOOL);
    let handle = h.controller.begin_session(h.session_config()).unwrap();

    kill_process(handle.pid);
    assert!(h.wait_for_endings(1));

    let endings = h.observer.endings();
    assert_eq!(endings.len(), 1);
    assert_eq!(endings[0].1, StopReason::ProcessError);
    assert_eq!(endings[0].0.final_state, SessionState::Failed);
    assert_eq!(h.controller.state(), SessionState::Failed);
    assert!(!h.overlay_visible());

    // A later button press does not produce a second notification.
    h.controller.end_session(StopReason::UserButton);
    assert_eq!(h.observer.endings().len(), 1);
}

#[test]
fn odd_region_is_rejected() {
    let h = Harness::new(GOOD_TOOL);
    let config = h.session_config().with_region(Region::new(0, 0, 101, 100));

    let err = h.controller.begin_session(config).unwrap_err();
    assert_eq!(
        err,
        StartError::InvalidConfig(ConfigError::OddRegion {
            width: 101,
            height: 100
        })
    );
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.observer.errors(), vec![ErrorKind::Config]);
    assert!(!h.dir.join("capture.mp4").exists());

    let corrected = Region::new(0, 0, 101, 100).even_aligned();
    let config = h.session_config().with_region(corrected);
    h.controller.begin_session(config).unwrap();
    assert_eq!(h.controller.state(), SessionState::Recording);
}

#[test]
fn second_begin_is_rejected() {
    let h = Harness::new(GOOD_TOOL);
    let handle = h.controller.begin_session(h.session_config()).unwrap();

    let other = SessionConfig::for_display(display(), h.dir.join("other.mp4"));
    assert_eq!(
        h.controller.begin_session(other).unwrap_err(),
        StartError::AlreadyRunning
    );
    assert_eq!(h.controller.state(), SessionState::Recording);

    let outcome = h.controller.end_session(StopReason::UserButton).unwrap();
    assert_eq!(outcome.session_id, handle.session_id);
    assert_eq!(outcome.final_state, SessionState::Stopped);
    assert!(!h.dir.join("other.mp4").exists());
}

#[test]
fn spawn_failure_reports_error() {
    let h = Harness::new("exit 7");

    let err = h.controller.begin_session(h.session_config()).unwrap_err();
    assert!(matches!(err, StartError::SpawnFailed(_)));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.observer.errors(), vec![ErrorKind::Spawn]);
    assert!(h.observer.endings().is_empty());
}

#[test]
fn truncated_output_is_process_error() {
    let h = Harness::new(": > \"$1\"; read line; exit 0");
    h.controller.begin_session(h.session_config()).unwrap();

    let outcome = h.controller.end_session(StopReason::UserButton).unwrap();
    assert_eq!(outcome.final_state, SessionState::Failed);
    assert_eq!(h.observer.endings()[0].1, StopReason::ProcessError);
    assert_eq!(h.controller.state(), SessionState::Failed);
}

#[test]
fn listener_failure_degrades_gracefully() {
    let h = Harness::with_source(GOOD_TOOL, unavailable_source("no display"));
    assert_eq!(h.observer.errors(), vec![ErrorKind::Listener]);

    h.controller.begin_session(h.session_config()).unwrap();
    assert!(h.controller.end_session(StopReason::UserButton).is_some());
    assert_eq!(h.observer.errors().len(), 1);
}

#[test]
fn acknowledge_then_record_again() {
    let h = Harness::new(GOOD_TOOL);
    assert!(!h.controller.acknowledge());

    h.controller.begin_session(h.session_config()).unwrap();
    h.controller.end_session(StopReason::UserButton);
    assert!(h.controller.acknowledge());
    assert_eq!(h.controller.state(), SessionState::Idle);

    h.controller.begin_session(h.session_config()).unwrap();
    h.controller.end_session(StopReason::UserButton);

    // Starting over a finished session acknowledges it implicitly.
    h.controller.begin_session(h.session_config()).unwrap();
    h.controller.end_session(StopReason::UserButton);
    assert_eq!(h.observer.endings().len(), 3);
}

#[test]
fn teardown_ends_active_session() {
    let h = Harness::new(GOOD_TOOL);
    h.controller.begin_session(h.session_config()).unwrap();

    h.controller.teardown();
    assert_eq!(h.controller.state(), SessionState::Stopped);
    assert_eq!(h.observer.endings().len(), 1);

    h.controller.teardown();
    assert_eq!(h.observer.endings().len(), 1);
}

#[test]
fn listener_death_is_reported_once() {
    let mut h = Harness::new(GOOD_TOOL);
    h.controller.begin_session(h.session_config()).unwrap();

    drop(h.keys.take());
    assert!(h.observer.wait_for(WAIT, |events| {
        events
            .iter()
            .any(|e| matches!(e, Observed::Error(ErrorKind::Listener, _)))
    }));

    // Recording carries on without hotkeys.
    assert_eq!(h.controller.state(), SessionState::Recording);
    let outcome = h.controller.end_session(StopReason::UserButton).unwrap();
    assert_eq!(outcome.final_state, SessionState::Stopped);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.observer.errors(), vec![ErrorKind::Listener]);
}

#[test]
fn stop_while_starting_is_deferred() {
    let config = RecorderConfig {
        liveness_window_ms: 2_000,
        ..fast_config()
    };
    let (tx, source) = channel_source();
    let mut h = Harness::with_config(QUIET_TOOL, config, source);
    h.keys = Some(tx);
    let session = h.session_config();

    let handle = thread::scope(|s| {
        let begin = s.spawn(|| h.controller.begin_session(session));
        let deadline = Instant::now() + WAIT;
        while h.controller.state() != SessionState::Starting && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(h.controller.state(), SessionState::Starting);
        assert!(h.controller.end_session(StopReason::UserButton).is_none());
        begin.join().unwrap()
    })
    .unwrap();

    // begin_session ran the deferred stop before returning.
    let endings = h.observer.endings();
    assert_eq!(endings.len(), 1);
    assert_eq!(endings[0].1, StopReason::UserButton);
    assert_eq!(endings[0].0.final_state, SessionState::Stopped);
    assert_eq!(h.controller.state(), SessionState::Stopped);
    assert!(!process_alive(handle.pid));
    assert!(!h.overlay_visible());
}

#[test]
fn clean_self_exit_ends_session() {
    let mut h = Harness::new(SELF_EXITING_TOOL);
    h.controller.begin_session(h.session_config()).unwrap();

    assert!(h.wait_for_endings(1));
    let endings = h.observer.endings();
    assert_eq!(endings.len(), 1);
    assert_eq!(endings[0].1, StopReason::ProcessExited);
    assert_eq!(endings[0].0.final_state, SessionState::Stopped);
    assert_eq!(h.controller.state(), SessionState::Stopped);
    assert!(!h.overlay_visible());
    assert!(h.observer.errors().is_empty());
}

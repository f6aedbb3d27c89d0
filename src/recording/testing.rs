//! Test doubles shared by the recording tests.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use parking_lot::Mutex;

use super::capture::{CaptureTimings, CaptureTool};
use super::controller::SessionObserver;
use super::types::{DisplayInfo, SessionConfig, SessionState, StopOutcome, StopReason};
use crate::error::ErrorKind;

/// Writes the output file, then waits for anything on stdin.
pub const GOOD_TOOL: &str = "printf 'frames' > \"$1\"; echo 'capture running' >&2; read line; exit 0";

/// Like `GOOD_TOOL` but never reports readiness, so start waits out the
/// whole liveness window.
pub const QUIET_TOOL: &str = "printf 'frames' > \"$1\"; read line; exit 0";

/// Writes the output file and exits cleanly after a moment.
pub const SELF_EXITING_TOOL: &str = "printf 'frames' > \"$1\"; sleep 0.3; exit 0";

/// Writes the output file, then ignores the stop request.
pub const STUBBORN_TOOL: &str = "printf 'frames' > \"$1\"; exec sleep 30";

/// Runs a `/bin/sh` script as the capture tool; `$1` is the output path.
pub struct ShellTool {
    program: String,
    script: String,
}

impl ShellTool {
    pub fn new(script: &str) -> Self {
        Self::with_program("/bin/sh", script)
    }

    pub fn with_program(program: &str, script: &str) -> Self {
        Self {
            program: program.to_string(),
            script: script.to_string(),
        }
    }
}

impl CaptureTool for ShellTool {
    fn name(&self) -> &str {
        "fake-tool"
    }

    fn command(&self, config: &SessionConfig) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(&self.script)
            .arg("sh")
            .arg(&config.output_path);
        cmd
    }

    fn stop_sequence(&self) -> &[u8] {
        b"q\n"
    }

    fn is_ready_line(&self, line: &str) -> bool {
        line == "capture running"
    }
}

pub fn fast_timings() -> CaptureTimings {
    CaptureTimings {
        liveness_window: Duration::from_millis(100),
        stop_timeout: Duration::from_millis(500),
        kill_timeout: Duration::from_millis(2_000),
        drain_poll: Duration::from_millis(10),
    }
}

pub fn display() -> DisplayInfo {
    DisplayInfo::new(":0.0", 0, 0, 1920, 1080)
}

pub fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("screen-recorder-test-{}", uuid::Uuid::new_v4()));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

pub fn kill_process(pid: u32) {
    let _ = Command::new("kill").arg("-9").arg(pid.to_string()).status();
}

pub fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Everything the controller reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    State(SessionState),
    Ended(StopOutcome, StopReason),
    Error(ErrorKind, String),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }

    pub fn endings(&self) -> Vec<(StopOutcome, StopReason)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Ended(outcome, reason) => Some((outcome.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorKind> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Error(kind, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    /// Poll until `pred` holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[Observed]) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if pred(&self.events.lock()) {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state_changed(&self, state: SessionState) {
        self.events.lock().push(Observed::State(state));
    }

    fn on_session_ended(&self, outcome: &StopOutcome, reason: StopReason) {
        self.events
            .lock()
            .push(Observed::Ended(outcome.clone(), reason));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.events
            .lock()
            .push(Observed::Error(kind, message.to_string()));
    }
}

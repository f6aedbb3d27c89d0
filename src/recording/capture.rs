//! Capture process supervision.
//!
//! `CaptureSession` owns at most one child process at a time. A worker thread
//! launches it, drains its error stream and polls for its exit. Callers of
//! `start`/`stop` wait on a condition variable shared with the worker, so the
//! worker and any number of concurrent stop callers agree on who performs the
//! teardown.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::types::{SessionConfig, SessionState, StopOutcome, StopReason};
use crate::config::RecorderConfig;
use crate::error::{StartError, StopError};

/// Lines of tool output kept for error messages.
const OUTPUT_TAIL_LINES: usize = 20;

/// How long the worker waits for the drain thread after the tool exits.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// An external program that records the screen to a file.
pub trait CaptureTool: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Build the invocation for `config`. Stdio is configured by the session.
    fn command(&self, config: &SessionConfig) -> Command;

    /// Bytes written to stdin to request a graceful stop.
    fn stop_sequence(&self) -> &[u8];

    /// Whether `code` after a requested stop means the file was finalized.
    fn is_graceful_exit(&self, code: Option<i32>) -> bool {
        code == Some(0)
    }

    /// Whether an output line proves the capture is running, which ends the
    /// liveness window early.
    fn is_ready_line(&self, _line: &str) -> bool {
        false
    }
}

/// Supervision timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTimings {
    /// The tool must survive this long before the session counts as recording.
    pub liveness_window: Duration,
    /// Grace period after the stop request.
    pub stop_timeout: Duration,
    /// Wait after a kill.
    pub kill_timeout: Duration,
    /// Exit polling interval.
    pub drain_poll: Duration,
}

impl CaptureTimings {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            liveness_window: config.liveness_window(),
            stop_timeout: config.stop_timeout(),
            kill_timeout: config.kill_timeout(),
            drain_poll: config.drain_poll(),
        }
    }
}

impl Default for CaptureTimings {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_millis(300),
            stop_timeout: Duration::from_millis(5_000),
            kill_timeout: Duration::from_millis(2_000),
            drain_poll: Duration::from_millis(20),
        }
    }
}

/// Read-only description of a started capture.
///
/// The child process itself never leaves the session.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    pub session_id: String,
    pub pid: u32,
    pub started_at: Instant,
    pub output_path: PathBuf,
}

/// Events the worker reports without being asked.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The tool exited while recording and no stop was requested.
    Ended {
        session_id: String,
        reason: StopReason,
        outcome: StopOutcome,
    },
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug, Clone)]
struct ExitReport {
    code: Option<i32>,
    success: bool,
    description: String,
}

impl ExitReport {
    fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
            description: status.to_string(),
        }
    }

    fn wait_failed(err: &io::Error) -> Self {
        Self {
            code: None,
            success: false,
            description: format!("wait failed: {}", err),
        }
    }
}

#[derive(Debug, Clone)]
enum Launch {
    Pending,
    Running(u32),
    Failed(String),
}

struct ActiveCapture {
    id: String,
    config: SessionConfig,
    started_at: Instant,
    started_at_rfc3339: String,
    launch: Launch,
    ready: bool,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    exit: Option<ExitReport>,
    output_tail: VecDeque<String>,
}

impl ActiveCapture {
    fn new(id: String, config: SessionConfig) -> Self {
        Self {
            id,
            config,
            started_at: Instant::now(),
            started_at_rfc3339: chrono::Local::now().to_rfc3339(),
            launch: Launch::Pending,
            ready: false,
            child: None,
            stdin: None,
            exit: None,
            output_tail: VecDeque::with_capacity(OUTPUT_TAIL_LINES),
        }
    }

    fn last_output(&self) -> Option<&str> {
        self.output_tail.back().map(|s| s.as_str())
    }

    fn outcome(&self, final_state: SessionState, forced: bool, error: Option<String>) -> StopOutcome {
        StopOutcome {
            session_id: self.id.clone(),
            final_state,
            output_path: self.config.output_path.clone(),
            started_at: self.started_at_rfc3339.clone(),
            duration_secs: self.started_at.elapsed().as_secs_f64(),
            file_size_bytes: output_size(&self.config.output_path),
            exit_code: self.exit.as_ref().and_then(|e| e.code),
            forced,
            error,
        }
    }
}

struct Inner {
    state: SessionState,
    active: Option<ActiveCapture>,
    outcome: Option<StopOutcome>,
    /// Set when the last session ended without a stop request.
    ended_by: Option<StopReason>,
}

impl Inner {
    fn active_ref(&self, id: &str) -> Option<&ActiveCapture> {
        self.active.as_ref().filter(|a| a.id == id)
    }

    fn active_mut(&mut self, id: &str) -> Option<&mut ActiveCapture> {
        self.active.as_mut().filter(|a| a.id == id)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
}

fn output_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

// ============================================================================
// CaptureSession
// ============================================================================

/// Supervisor for the external capture process.
pub struct CaptureSession {
    shared: Arc<Shared>,
    tool: Arc<dyn CaptureTool>,
    timings: CaptureTimings,
    events: Option<Sender<CaptureEvent>>,
}

impl CaptureSession {
    pub fn new(tool: Arc<dyn CaptureTool>, timings: CaptureTimings) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    active: None,
                    outcome: None,
                    ended_by: None,
                }),
                changed: Condvar::new(),
            }),
            tool,
            timings,
            events: None,
        }
    }

    /// Deliver unrequested endings to `tx`.
    pub fn with_events(mut self, tx: Sender<CaptureEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Non-blocking state read.
    pub fn poll(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Outcome of the most recently finished session.
    pub fn last_outcome(&self) -> Option<StopOutcome> {
        self.shared.inner.lock().outcome.clone()
    }

    /// Why the most recent session ended, if the tool exited on its own.
    /// None while running and after a requested stop.
    pub fn self_exit_reason(&self) -> Option<StopReason> {
        self.shared.inner.lock().ended_by
    }

    /// Launch the tool and wait until it has survived the liveness window.
    pub fn start(&self, config: SessionConfig) -> Result<CaptureHandle, StartError> {
        let id = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_active() {
                return Err(StartError::AlreadyRunning);
            }
            config.validate()?;

            let id = uuid::Uuid::new_v4().to_string();
            inner.state = SessionState::Starting;
            inner.outcome = None;
            inner.ended_by = None;
            inner.active = Some(ActiveCapture::new(id.clone(), config.clone()));
            self.shared.changed.notify_all();
            id
        };

        log::info!(
            "[CAPTURE] Starting session {} ({}, {} fps) -> {}",
            id,
            config.capture_size(),
            config.frame_rate,
            config.output_path.display()
        );

        let worker = {
            let shared = Arc::clone(&self.shared);
            let tool = Arc::clone(&self.tool);
            let events = self.events.clone();
            let poll = self.timings.drain_poll;
            let id = id.clone();
            thread::Builder::new()
                .name("capture-worker".to_string())
                .spawn(move || supervise(shared, tool, config, id, poll, events))
        };
        if let Err(e) = worker {
            let mut inner = self.shared.inner.lock();
            inner.state = SessionState::Idle;
            inner.active = None;
            self.shared.changed.notify_all();
            return Err(StartError::SpawnFailed(format!("worker thread: {}", e)));
        }

        let mut inner = self.shared.inner.lock();
        let pid = loop {
            let launch = match inner.active_ref(&id) {
                Some(active) => active.launch.clone(),
                None => return Err(StartError::Cancelled),
            };
            match launch {
                Launch::Pending => self.shared.changed.wait(&mut inner),
                Launch::Running(pid) => break pid,
                Launch::Failed(msg) => {
                    // A concurrent stop owns the cleanup once it has claimed the session.
                    if inner.state == SessionState::Starting {
                        inner.state = SessionState::Idle;
                        inner.active = None;
                        self.shared.changed.notify_all();
                    }
                    return Err(StartError::SpawnFailed(msg));
                },
            }
        };

        let deadline = Instant::now() + self.timings.liveness_window;
        loop {
            if inner.state != SessionState::Starting {
                log::info!("[CAPTURE] Session {} stopped while starting", id);
                return Err(StartError::Cancelled);
            }

            let early_exit = inner.active_ref(&id).and_then(|active| {
                active.exit.as_ref().map(|exit| match active.last_output() {
                    Some(line) => format!(
                        "{} exited during startup ({}): {}",
                        self.tool.name(),
                        exit.description,
                        line
                    ),
                    None => format!("{} exited during startup ({})", self.tool.name(), exit.description),
                })
            });
            if let Some(msg) = early_exit {
                log::error!("[CAPTURE] {}", msg);
                inner.state = SessionState::Idle;
                inner.active = None;
                self.shared.changed.notify_all();
                return Err(StartError::SpawnFailed(msg));
            }

            if inner.active_ref(&id).is_some_and(|a| a.ready) {
                log::debug!("[CAPTURE] Session {} reported ready", id);
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            let _ = self.shared.changed.wait_until(&mut inner, deadline);
        }

        inner.state = SessionState::Recording;
        self.shared.changed.notify_all();

        let (started_at, output_path) = match inner.active_ref(&id) {
            Some(active) => (active.started_at, active.config.output_path.clone()),
            None => return Err(StartError::Cancelled),
        };
        log::info!("[CAPTURE] Session {} recording (pid {})", id, pid);

        Ok(CaptureHandle {
            session_id: id,
            pid,
            started_at,
            output_path,
        })
    }

    /// Stop the tool, gracefully if possible.
    ///
    /// Idempotent: a finished session returns its outcome again, and a caller
    /// arriving while another one is stopping waits for that outcome.
    pub fn stop(&self) -> Result<StopOutcome, StopError> {
        let mut inner = self.shared.inner.lock();
        loop {
            match inner.state {
                SessionState::Idle => return Err(StopError::NoActiveSession),
                SessionState::Stopped | SessionState::Failed => {
                    return inner.outcome.clone().ok_or(StopError::NoActiveSession);
                },
                SessionState::Stopping => self.shared.changed.wait(&mut inner),
                SessionState::Starting | SessionState::Recording => break,
            }
        }

        let Some(id) = inner.active.as_ref().map(|a| a.id.clone()) else {
            inner.state = SessionState::Idle;
            return Err(StopError::NoActiveSession);
        };
        inner.state = SessionState::Stopping;
        self.shared.changed.notify_all();
        log::info!("[CAPTURE] Stopping session {}", id);

        loop {
            match inner.active_ref(&id).map(|a| a.launch.clone()) {
                Some(Launch::Pending) => self.shared.changed.wait(&mut inner),
                Some(Launch::Running(_)) => break,
                Some(Launch::Failed(_)) | None => {
                    inner.state = SessionState::Idle;
                    inner.active = None;
                    self.shared.changed.notify_all();
                    return Err(StopError::NoActiveSession);
                },
            }
        }

        let stdin = inner.active_mut(&id).and_then(|a| a.stdin.take());
        if let Some(mut stdin) = stdin {
            let sequence = self.tool.stop_sequence();
            let sent = MutexGuard::unlocked(&mut inner, || {
                stdin.write_all(sequence).and_then(|_| stdin.flush())
            });
            if let Err(e) = sent {
                log::debug!("[CAPTURE] Stop request not delivered: {}", e);
            }
            // Dropping stdin closes the pipe.
        }

        let mut forced = false;
        if !wait_for_exit(&self.shared, &mut inner, &id, self.timings.stop_timeout) {
            forced = true;
            log::warn!(
                "[CAPTURE] {} ignored the stop request for {:?}, killing",
                self.tool.name(),
                self.timings.stop_timeout
            );
            if let Some(child) = inner.active_mut(&id).and_then(|a| a.child.as_mut()) {
                if let Err(e) = child.kill() {
                    log::warn!("[CAPTURE] Kill failed: {}", e);
                }
            }
            if !wait_for_exit(&self.shared, &mut inner, &id, self.timings.kill_timeout) {
                log::error!("[CAPTURE] Process did not exit after kill");
            }
        }

        let Some(active) = inner.active.take() else {
            inner.state = SessionState::Idle;
            self.shared.changed.notify_all();
            return Err(StopError::NoActiveSession);
        };

        if !forced {
            let code = active.exit.as_ref().and_then(|e| e.code);
            if !self.tool.is_graceful_exit(code) {
                log::warn!("[CAPTURE] {} exited with {:?} after stop", self.tool.name(), code);
            }
        }

        let path = &active.config.output_path;
        let (final_state, error) = if output_size(path) == 0 {
            (
                SessionState::Failed,
                Some(format!("output file {} is missing or empty", path.display())),
            )
        } else {
            (SessionState::Stopped, None)
        };
        let outcome = active.outcome(final_state, forced, error);

        match final_state {
            SessionState::Stopped => log::info!(
                "[CAPTURE] Session {} stopped: {:.1}s, {} bytes{}",
                outcome.session_id,
                outcome.duration_secs,
                outcome.file_size_bytes,
                if forced { " (forced)" } else { "" }
            ),
            _ => log::error!(
                "[CAPTURE] Session {} failed: {}",
                outcome.session_id,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }

        inner.state = final_state;
        inner.outcome = Some(outcome.clone());
        self.shared.changed.notify_all();
        Ok(outcome)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if let Some(mut active) = inner.active.take() {
            let running = active.exit.is_none();
            if let Some(child) = active.child.as_mut().filter(|_| running) {
                log::warn!("[CAPTURE] Session {} dropped while running, killing", active.id);
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Wait for the worker to record the exit. Returns false on timeout.
fn wait_for_exit(shared: &Shared, inner: &mut MutexGuard<'_, Inner>, id: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if inner.active_ref(id).map_or(true, |a| a.exit.is_some()) {
            return true;
        }
        if shared.changed.wait_until(inner, deadline).timed_out() {
            return inner.active_ref(id).map_or(true, |a| a.exit.is_some());
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

fn supervise(
    shared: Arc<Shared>,
    tool: Arc<dyn CaptureTool>,
    config: SessionConfig,
    id: String,
    poll: Duration,
    events: Option<Sender<CaptureEvent>>,
) {
    let mut command = tool.command(&config);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            log::error!("[CAPTURE] Failed to launch {}: {}", tool.name(), e);
            let mut inner = shared.inner.lock();
            if let Some(active) = inner.active_mut(&id) {
                active.launch = Launch::Failed(format!("{}: {}", tool.name(), e));
            }
            shared.changed.notify_all();
            return;
        },
    };

    let pid = child.id();
    let stdin = child.stdin.take();
    let stderr = child.stderr.take();
    {
        let mut inner = shared.inner.lock();
        match inner.active_mut(&id) {
            Some(active) => {
                active.launch = Launch::Running(pid);
                active.child = Some(child);
                active.stdin = stdin;
            },
            None => {
                log::warn!("[CAPTURE] Session {} abandoned during launch", id);
                let _ = child.kill();
                let _ = child.wait();
                return;
            },
        }
        shared.changed.notify_all();
    }

    let (drained_tx, drained_rx) = bounded::<()>(1);
    if let Some(stderr) = stderr {
        let shared = Arc::clone(&shared);
        let tool = Arc::clone(&tool);
        let id = id.clone();
        let drain = thread::Builder::new()
            .name("capture-drain".to_string())
            .spawn(move || {
                drain_output(stderr, tool.as_ref(), &shared, &id);
                let _ = drained_tx.send(());
            });
        if let Err(e) = drain {
            log::warn!("[CAPTURE] Could not start drain thread: {}", e);
        }
    } else {
        drop(drained_tx);
    }

    let report = loop {
        {
            let mut inner = shared.inner.lock();
            let Some(child) = inner.active_mut(&id).and_then(|a| a.child.as_mut()) else {
                return;
            };
            match child.try_wait() {
                Ok(Some(status)) => break ExitReport::from_status(status),
                Ok(None) => {},
                Err(e) => break ExitReport::wait_failed(&e),
            }
        }
        thread::sleep(poll);
    };

    // Let the drain thread collect the final lines before reporting.
    let _ = drained_rx.recv_timeout(DRAIN_GRACE);
    record_exit(&shared, tool.name(), &id, report, events.as_ref());
}

/// Read the tool's error stream line by line until EOF.
fn drain_output(stderr: ChildStderr, tool: &dyn CaptureTool, shared: &Shared, id: &str) {
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::debug!("[CAPTURE] Output stream closed: {}", e);
                break;
            },
        };
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        log::debug!("[CAPTURE] {}", line);

        let ready = tool.is_ready_line(&line);
        let mut inner = shared.inner.lock();
        if let Some(active) = inner.active_mut(id) {
            if active.output_tail.len() == OUTPUT_TAIL_LINES {
                active.output_tail.pop_front();
            }
            active.output_tail.push_back(line);
            if ready && !active.ready {
                active.ready = true;
                shared.changed.notify_all();
            }
        }
    }
}

fn record_exit(
    shared: &Shared,
    tool_name: &str,
    id: &str,
    report: ExitReport,
    events: Option<&Sender<CaptureEvent>>,
) {
    let mut inner = shared.inner.lock();
    let state = inner.state;

    let ended = {
        let Some(active) = inner.active_mut(id) else {
            return;
        };
        log::debug!("[CAPTURE] Session {} tool exited: {}", id, report.description);
        active.exit = Some(report.clone());

        if state == SessionState::Recording {
            let size = output_size(&active.config.output_path);
            let (final_state, reason, error) = if report.success && size > 0 {
                (SessionState::Stopped, StopReason::ProcessExited, None)
            } else {
                let mut msg = format!("{} exited unexpectedly ({})", tool_name, report.description);
                if let Some(line) = active.last_output() {
                    msg.push_str(": ");
                    msg.push_str(line);
                }
                (SessionState::Failed, StopReason::ProcessError, Some(msg))
            };
            Some((reason, active.outcome(final_state, false, error)))
        } else {
            None
        }
    };

    let event = ended.map(|(reason, outcome)| {
        match outcome.final_state {
            SessionState::Failed => log::error!(
                "[CAPTURE] Session {} failed: {}",
                id,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            _ => log::info!("[CAPTURE] Session {} ended by the tool", id),
        }
        inner.state = outcome.final_state;
        inner.outcome = Some(outcome.clone());
        inner.ended_by = Some(reason);
        inner.active = None;
        CaptureEvent::Ended {
            session_id: id.to_string(),
            reason,
            outcome,
        }
    });

    shared.changed.notify_all();
    drop(inner);

    if let (Some(event), Some(tx)) = (event, events) {
        if tx.send(event).is_err() {
            log::debug!("[CAPTURE] No listener for session {} ending", id);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::recording::testing::{
        display, fast_timings, kill_process, temp_dir, ShellTool, GOOD_TOOL, QUIET_TOOL,
        SELF_EXITING_TOOL, STUBBORN_TOOL,
    };

    fn slow_start_timings() -> CaptureTimings {
        CaptureTimings {
            liveness_window: Duration::from_secs(5),
            ..fast_timings()
        }
    }

    fn session(script: &str) -> CaptureSession {
        CaptureSession::new(Arc::new(ShellTool::new(script)), fast_timings())
    }

    fn config(dir: &Path) -> SessionConfig {
        SessionConfig::for_display(display(), dir.join("out.mp4"))
    }

    #[test]
    fn start_then_stop() {
        let dir = temp_dir();
        let capture = session(GOOD_TOOL);

        let handle = capture.start(config(&dir)).unwrap();
        assert_eq!(capture.poll(), SessionState::Recording);
        assert!(handle.pid > 0);

        let outcome = capture.stop().unwrap();
        assert_eq!(outcome.final_state, SessionState::Stopped);
        assert_eq!(outcome.session_id, handle.session_id);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.forced);
        assert!(outcome.file_size_bytes > 0);
        assert_eq!(capture.poll(), SessionState::Stopped);
        assert_eq!(capture.self_exit_reason(), None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stop_is_idempotent() {
        let dir = temp_dir();
        let capture = session(GOOD_TOOL);
        capture.start(config(&dir)).unwrap();

        let first = capture.stop().unwrap();
        let second = capture.stop().unwrap();
        assert_eq!(first, second);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stop_without_session() {
        let capture = session(GOOD_TOOL);
        assert_eq!(capture.stop().unwrap_err(), StopError::NoActiveSession);
    }

    #[test]
    fn start_rejects_second_session() {
        let dir = temp_dir();
        let capture = session(GOOD_TOOL);
        let handle = capture.start(config(&dir)).unwrap();

        let other = SessionConfig::for_display(display(), dir.join("other.mp4"));
        assert_eq!(capture.start(other).unwrap_err(), StartError::AlreadyRunning);
        assert_eq!(capture.poll(), SessionState::Recording);

        let outcome = capture.stop().unwrap();
        assert_eq!(outcome.session_id, handle.session_id);
        assert_eq!(outcome.output_path, dir.join("out.mp4"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn start_rejects_invalid_config() {
        let dir = temp_dir();
        let capture = session(GOOD_TOOL);
        let config = config(&dir).with_region(crate::recording::Region::new(0, 0, 101, 100));

        assert!(matches!(
            capture.start(config),
            Err(StartError::InvalidConfig(_))
        ));
        assert_eq!(capture.poll(), SessionState::Idle);
    }

    #[test]
    fn missing_binary_is_spawn_failure() {
        let dir = temp_dir();
        let tool = ShellTool::with_program("/nonexistent/capture-tool", "");
        let capture = CaptureSession::new(Arc::new(tool), fast_timings());

        assert!(matches!(
            capture.start(config(&dir)),
            Err(StartError::SpawnFailed(_))
        ));
        assert_eq!(capture.poll(), SessionState::Idle);
    }

    #[test]
    fn exit_during_liveness_window_is_spawn_failure() {
        let dir = temp_dir();
        let capture = session("echo 'Unknown input format' >&2; exit 1");

        match capture.start(config(&dir)) {
            Err(StartError::SpawnFailed(msg)) => assert!(msg.contains("Unknown input format")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(capture.poll(), SessionState::Idle);

        // The session can be started again afterwards.
        let capture = session(GOOD_TOOL);
        assert!(capture.start(config(&dir)).is_ok());
        assert!(capture.stop().is_ok());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unresponsive_tool_is_killed() {
        let dir = temp_dir();
        let capture = session(STUBBORN_TOOL);
        capture.start(config(&dir)).unwrap();

        let outcome = capture.stop().unwrap();
        assert!(outcome.forced);
        assert_eq!(outcome.final_state, SessionState::Stopped);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_output_fails() {
        let dir = temp_dir();
        let capture = session(": > \"$1\"; read line; exit 0");
        capture.start(config(&dir)).unwrap();

        let outcome = capture.stop().unwrap();
        assert_eq!(outcome.final_state, SessionState::Failed);
        assert!(outcome.error.is_some());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn external_kill_reports_process_error() {
        let dir = temp_dir();
        let (tx, rx) = crossbeam_channel::unbounded();
        let capture = session(GOOD_TOOL).with_events(tx);
        let handle = capture.start(config(&dir)).unwrap();

        kill_process(handle.pid);

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let CaptureEvent::Ended {
            session_id,
            reason,
            outcome,
        } = event;
        assert_eq!(session_id, handle.session_id);
        assert_eq!(reason, StopReason::ProcessError);
        assert_eq!(outcome.final_state, SessionState::Failed);
        assert_eq!(capture.poll(), SessionState::Failed);

        // Stop after the autonomous ending returns the same outcome.
        assert_eq!(capture.stop().unwrap(), outcome);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn clean_self_exit_reports_process_exited() {
        let dir = temp_dir();
        let (tx, rx) = crossbeam_channel::unbounded();
        let capture = session(SELF_EXITING_TOOL).with_events(tx);
        capture.start(config(&dir)).unwrap();

        let CaptureEvent::Ended { reason, outcome, .. } =
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reason, StopReason::ProcessExited);
        assert_eq!(outcome.final_state, SessionState::Stopped);

        // A stop arriving late still sees why the session ended.
        assert_eq!(capture.stop().unwrap(), outcome);
        assert_eq!(capture.self_exit_reason(), Some(StopReason::ProcessExited));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ready_line_ends_liveness_window() {
        let dir = temp_dir();
        let capture = CaptureSession::new(Arc::new(ShellTool::new(GOOD_TOOL)), slow_start_timings());

        let began = Instant::now();
        capture.start(config(&dir)).unwrap();
        assert!(began.elapsed() < Duration::from_secs(3));
        assert_eq!(capture.poll(), SessionState::Recording);
        assert!(capture.stop().is_ok());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stop_during_liveness_window_cancels_start() {
        let dir = temp_dir();
        let capture = Arc::new(CaptureSession::new(
            Arc::new(ShellTool::new(QUIET_TOOL)),
            slow_start_timings(),
        ));

        let starter = {
            let capture = Arc::clone(&capture);
            let config = config(&dir);
            thread::spawn(move || capture.start(config))
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while capture.poll() != SessionState::Starting && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(capture.poll(), SessionState::Starting);

        let outcome = capture.stop().unwrap();
        assert_eq!(starter.join().unwrap().unwrap_err(), StartError::Cancelled);

        // The child was reaped, not left running.
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.forced);
        assert_eq!(outcome.final_state, SessionState::Stopped);
        assert_eq!(capture.poll(), SessionState::Stopped);

        let _ = fs::remove_dir_all(dir);
    }
}

//! Session orchestration.
//!
//! `SessionController` is the single writer of the session state. Three
//! sources can end a session: the presentation layer (button), the hotkey
//! listener and the capture worker (autonomous exit). Hotkey presses and
//! worker reports arrive as messages on a dispatch thread; every source then
//! goes through the same transition guard, so the teardown and the
//! `on_session_ended` notification happen once per session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use super::capture::{CaptureEvent, CaptureHandle, CaptureSession, CaptureTimings, CaptureTool};
use super::hotkeys::{HotkeyListener, KeySourceFactory};
use super::overlay::OverlayHandle;
use super::types::{SessionConfig, SessionState, StopOutcome, StopReason};
use crate::config::{HotkeyAction, RecorderConfig};
use crate::error::{ErrorKind, ListenerError, StartError};

/// Callbacks into the presentation layer.
///
/// Called from whichever thread caused the change (caller, dispatch thread),
/// never while the controller holds its state lock.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, state: SessionState);
    fn on_session_ended(&self, outcome: &StopOutcome, reason: StopReason);
    fn on_error(&self, kind: ErrorKind, message: &str);
}

/// Messages processed by the dispatch thread.
#[derive(Debug, Clone)]
enum ControlEvent {
    Hotkey(HotkeyAction),
    ListenerFailed(ListenerError),
    RequestStop(StopReason),
    Shutdown,
}

#[derive(Default)]
struct Status {
    state: SessionState,
    session_id: Option<String>,
    /// Stop requested while the capture was still starting.
    pending_stop: Option<StopReason>,
    /// Worker report that arrived before `begin_session` finished.
    pending_exit: Option<(String, StopReason, StopOutcome)>,
    last: Option<(StopOutcome, StopReason)>,
}

struct Core {
    capture: CaptureSession,
    status: Mutex<Status>,
    observer: Arc<dyn SessionObserver>,
    overlay: OverlayHandle,
    hotkeys: Mutex<HotkeyListener>,
}

/// Coordinates capture, overlay and hotkeys for one recorder.
pub struct SessionController {
    core: Arc<Core>,
    control: Sender<ControlEvent>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl Status {
    /// Claim the teardown for a worker report. Returns what to publish, or
    /// None when the report is stale or must wait for `begin_session`.
    fn capture_ended(
        &mut self,
        session_id: String,
        reason: StopReason,
        outcome: StopOutcome,
    ) -> Option<(StopReason, StopOutcome)> {
        match self.state {
            SessionState::Recording if self.session_id.as_deref() == Some(session_id.as_str()) => {
                self.state = SessionState::Stopping;
                Some((reason, outcome))
            },
            SessionState::Starting => {
                self.pending_exit = Some((session_id, reason, outcome));
                None
            },
            _ => {
                log::debug!(
                    "[CONTROLLER] Ignoring capture report for session {} while {:?}",
                    session_id,
                    self.state
                );
                None
            },
        }
    }
}

impl SessionController {
    /// Start the dispatch thread and the hotkey listener.
    ///
    /// A listener that cannot be started, or whose key source fails later, is
    /// reported once through `on_error(ErrorKind::Listener, ..)`; recording
    /// still works.
    pub fn init(
        config: &RecorderConfig,
        tool: Arc<dyn CaptureTool>,
        hotkey_source: KeySourceFactory,
        overlay: OverlayHandle,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (control_tx, control_rx) = unbounded::<ControlEvent>();
        let (capture_tx, capture_rx) = unbounded::<CaptureEvent>();

        let capture = CaptureSession::new(tool, CaptureTimings::from_config(config)).with_events(capture_tx);

        let mut listener = HotkeyListener::new();
        let failure_tx = control_tx.clone();
        listener.on_failure(Box::new(move |e| {
            let _ = failure_tx.send(ControlEvent::ListenerFailed(e));
        }));
        let hotkey_tx = control_tx.clone();
        let started = listener.start(
            config.hotkeys.clone(),
            hotkey_source,
            Box::new(move |action| {
                let _ = hotkey_tx.send(ControlEvent::Hotkey(action));
            }),
            config.hotkey_poll(),
        );
        match started {
            Ok(()) => listener.set_enabled(HotkeyAction::Stop, false),
            Err(e) => {
                log::warn!("[CONTROLLER] Hotkeys unavailable, continuing without them: {}", e);
                observer.on_error(ErrorKind::Listener, &e.to_string());
            },
        }

        let core = Arc::new(Core {
            capture,
            status: Mutex::new(Status::default()),
            observer,
            overlay,
            hotkeys: Mutex::new(listener),
        });

        let dispatch = {
            let core = Arc::clone(&core);
            thread::Builder::new()
                .name("session-dispatch".to_string())
                .spawn(move || dispatch_loop(&core, control_rx, capture_rx))
        };
        let dispatch = match dispatch {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[CONTROLLER] Could not start dispatch thread: {}", e);
                core.observer.on_error(ErrorKind::Runtime, &format!("dispatch thread: {}", e));
                None
            },
        };

        log::info!("[CONTROLLER] Initialized");
        Self {
            core,
            control: control_tx,
            dispatch: Mutex::new(dispatch),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.status.lock().state
    }

    /// Outcome and reason of the most recently ended session.
    pub fn last_outcome(&self) -> Option<(StopOutcome, StopReason)> {
        self.core.status.lock().last.clone()
    }

    pub fn overlay_handle(&self) -> OverlayHandle {
        self.core.overlay.clone()
    }

    /// Start recording. Blocks for the capture tool's liveness window.
    pub fn begin_session(&self, config: SessionConfig) -> Result<CaptureHandle, StartError> {
        self.core.begin_session(config)
    }

    /// End the current session on the calling thread.
    ///
    /// Returns the outcome when the session is (now) finished; None when
    /// there is nothing to stop, the stop was deferred until start
    /// completes, or another trigger is already stopping it.
    pub fn end_session(&self, reason: StopReason) -> Option<StopOutcome> {
        self.core.end_session(reason)
    }

    /// Queue a stop for the dispatch thread. Never blocks.
    pub fn request_end(&self, reason: StopReason) {
        if self.control.send(ControlEvent::RequestStop(reason)).is_err() {
            log::warn!("[CONTROLLER] Dispatch thread gone, stopping inline");
            self.core.end_session(reason);
        }
    }

    /// Return a finished session to Idle. False if nothing was finished.
    pub fn acknowledge(&self) -> bool {
        self.core.acknowledge()
    }

    /// Stop any session, the listener and the dispatch thread. Idempotent.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[CONTROLLER] Tearing down");

        self.core.end_session(StopReason::UserButton);
        self.core.hotkeys.lock().stop();

        let _ = self.control.send(ControlEvent::Shutdown);
        if let Some(handle) = self.dispatch.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[CONTROLLER] Dispatch thread panicked");
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn dispatch_loop(core: &Core, control: Receiver<ControlEvent>, capture: Receiver<CaptureEvent>) {
    loop {
        crossbeam_channel::select! {
            recv(control) -> msg => match msg {
                Ok(ControlEvent::Hotkey(action)) => core.on_hotkey(action),
                Ok(ControlEvent::ListenerFailed(e)) => core.on_listener_failed(&e),
                Ok(ControlEvent::RequestStop(reason)) => {
                    core.end_session(reason);
                },
                Ok(ControlEvent::Shutdown) | Err(_) => break,
            },
            recv(capture) -> msg => match msg {
                Ok(CaptureEvent::Ended { session_id, reason, outcome }) => {
                    core.on_capture_ended(session_id, reason, outcome);
                },
                Err(_) => break,
            },
        }
    }
    log::debug!("[CONTROLLER] Dispatch thread exiting");
}

enum AfterStart {
    Record,
    Stop(StopReason),
    Exited(StopReason, StopOutcome),
}

impl Core {
    fn set_stop_binding(&self, enabled: bool) {
        self.hotkeys.lock().set_enabled(HotkeyAction::Stop, enabled);
    }

    fn begin_session(&self, config: SessionConfig) -> Result<CaptureHandle, StartError> {
        {
            let mut status = self.status.lock();
            if status.state.is_active() {
                log::warn!("[CONTROLLER] Session already {:?}, ignoring start", status.state);
                return Err(StartError::AlreadyRunning);
            }
            status.state = SessionState::Starting;
            status.session_id = None;
            status.pending_stop = None;
            status.pending_exit = None;
        }
        self.observer.on_state_changed(SessionState::Starting);

        let handle = match self.capture.start(config) {
            Ok(handle) => handle,
            Err(e) => {
                {
                    let mut status = self.status.lock();
                    status.state = SessionState::Idle;
                    status.pending_stop = None;
                    status.pending_exit = None;
                }
                self.observer.on_state_changed(SessionState::Idle);
                if e == StartError::Cancelled {
                    log::info!("[CONTROLLER] Start cancelled");
                } else {
                    log::error!("[CONTROLLER] Start failed: {}", e);
                    self.observer.on_error(e.kind(), &e.to_string());
                }
                return Err(e);
            },
        };

        let next = {
            let mut status = self.status.lock();
            status.session_id = Some(handle.session_id.clone());
            let exited = status
                .pending_exit
                .take()
                .filter(|(id, _, _)| *id == handle.session_id);

            if let Some((_, reason, outcome)) = exited {
                status.state = SessionState::Stopping;
                AfterStart::Exited(reason, outcome)
            } else if let Some(reason) = status.pending_stop.take() {
                status.state = SessionState::Recording;
                AfterStart::Stop(reason)
            } else {
                status.state = SessionState::Recording;
                AfterStart::Record
            }
        };

        log::info!("[CONTROLLER] Session {} recording", handle.session_id);
        self.observer.on_state_changed(SessionState::Recording);

        match next {
            AfterStart::Record => {
                self.overlay.show(handle.started_at);
                self.set_stop_binding(true);
            },
            AfterStart::Stop(reason) => {
                self.end_session(reason);
            },
            AfterStart::Exited(reason, outcome) => {
                self.observer.on_state_changed(SessionState::Stopping);
                self.publish(outcome, reason);
            },
        }

        Ok(handle)
    }

    fn end_session(&self, reason: StopReason) -> Option<StopOutcome> {
        {
            let mut status = self.status.lock();
            match status.state {
                SessionState::Recording => status.state = SessionState::Stopping,
                SessionState::Starting => {
                    log::info!("[CONTROLLER] Stop ({:?}) requested while starting, deferring", reason);
                    status.pending_stop.get_or_insert(reason);
                    return None;
                },
                SessionState::Stopped | SessionState::Failed => {
                    return status.last.as_ref().map(|(outcome, _)| outcome.clone());
                },
                SessionState::Idle | SessionState::Stopping => {
                    log::debug!("[CONTROLLER] Stop ({:?}) ignored while {:?}", reason, status.state);
                    return None;
                },
            }
        }

        log::info!("[CONTROLLER] Ending session ({:?})", reason);
        self.observer.on_state_changed(SessionState::Stopping);
        self.overlay.hide();
        self.set_stop_binding(false);

        let (outcome, reason) = match self.capture.stop() {
            Ok(outcome) if outcome.final_state == SessionState::Failed => (outcome, StopReason::ProcessError),
            // The tool exited on its own before its report reached the dispatch thread.
            Ok(outcome) => match self.capture.self_exit_reason() {
                Some(exited) => (outcome, exited),
                None => (outcome, reason),
            },
            Err(e) => {
                // The capture already forgot the session; report what is known.
                log::error!("[CONTROLLER] Capture stop failed: {}", e);
                let session_id = self.status.lock().session_id.clone().unwrap_or_default();
                let outcome = StopOutcome {
                    session_id,
                    final_state: SessionState::Failed,
                    output_path: Default::default(),
                    started_at: String::new(),
                    duration_secs: 0.0,
                    file_size_bytes: 0,
                    exit_code: None,
                    forced: false,
                    error: Some(e.to_string()),
                };
                (outcome, StopReason::ProcessError)
            },
        };

        Some(self.publish(outcome, reason))
    }

    fn on_capture_ended(&self, session_id: String, reason: StopReason, outcome: StopOutcome) {
        let claimed = self.status.lock().capture_ended(session_id, reason, outcome);
        let Some((reason, outcome)) = claimed else {
            return;
        };

        log::warn!("[CONTROLLER] Capture ended on its own ({:?})", reason);
        self.observer.on_state_changed(SessionState::Stopping);
        self.overlay.hide();
        self.set_stop_binding(false);
        self.publish(outcome, reason);
    }

    fn on_listener_failed(&self, err: &ListenerError) {
        log::warn!("[CONTROLLER] Hotkey listener stopped, continuing without hotkeys: {}", err);
        self.observer.on_error(ErrorKind::Listener, &err.to_string());
    }

    fn on_hotkey(&self, action: HotkeyAction) {
        match action {
            HotkeyAction::Stop => {
                self.end_session(StopReason::HotkeySignal);
            },
            HotkeyAction::ReservedPause | HotkeyAction::ReservedResume => {
                log::info!("[CONTROLLER] {:?} is reserved and has no effect", action);
            },
        }
    }

    /// Record the final state and notify. Called once per session by
    /// whichever trigger won the transition to Stopping.
    fn publish(&self, mut outcome: StopOutcome, reason: StopReason) -> StopOutcome {
        let final_state = if reason == StopReason::ProcessError || outcome.final_state == SessionState::Failed {
            SessionState::Failed
        } else {
            SessionState::Stopped
        };
        outcome.final_state = final_state;

        {
            let mut status = self.status.lock();
            status.state = final_state;
            status.last = Some((outcome.clone(), reason));
        }

        match final_state {
            SessionState::Failed => log::error!(
                "[CONTROLLER] Session {} failed ({:?}): {}",
                outcome.session_id,
                reason,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
            _ => log::info!(
                "[CONTROLLER] Session {} saved to {} ({:?})",
                outcome.session_id,
                outcome.output_path.display(),
                reason
            ),
        }

        self.observer.on_state_changed(final_state);
        self.observer.on_session_ended(&outcome, reason);
        outcome
    }

    fn acknowledge(&self) -> bool {
        {
            let mut status = self.status.lock();
            if !status.state.is_finished() {
                return false;
            }
            status.state = SessionState::Idle;
            status.session_id = None;
        }
        self.observer.on_state_changed(SessionState::Idle);
        true
    }
}

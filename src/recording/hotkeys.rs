//! Global hotkey listener.
//!
//! A background thread pulls key presses from a [`KeySource`] and hands every
//! bound, enabled action to a single callback. The callback runs under a lock
//! that `stop()` also takes, so once `stop()` returns no further callback can
//! start and none is half-way through.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::{HotkeyAction, HotkeyBindings, KeyId};
use crate::error::ListenerError;

/// Producer of global key presses.
pub trait KeySource {
    /// Wait up to `timeout` for the next key press.
    fn next_press(&mut self, timeout: Duration) -> Result<Option<KeyId>, ListenerError>;
}

/// Opens a key source on the listener thread.
///
/// OS hooks are usually bound to the thread that installed them, so the source
/// is created there rather than handed over.
pub type KeySourceFactory = Box<dyn FnOnce() -> Result<Box<dyn KeySource>, ListenerError> + Send>;

/// Receives matched actions on the listener thread.
pub type HotkeyCallback = Box<dyn Fn(HotkeyAction) + Send>;

/// Receives the error that ended a running listener.
pub type FailureCallback = Box<dyn FnOnce(ListenerError) + Send>;

// ============================================================================
// Channel Source
// ============================================================================

/// Key source fed through a channel (scripted input, tests, other hooks).
pub struct ChannelKeySource {
    rx: Receiver<KeyId>,
}

impl KeySource for ChannelKeySource {
    fn next_press(&mut self, timeout: Duration) -> Result<Option<KeyId>, ListenerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(key) => Ok(Some(key)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ListenerError::Unavailable("key channel closed".to_string()))
            },
        }
    }
}

/// A sender for key presses plus the factory for its source.
pub fn channel_source() -> (Sender<KeyId>, KeySourceFactory) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let factory: KeySourceFactory = Box::new(move || Ok(Box::new(ChannelKeySource { rx }) as Box<dyn KeySource>));
    (tx, factory)
}

/// A factory that always fails, for platforms without global hooks.
pub fn unavailable_source(reason: &str) -> KeySourceFactory {
    let reason = reason.to_string();
    Box::new(move || Err(ListenerError::Unavailable(reason)))
}

// ============================================================================
// Listener
// ============================================================================

/// Background listener delivering bound actions to one callback.
pub struct HotkeyListener {
    running: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<HotkeyCallback>>>,
    enabled: Arc<Mutex<HashSet<HotkeyAction>>>,
    on_failure: Arc<Mutex<Option<FailureCallback>>>,
    thread: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl HotkeyListener {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            callback: Arc::new(Mutex::new(None)),
            enabled: Arc::new(Mutex::new(HashSet::new())),
            on_failure: Arc::new(Mutex::new(None)),
            thread: None,
            thread_id: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run `handler` once if the key source fails after a successful start.
    ///
    /// Not called for failures reported by `start` itself, nor after `stop`.
    pub fn on_failure(&mut self, handler: FailureCallback) {
        *self.on_failure.lock() = Some(handler);
    }

    /// Open the key source on a new thread and start delivering.
    ///
    /// Every bound action starts enabled. Fails if the source cannot be
    /// opened, in which case no thread is left behind.
    pub fn start(
        &mut self,
        bindings: HotkeyBindings,
        source: KeySourceFactory,
        callback: HotkeyCallback,
        poll: Duration,
    ) -> Result<(), ListenerError> {
        if self.thread.is_some() {
            return Err(ListenerError::AlreadyRunning);
        }
        if bindings.is_empty() {
            log::warn!("[HOTKEY] No key bindings configured");
        }

        *self.enabled.lock() = bindings.iter().map(|(_, action)| *action).collect();
        *self.callback.lock() = Some(callback);
        self.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = bounded::<Result<(), ListenerError>>(1);
        let running = Arc::clone(&self.running);
        let callback = Arc::clone(&self.callback);
        let enabled = Arc::clone(&self.enabled);
        let on_failure = Arc::clone(&self.on_failure);

        let spawned = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                let mut source = match source() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    },
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    },
                };
                if let Err(e) = listen(source.as_mut(), &bindings, &running, &callback, &enabled, poll) {
                    let handler = on_failure.lock().take();
                    if let Some(handler) = handler {
                        handler(e);
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.reset();
                return Err(ListenerError::Unavailable(format!("listener thread: {}", e)));
            },
        };

        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(ListenerError::Unavailable("listener thread exited".to_string())));
        if let Err(e) = opened {
            let _ = handle.join();
            self.reset();
            log::warn!("[HOTKEY] {}", e);
            return Err(e);
        }

        self.thread_id = Some(handle.thread().id());
        self.thread = Some(handle);
        log::info!("[HOTKEY] Listener started");
        Ok(())
    }

    /// Turn delivery of one action on or off without touching the hooks.
    pub fn set_enabled(&self, action: HotkeyAction, enabled: bool) {
        let mut set = self.enabled.lock();
        if enabled {
            set.insert(action);
        } else {
            set.remove(&action);
        }
    }

    /// Stop listening. Safe from any thread, including the callback itself.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let on_listener_thread = self.thread_id == Some(thread::current().id());
        if on_listener_thread {
            // Already inside a delivery; the loop exits once it returns.
            self.thread = None;
            return;
        }

        // Waits for an in-flight delivery, then blocks new ones.
        self.callback.lock().take();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[HOTKEY] Listener thread panicked");
            }
            log::info!("[HOTKEY] Listener stopped");
        }
        self.on_failure.lock().take();
        self.thread_id = None;
    }

    fn reset(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.callback.lock().take();
        self.on_failure.lock().take();
        self.enabled.lock().clear();
    }
}

impl Default for HotkeyListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Deliver presses until stopped. Returns the source error that ended a
/// running listener; failures racing a `stop()` are not reported.
fn listen(
    source: &mut dyn KeySource,
    bindings: &HotkeyBindings,
    running: &AtomicBool,
    callback: &Mutex<Option<HotkeyCallback>>,
    enabled: &Mutex<HashSet<HotkeyAction>>,
    poll: Duration,
) -> Result<(), ListenerError> {
    while running.load(Ordering::SeqCst) {
        let key = match source.next_press(poll) {
            Ok(Some(key)) => key,
            Ok(None) => continue,
            Err(e) => {
                if !running.swap(false, Ordering::SeqCst) {
                    break;
                }
                log::error!("[HOTKEY] Key source failed: {}", e);
                return Err(e);
            },
        };

        let Some(action) = bindings.action_for(&key) else {
            continue;
        };
        if !enabled.lock().contains(&action) {
            log::debug!("[HOTKEY] '{}' pressed while {:?} is disabled", key, action);
            continue;
        }

        let guard = callback.lock();
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if let Some(cb) = guard.as_ref() {
            log::debug!("[HOTKEY] '{}' -> {:?}", key, action);
            cb(action);
        }
    }
    Ok(())
}

// ============================================================================
// device_query Source
// ============================================================================

#[cfg(feature = "global-hotkeys")]
pub use self::device::device_query_source;

#[cfg(feature = "global-hotkeys")]
mod device {
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    use device_query::{DeviceQuery, DeviceState, Keycode};

    use super::{KeySource, KeySourceFactory};
    use crate::config::KeyId;
    use crate::error::ListenerError;

    /// Polls the global keyboard state and reports newly pressed keys.
    struct DeviceQueryKeySource {
        state: DeviceState,
        held: Vec<Keycode>,
        pending: VecDeque<KeyId>,
        poll: Duration,
    }

    /// Global key source backed by `device_query`, sampling every `poll`.
    pub fn device_query_source(poll: Duration) -> KeySourceFactory {
        Box::new(move || {
            let state = open_device_state()?;
            let held = state.get_keys();
            Ok(Box::new(DeviceQueryKeySource {
                state,
                held,
                pending: VecDeque::new(),
                poll,
            }) as Box<dyn KeySource>)
        })
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn open_device_state() -> Result<DeviceState, ListenerError> {
        DeviceState::checked_new().ok_or_else(|| {
            ListenerError::Unavailable(
                "keyboard state not readable (no X display or missing accessibility permission)"
                    .to_string(),
            )
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn open_device_state() -> Result<DeviceState, ListenerError> {
        Ok(DeviceState::new())
    }

    /// `Keycode::A` -> "a", `Keycode::Key7` -> "7", `Keycode::Up` -> "arrowup".
    fn key_id(key: &Keycode) -> Option<KeyId> {
        let name = format!("{:?}", key).to_lowercase();
        let name = match name.strip_prefix("key") {
            Some(digit) if digit.len() == 1 && digit.chars().all(|c| c.is_ascii_digit()) => digit.to_string(),
            _ => name,
        };
        KeyId::parse(&name).ok()
    }

    impl KeySource for DeviceQueryKeySource {
        fn next_press(&mut self, timeout: Duration) -> Result<Option<KeyId>, ListenerError> {
            let deadline = Instant::now() + timeout;
            loop {
                if let Some(key) = self.pending.pop_front() {
                    return Ok(Some(key));
                }

                let keys = self.state.get_keys();
                for key in keys.iter().filter(|k| !self.held.contains(*k)) {
                    if let Some(id) = key_id(key) {
                        self.pending.push_back(id);
                    }
                }
                self.held = keys;

                if !self.pending.is_empty() {
                    continue;
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                std::thread::sleep(self.poll.min(deadline - now));
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(5);

    fn key(name: &str) -> KeyId {
        KeyId::parse(name).unwrap()
    }

    fn counting_callback() -> (Arc<Mutex<Vec<HotkeyAction>>>, HotkeyCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Box::new(move |action| sink.lock().push(action)))
    }

    fn wait_until(pred: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        pred()
    }

    #[test]
    fn delivers_bound_actions() {
        let (tx, source) = channel_source();
        let (seen, callback) = counting_callback();
        let mut listener = HotkeyListener::new();
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();

        tx.send(key("x")).unwrap();
        tx.send(key("s")).unwrap();
        tx.send(key("p")).unwrap();

        assert!(wait_until(|| seen.lock().len() == 2));
        assert_eq!(
            *seen.lock(),
            vec![HotkeyAction::Stop, HotkeyAction::ReservedPause]
        );
        listener.stop();
    }

    #[test]
    fn disabled_action_is_not_delivered() {
        let (tx, source) = channel_source();
        let (seen, callback) = counting_callback();
        let mut listener = HotkeyListener::new();
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();

        listener.set_enabled(HotkeyAction::Stop, false);
        tx.send(key("s")).unwrap();
        tx.send(key("u")).unwrap();
        assert!(wait_until(|| seen.lock().len() == 1));
        assert_eq!(*seen.lock(), vec![HotkeyAction::ReservedResume]);

        listener.set_enabled(HotkeyAction::Stop, true);
        tx.send(key("s")).unwrap();
        assert!(wait_until(|| seen.lock().len() == 2));
        listener.stop();
    }

    #[test]
    fn no_delivery_after_stop() {
        let (tx, source) = channel_source();
        let (seen, callback) = counting_callback();
        let mut listener = HotkeyListener::new();
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();

        listener.stop();
        assert!(!listener.is_running());
        let _ = tx.send(key("s"));
        thread::sleep(Duration::from_millis(50));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn stop_from_another_thread() {
        let (_tx, source) = channel_source();
        let (_seen, callback) = counting_callback();
        let mut listener = HotkeyListener::new();
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();

        thread::spawn(move || listener.stop()).join().unwrap();
    }

    #[test]
    fn in_flight_delivery_finishes_before_stop_returns() {
        let (tx, source) = channel_source();
        let entered = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicUsize::new(0));
        let callback: HotkeyCallback = {
            let entered = Arc::clone(&entered);
            let finished = Arc::clone(&finished);
            Box::new(move |_| {
                entered.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                finished.fetch_add(1, Ordering::SeqCst);
            })
        };

        let mut listener = HotkeyListener::new();
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();
        tx.send(key("s")).unwrap();
        assert!(wait_until(|| entered.load(Ordering::SeqCst)));

        listener.stop();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_source_fails_start() {
        let (_seen, callback) = counting_callback();
        let mut listener = HotkeyListener::new();
        let err = listener
            .start(
                HotkeyBindings::default(),
                unavailable_source("no display"),
                callback,
                POLL,
            )
            .unwrap_err();

        assert_eq!(err, ListenerError::Unavailable("no display".to_string()));
        assert!(!listener.is_running());
    }

    #[test]
    fn source_failure_is_reported_once() {
        let (tx, source) = channel_source();
        let (_seen, callback) = counting_callback();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut listener = HotkeyListener::new();
        {
            let failures = Arc::clone(&failures);
            listener.on_failure(Box::new(move |e| failures.lock().push(e)));
        }
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();

        drop(tx);
        assert!(wait_until(|| !failures.lock().is_empty()));
        assert!(!listener.is_running());
        listener.stop();
        assert_eq!(
            *failures.lock(),
            vec![ListenerError::Unavailable("key channel closed".to_string())]
        );
    }

    #[test]
    fn failure_after_stop_is_not_reported() {
        let (tx, source) = channel_source();
        let (_seen, callback) = counting_callback();
        let failures = Arc::new(AtomicUsize::new(0));
        let mut listener = HotkeyListener::new();
        {
            let failures = Arc::clone(&failures);
            listener.on_failure(Box::new(move |_| {
                failures.fetch_add(1, Ordering::SeqCst);
            }));
        }
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();

        listener.stop();
        drop(tx);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_start_is_rejected() {
        let (_tx, source) = channel_source();
        let (_tx2, source2) = channel_source();
        let (_seen, callback) = counting_callback();
        let (_seen2, callback2) = counting_callback();
        let mut listener = HotkeyListener::new();
        listener
            .start(HotkeyBindings::default(), source, callback, POLL)
            .unwrap();

        assert_eq!(
            listener
                .start(HotkeyBindings::default(), source2, callback2, POLL)
                .unwrap_err(),
            ListenerError::AlreadyRunning
        );
        listener.stop();
    }
}

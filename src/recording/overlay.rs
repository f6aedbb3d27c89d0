//! Recording indicator.
//!
//! The indicator lives on the presentation thread and is driven by that
//! thread's own timer through [`OverlayIndicator::pump`]. Other threads never
//! touch it directly; they send `Show`/`Hide` commands through a cloneable
//! [`OverlayHandle`].

use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::types::OverlayState;

/// Something that can draw the indicator (a window, a console line, ...).
pub trait OverlaySurface {
    /// Draw the current state.
    fn render(&mut self, state: &OverlayState);

    /// Tear down any native widget. Called on hide.
    fn release(&mut self) {}
}

/// Commands accepted by the indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayCommand {
    /// Start ticking; elapsed time counts from the given instant.
    Show(Instant),
    Hide,
}

/// Thread-safe sender for overlay commands.
#[derive(Debug, Clone)]
pub struct OverlayHandle {
    tx: Sender<OverlayCommand>,
}

impl OverlayHandle {
    pub fn show(&self, started_at: Instant) {
        self.send(OverlayCommand::Show(started_at));
    }

    pub fn hide(&self) {
        self.send(OverlayCommand::Hide);
    }

    fn send(&self, cmd: OverlayCommand) {
        if self.tx.send(cmd).is_err() {
            log::debug!("[OVERLAY] Indicator gone, dropping {:?}", cmd);
        }
    }

    /// A handle whose commands go nowhere.
    pub fn detached() -> Self {
        let (tx, _) = unbounded();
        Self { tx }
    }
}

/// Blinking "REC" indicator with elapsed time.
pub struct OverlayIndicator<S: OverlaySurface> {
    surface: S,
    state: OverlayState,
    interval: Duration,
    started_at: Option<Instant>,
    next_tick: Option<Instant>,
    tx: Sender<OverlayCommand>,
    rx: Receiver<OverlayCommand>,
}

impl<S: OverlaySurface> OverlayIndicator<S> {
    pub fn new(surface: S, interval: Duration) -> Self {
        let (tx, rx) = unbounded();
        Self {
            surface,
            state: OverlayState::default(),
            interval,
            started_at: None,
            next_tick: None,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> OverlayHandle {
        OverlayHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn is_ticking(&self) -> bool {
        self.next_tick.is_some()
    }

    /// When the presentation timer should next call `pump`.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Show the indicator, counting from `started_at`.
    pub fn show(&mut self, started_at: Instant) {
        self.show_at(started_at, Instant::now());
    }

    fn show_at(&mut self, started_at: Instant, now: Instant) {
        log::debug!("[OVERLAY] Show");
        self.started_at = Some(started_at);
        self.state = OverlayState {
            visible: true,
            elapsed_secs: now.saturating_duration_since(started_at).as_secs(),
            blink_on: true,
        };
        self.next_tick = Some(now + self.interval);
        self.surface.render(&self.state);
    }

    /// Stop ticking and release the widget. Hiding twice is harmless.
    pub fn hide(&mut self) {
        if !self.state.visible && self.next_tick.is_none() {
            return;
        }
        log::debug!("[OVERLAY] Hide");
        self.started_at = None;
        self.next_tick = None;
        self.state = OverlayState::default();
        self.surface.render(&self.state);
        self.surface.release();
    }

    /// Apply queued commands and run the tick if it is due. Never blocks.
    pub fn pump(&mut self, now: Instant) {
        while let Ok(cmd) = self.rx.try_recv() {
            match cmd {
                OverlayCommand::Show(started_at) => self.show_at(started_at, now),
                OverlayCommand::Hide => self.hide(),
            }
        }

        if let Some(due) = self.next_tick {
            if now >= due {
                self.tick(now);
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        let Some(started_at) = self.started_at else {
            return;
        };
        self.state.blink_on = !self.state.blink_on;
        self.state.elapsed_secs = now.saturating_duration_since(started_at).as_secs();

        // Skip missed ticks instead of replaying them.
        let mut next = self.next_tick.unwrap_or(now) + self.interval;
        if next <= now {
            next = now + self.interval;
        }
        self.next_tick = Some(next);
        self.surface.render(&self.state);
    }
}

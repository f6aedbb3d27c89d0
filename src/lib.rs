//! Screen recorder.
//!
//! Supervises an ffmpeg screen capture with a recording indicator, global
//! stop hotkey and drag-to-select regions. [`run`] is a console front end
//! over [`recording::SessionController`].

pub mod config;
pub mod error;
pub mod logging;
pub mod recording;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{never, select, unbounded, Sender};

pub use config::RecorderConfig;
pub use error::{ErrorKind, RecorderError, RecorderResult};

use error::{OptionExt, StartError};
use recording::devices::{fallback_display, find_display_for_point};
use recording::{
    probe_version, AcceptSuggestedPath, DeviceCatalog, FfmpegTool, KeySourceFactory,
    OutputPathPicker, OverlayIndicator, OverlayState, OverlaySurface, Resolution, SessionConfig,
    SessionController, SessionObserver, SessionState, StopOutcome, StopReason,
    SystemDeviceCatalog,
};

// ============================================================================
// Console Presentation
// ============================================================================

/// Prints state changes and forwards the final outcome to the main loop.
struct ConsoleObserver {
    ended: Sender<(StopOutcome, StopReason)>,
}

impl SessionObserver for ConsoleObserver {
    fn on_state_changed(&self, state: SessionState) {
        log::debug!("State: {:?}", state);
    }

    fn on_session_ended(&self, outcome: &StopOutcome, reason: StopReason) {
        let _ = self.ended.send((outcome.clone(), reason));
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        match kind {
            ErrorKind::Listener => eprintln!("Warning: global hotkeys unavailable ({})", message),
            _ => eprintln!("Error: {}", message),
        }
    }
}

/// One-line "REC hh:mm:ss" indicator on stdout.
struct ConsoleOverlay;

impl OverlaySurface for ConsoleOverlay {
    fn render(&mut self, state: &OverlayState) {
        if !state.visible {
            return;
        }
        let dot = if state.blink_on { '●' } else { ' ' };
        print!("\r{} REC {}", dot, state.elapsed_label());
        let _ = std::io::stdout().flush();
    }

    fn release(&mut self) {
        println!();
    }
}

#[cfg(feature = "global-hotkeys")]
fn hotkey_source(config: &RecorderConfig) -> KeySourceFactory {
    recording::device_query_source(config.hotkey_poll())
}

#[cfg(not(feature = "global-hotkeys"))]
fn hotkey_source(_config: &RecorderConfig) -> KeySourceFactory {
    recording::unavailable_source("built without the global-hotkeys feature")
}

/// Record the primary display until Enter or the stop hotkey.
///
/// Usage: `screen-recorder [OUTPUT] [WIDTHxHEIGHT]`. Returns the process exit
/// code.
pub fn run() -> i32 {
    let config_path = RecorderConfig::default_path();
    let first_run = !config_path.exists();
    let (config, config_error) = match RecorderConfig::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (RecorderConfig::default(), Some(e)),
    };

    if let Err(e) = logging::init(&config.log) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    if let Some(e) = config_error {
        log::warn!("Ignoring unreadable config {}: {}", config_path.display(), e);
    } else if first_run {
        match config.save(&config_path) {
            Ok(()) => log::info!("Wrote default config to {}", config_path.display()),
            Err(e) => log::warn!("Could not write default config: {}", e),
        }
    }

    match record(config) {
        Ok(outcome) if outcome.is_success() => 0,
        Ok(_) => 1,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            1
        },
    }
}

/// Suggested output file: the configured default name, or a unique
/// timestamped one when that file already exists.
fn suggested_output(config: &RecorderConfig) -> RecorderResult<PathBuf> {
    let default = config.default_output_path();
    if default.exists() {
        return config::generate_output_path(&config.output_dir);
    }
    Ok(default)
}

fn record(config: RecorderConfig) -> RecorderResult<StopOutcome> {
    let mut args = std::env::args().skip(1);
    let output_arg = args.next();
    let resolution = match args.next() {
        Some(arg) => Resolution::parse(&arg)?,
        None => config.resolution,
    };

    let tool = FfmpegTool::discover(config.ffmpeg_path.as_deref()).ok_or(RecorderError::FfmpegNotFound)?;
    let ffmpeg = tool.binary().to_path_buf();
    match probe_version(&ffmpeg) {
        Some(version) => log::info!("Using {} ({})", ffmpeg.display(), version),
        None => log::warn!("Could not read ffmpeg version from {}", ffmpeg.display()),
    }

    // The primary monitor is the one holding the desktop origin.
    let catalog = SystemDeviceCatalog::new(Some(ffmpeg));
    let displays = catalog.displays();
    let display = find_display_for_point(&displays, 0, 0)
        .or_else(|| displays.first())
        .cloned()
        .unwrap_or_else(|| fallback_display(resolution));

    let suggested = match output_arg {
        Some(arg) => PathBuf::from(arg),
        None => suggested_output(&config)?,
    };
    let output_path = AcceptSuggestedPath.pick(&suggested).context("no output path chosen")?;
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let session = SessionConfig {
        display,
        region: None,
        frame_rate: config.fps,
        resolution,
        audio_device: config.audio_device.clone(),
        audio_bitrate: config.audio_bitrate.clone(),
        output_path,
    };

    let (ended_tx, ended_rx) = unbounded();
    let mut overlay = OverlayIndicator::new(ConsoleOverlay, config.overlay_tick());
    let controller = SessionController::init(
        &config,
        Arc::new(tool),
        hotkey_source(&config),
        overlay.handle(),
        Arc::new(ConsoleObserver { ended: ended_tx }),
    );

    controller.begin_session(session).map_err(|e| match e {
        StartError::InvalidConfig(e) => RecorderError::Config(e),
        other => RecorderError::Spawn(other.to_string()),
    })?;

    let stop_key = config
        .hotkeys
        .key_for(config::HotkeyAction::Stop)
        .map(|k| format!(" or '{}'", k))
        .unwrap_or_default();
    println!("Recording. Press Enter{} to stop.", stop_key);

    let (enter_tx, mut enter_rx) = unbounded::<()>();
    let stdin_thread = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let mut line = String::new();
            if matches!(std::io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
                let _ = enter_tx.send(());
            }
        });
    if let Err(e) = stdin_thread {
        log::warn!("Console input unavailable: {}", e);
    }

    let (outcome, reason) = loop {
        let now = Instant::now();
        overlay.pump(now);
        let wait = overlay
            .next_deadline()
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or(Duration::from_millis(100));

        select! {
            recv(ended_rx) -> msg => match msg {
                Ok(ended) => break ended,
                Err(_) => return Err(RecorderError::Runtime("controller stopped unexpectedly".to_string())),
            },
            recv(enter_rx) -> msg => match msg {
                Ok(()) => controller.request_end(StopReason::UserButton),
                // stdin closed; only the hotkey can stop now
                Err(_) => enter_rx = never(),
            },
            default(wait) => {},
        }
    };

    controller.teardown();
    overlay.pump(Instant::now());

    if outcome.is_success() {
        if !reason.is_graceful() {
            println!("The capture tool ended the recording on its own.");
        }
        println!(
            "Saved {} ({:.1}s, {} bytes)",
            outcome.output_path.display(),
            outcome.duration_secs,
            outcome.file_size_bytes
        );
    } else {
        eprintln!(
            "Recording failed: {}",
            outcome.error.as_deref().unwrap_or("capture tool error")
        );
    }
    Ok(outcome)
}

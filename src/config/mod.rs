//! Application configuration.
//!
//! `RecorderConfig` gathers every tunable of the recorder in one typed struct
//! that round-trips through a JSON file:
//!
//! - Capture defaults (frame rate, resolution, audio bitrate, output dir)
//! - Supervision timings (liveness window, graceful/forced stop timeouts)
//! - Overlay and hotkey polling intervals
//! - Hotkey bindings
//! - Log file settings
//!
//! The config is passed explicitly to the components that need it; there is
//! no process-wide instance.

pub mod hotkeys;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RecorderResult, ResultExt};
use crate::recording::Resolution;

pub use hotkeys::{HotkeyAction, HotkeyBindings, KeyId};

/// Audio bitrates offered by the settings UI.
pub const AUDIO_BITRATES: [&str; 6] = ["96k", "128k", "160k", "192k", "256k", "320k"];

/// Default file name for new recordings.
pub const DEFAULT_OUTPUT_NAME: &str = "screen_recording.mp4";

/// Log file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Directory holding the log files.
    pub dir: PathBuf,
    /// Active log file name; rotated copies get `.1`, `.2`, ... suffixes.
    pub file_name: String,
    /// Size at which the active file is rotated.
    pub max_bytes: u64,
    /// Number of rotated files kept.
    pub backup_count: usize,
    /// Also write to stderr.
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: "app.log".to_string(),
            max_bytes: 1_000_000,
            backup_count: 3,
            console: true,
        }
    }
}

/// Centralized recorder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Explicit ffmpeg binary. None = sidecar/system lookup.
    pub ffmpeg_path: Option<PathBuf>,

    /// Frames per second (10-60).
    pub fps: u32,

    /// Capture size when no region is selected.
    pub resolution: Resolution,

    /// Audio bitrate (one of `AUDIO_BITRATES`).
    pub audio_bitrate: String,

    /// Selected audio input device. None = no audio.
    pub audio_device: Option<String>,

    /// Directory new recordings are written to.
    pub output_dir: PathBuf,

    /// How long a freshly spawned tool must survive before it counts as recording.
    pub liveness_window_ms: u64,

    /// Grace period after the stop request before the tool is killed.
    pub stop_timeout_ms: u64,

    /// Wait after a kill before giving up on the exit status.
    pub kill_timeout_ms: u64,

    /// Exit-status polling interval of the drain thread.
    pub drain_poll_ms: u64,

    /// Overlay refresh interval.
    pub overlay_tick_ms: u64,

    /// Keyboard polling interval of the hotkey listener.
    pub hotkey_poll_ms: u64,

    /// Global key bindings.
    pub hotkeys: HotkeyBindings,

    /// Log file settings.
    pub log: LogConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            fps: 30,
            resolution: Resolution::default(),
            audio_bitrate: "128k".to_string(),
            audio_device: None,
            output_dir: default_output_dir(),
            liveness_window_ms: 300,
            stop_timeout_ms: 5_000,
            kill_timeout_ms: 2_000,
            drain_poll_ms: 20,
            overlay_tick_ms: 500,
            hotkey_poll_ms: 16,
            hotkeys: HotkeyBindings::default(),
            log: LogConfig::default(),
        }
    }
}

impl RecorderConfig {
    /// Validate and clamp settings to acceptable ranges.
    pub fn validate(&mut self) {
        self.fps = self.fps.clamp(10, 60);

        if !AUDIO_BITRATES.contains(&self.audio_bitrate.as_str()) {
            log::warn!(
                "[CONFIG] Unsupported audio bitrate {:?}, using 128k",
                self.audio_bitrate
            );
            self.audio_bitrate = "128k".to_string();
        }

        if self.resolution.width % 2 != 0 || self.resolution.height % 2 != 0 {
            self.resolution = Resolution::new(
                crate::recording::even_floor(self.resolution.width),
                crate::recording::even_floor(self.resolution.height),
            );
        }

        self.liveness_window_ms = self.liveness_window_ms.clamp(50, 5_000);
        self.stop_timeout_ms = self.stop_timeout_ms.clamp(500, 60_000);
        self.kill_timeout_ms = self.kill_timeout_ms.clamp(100, 10_000);
        self.drain_poll_ms = self.drain_poll_ms.clamp(5, 500);
        self.overlay_tick_ms = self.overlay_tick_ms.clamp(100, 2_000);
        self.hotkey_poll_ms = self.hotkey_poll_ms.clamp(5, 200);

        if self.audio_device.as_deref().is_some_and(|d| d.trim().is_empty()) {
            self.audio_device = None;
        }
    }

    /// `<config_dir>/screen-recorder/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("screen-recorder")
            .join("config.json")
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> RecorderResult<Self> {
        if !path.exists() {
            log::debug!("[CONFIG] No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: RecorderConfig = serde_json::from_str(&json)?;
        config.validate();
        log::debug!("[CONFIG] Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> RecorderResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn overlay_tick(&self) -> Duration {
        Duration::from_millis(self.overlay_tick_ms)
    }

    pub fn hotkey_poll(&self) -> Duration {
        Duration::from_millis(self.hotkey_poll_ms)
    }

    /// Default output file inside `output_dir`.
    pub fn default_output_path(&self) -> PathBuf {
        self.output_dir.join(DEFAULT_OUTPUT_NAME)
    }
}

/// Downloads folder, falling back to the temp dir.
fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::video_dir)
        .unwrap_or_else(std::env::temp_dir)
}

/// Generate a unique, timestamped output path inside `dir`.
pub fn generate_output_path(dir: &Path) -> RecorderResult<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create save directory {}", dir.display()))?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let filename = format!("recording_{}_{}.mp4", timestamp, rand::random::<u16>());

    Ok(dir.join(filename))
}

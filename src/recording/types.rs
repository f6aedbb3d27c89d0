//! Type definitions for recording sessions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ConfigError;

// ============================================================================
// Geometry
// ============================================================================

/// A display the capture tool can grab, in global desktop coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DisplayInfo {
    /// Identifier understood by the capture tool (e.g. ":0.0" for x11grab).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DisplayInfo {
    pub fn new(id: impl Into<String>, x: i32, y: i32, width: u32, height: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            x,
            y,
            width,
            height,
        }
    }
}

/// A rectangular sub-area of a display, relative to the display origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Round width and height down to the nearest even value, minimum 2.
    pub fn even_aligned(&self) -> Self {
        Self {
            x: self.x,
            y: self.y,
            width: even_floor(self.width),
            height: even_floor(self.height),
        }
    }

    /// Check the even-dimension and display-bounds invariants.
    pub fn validate(&self, display: &DisplayInfo) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::OddRegion {
                width: self.width,
                height: self.height,
            });
        }

        let fits = self.x >= 0
            && self.y >= 0
            && self.x as i64 + self.width as i64 <= display.width as i64
            && self.y as i64 + self.height as i64 <= display.height as i64;
        if !fits {
            return Err(ConfigError::RegionOutOfBounds {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                display_width: display.width,
                display_height: display.height,
            });
        }

        Ok(())
    }
}

/// Largest even number <= `value`, but never below 2.
pub fn even_floor(value: u32) -> u32 {
    (value & !1).max(2)
}

/// Output resolution (width x height).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a "1920x1080" style string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| ConfigError::UnparsableResolution(s.to_string()))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::UnparsableResolution(s.to_string()))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::UnparsableResolution(s.to_string()))?;
        Ok(Self { width, height })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ============================================================================
// Session Settings
// ============================================================================

/// Settings for one recording attempt.
///
/// Built fresh per attempt and treated as immutable once handed to
/// `CaptureSession::start`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionConfig {
    /// Display to capture.
    pub display: DisplayInfo,
    /// Optional sub-area of the display. None = whole display.
    pub region: Option<Region>,
    /// Frames per second.
    pub frame_rate: u32,
    /// Capture size used when no region is set.
    pub resolution: Resolution,
    /// Audio input device name. None = no audio.
    pub audio_device: Option<String>,
    /// Audio bitrate passed to the encoder (e.g. "128k").
    pub audio_bitrate: String,
    /// Destination file.
    #[ts(type = "string")]
    pub output_path: PathBuf,
}

impl SessionConfig {
    /// Whole-display capture with default rate and audio settings.
    pub fn for_display(display: DisplayInfo, output_path: impl Into<PathBuf>) -> Self {
        let resolution = Resolution::new(even_floor(display.width), even_floor(display.height));
        Self {
            display,
            region: None,
            frame_rate: 30,
            resolution,
            audio_device: None,
            audio_bitrate: "128k".to_string(),
            output_path: output_path.into(),
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Check every invariant the capture tool relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_rate == 0 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyOutputPath);
        }
        self.resolution.validate()?;
        if let Some(region) = &self.region {
            region.validate(&self.display)?;
        }
        Ok(())
    }

    /// Size actually captured: the region if set, else the resolution.
    pub fn capture_size(&self) -> Resolution {
        match &self.region {
            Some(r) => Resolution::new(r.width, r.height),
            None => self.resolution,
        }
    }

    /// Global desktop offset of the captured area.
    pub fn capture_offset(&self) -> (i32, i32) {
        match &self.region {
            Some(r) => (self.display.x + r.x, self.display.y + r.y),
            None => (self.display.x, self.display.y),
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    /// Starting, Recording or Stopping.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Recording | SessionState::Stopping
        )
    }

    /// Stopped or Failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

/// Why a recording session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum StopReason {
    /// Stop button in the presentation layer.
    UserButton,
    /// Global stop hotkey.
    HotkeySignal,
    /// Capture tool exited on its own with a success status.
    ProcessExited,
    /// Capture tool crashed, was killed, or left a truncated file.
    ProcessError,
}

impl StopReason {
    /// True for user-initiated endings.
    pub fn is_graceful(&self) -> bool {
        matches!(self, StopReason::UserButton | StopReason::HotkeySignal)
    }
}

/// Final report for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StopOutcome {
    /// Unique id of the session.
    pub session_id: String,
    /// Stopped or Failed.
    pub final_state: SessionState,
    #[ts(type = "string")]
    pub output_path: PathBuf,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    pub duration_secs: f64,
    #[ts(type = "number")]
    pub file_size_bytes: u64,
    /// Tool exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// True when the tool ignored the graceful request and was killed.
    pub forced: bool,
    /// Failure description for Failed sessions.
    pub error: Option<String>,
}

impl StopOutcome {
    pub fn is_success(&self) -> bool {
        self.final_state == SessionState::Stopped
    }
}

/// Snapshot of the on-screen recording indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OverlayState {
    pub visible: bool,
    #[ts(type = "number")]
    pub elapsed_secs: u64,
    /// True while the red dot is lit.
    pub blink_on: bool,
}

impl OverlayState {
    /// Elapsed time as `hh:mm:ss`.
    pub fn elapsed_label(&self) -> String {
        let s = self.elapsed_secs;
        format!("{:02}:{:02}:{:02}", s / 3600, (s / 60) % 60, s % 60)
    }
}

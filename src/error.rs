//! Central error types for the recorder.
//!
//! `RecorderError` is the crate-wide error used by the ambient layers
//! (configuration, logging, tool discovery). The recording components return
//! narrower errors (`StartError`, `StopError`, `ListenerError`, ...) so the
//! presentation layer can tell a user-correctable problem from a fatal one.
//! All errors implement `Serialize` as their display string.

use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

/// Main error type for recorder operations.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Invalid user-supplied settings
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// External capture tool could not be launched
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Capture tool failed while recording
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Global hotkey listener unavailable
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Filesystem operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// FFmpeg binary not found
    #[error("FFmpeg not found. Please install FFmpeg or set ffmpegPath in the config.")]
    FfmpegNotFound,

    /// Lock poisoned (std mutex)
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Serialize for RecorderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<String> for RecorderError {
    fn from(msg: String) -> Self {
        RecorderError::Other(msg)
    }
}

impl From<&str> for RecorderError {
    fn from(msg: &str) -> Self {
        RecorderError::Other(msg.to_string())
    }
}

/// Type alias for Results using RecorderError.
pub type RecorderResult<T> = Result<T, RecorderError>;

// ============================================================================
// Component Errors
// ============================================================================

/// Classification of failures reported to `SessionObserver::on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum ErrorKind {
    /// User-correctable settings problem, raised before anything is spawned.
    Config,
    /// Capture tool missing or unlaunchable.
    Spawn,
    /// Capture tool died or reported an error mid-session.
    Runtime,
    /// Global hotkeys unavailable; recording still works.
    Listener,
}

/// Invalid session settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("region {width}x{height} must have even, positive dimensions")]
    OddRegion { width: u32, height: u32 },

    #[error("region {x},{y} {width}x{height} exceeds display bounds {display_width}x{display_height}")]
    RegionOutOfBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        display_width: u32,
        display_height: u32,
    },

    #[error("resolution {width}x{height} must have even, positive dimensions")]
    InvalidResolution { width: u32, height: u32 },

    #[error("frame rate must be positive")]
    InvalidFrameRate,

    #[error("output path is empty")]
    EmptyOutputPath,

    #[error("invalid resolution string: {0}")]
    UnparsableResolution(String),
}

/// Errors returned when starting a capture session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("failed to launch capture tool: {0}")]
    SpawnFailed(String),

    #[error("a recording is already in progress")]
    AlreadyRunning,

    #[error("start was cancelled by a stop request")]
    Cancelled,
}

impl StartError {
    /// The observer-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StartError::InvalidConfig(_) => ErrorKind::Config,
            StartError::SpawnFailed(_) | StartError::Cancelled => ErrorKind::Spawn,
            StartError::AlreadyRunning => ErrorKind::Config,
        }
    }
}

/// Errors returned when stopping a capture session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StopError {
    #[error("no active recording session")]
    NoActiveSession,
}

/// Returned by the region selector when the user aborts the drag.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("region selection cancelled")]
pub struct SelectionCancelled;

/// Errors from the global hotkey listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("global key hooks unavailable: {0}")]
    Unavailable(String),

    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("invalid key binding: {0}")]
    InvalidBinding(String),
}

// ============================================================================
// Context Helpers
// ============================================================================

/// Helper trait for converting std mutex lock errors to RecorderError.
pub trait LockResultExt<T> {
    /// Convert a poisoned lock error to RecorderError with context.
    fn map_lock_err(self, context: &str) -> Result<T, RecorderError>;
}

impl<T> LockResultExt<T> for Result<T, std::sync::PoisonError<T>> {
    fn map_lock_err(self, context: &str) -> Result<T, RecorderError> {
        self.map_err(|_| RecorderError::LockPoisoned {
            context: context.to_string(),
        })
    }
}

/// Extension trait for adding context to Results.
///
/// # Example
/// ```ignore
/// use crate::error::{ResultExt, RecorderResult};
///
/// fn load() -> RecorderResult<String> {
///     std::fs::read_to_string("config.json").context("failed to read config file")
/// }
/// ```
pub trait ResultExt<T> {
    /// Add context to an error, converting it to RecorderError::Other.
    fn context(self, msg: &str) -> RecorderResult<T>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> RecorderResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> RecorderResult<T> {
        self.map_err(|e| RecorderError::Other(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> RecorderResult<T> {
        self.map_err(|e| RecorderError::Other(format!("{}: {}", f(), e)))
    }
}

/// Extension trait for adding context to Option types.
pub trait OptionExt<T> {
    /// Convert None to RecorderError::Other with the given message.
    fn context(self, msg: &str) -> RecorderResult<T>;

    /// Convert None to RecorderError::Other with a lazily evaluated message.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> RecorderResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn context(self, msg: &str) -> RecorderResult<T> {
        self.ok_or_else(|| RecorderError::Other(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> RecorderResult<T> {
        self.ok_or_else(|| RecorderError::Other(f()))
    }
}

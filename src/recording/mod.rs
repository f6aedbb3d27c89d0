//! Screen recording core.
//!
//! - `capture` supervises the external capture tool
//! - `controller` owns the session state machine
//! - `overlay`, `hotkeys` and `region` are the presentation-side helpers
//! - `ffmpeg` and `devices` integrate the concrete tool and the OS

pub mod capture;
pub mod controller;
pub mod devices;
pub mod ffmpeg;
pub mod hotkeys;
pub mod overlay;
pub mod region;
pub mod types;

#[cfg(test)]
mod testing;
#[cfg(all(test, unix))]
mod tests;

pub use capture::{CaptureEvent, CaptureHandle, CaptureSession, CaptureTimings, CaptureTool};
pub use controller::{SessionController, SessionObserver};
pub use devices::{AcceptSuggestedPath, DeviceCatalog, OutputPathPicker, SystemDeviceCatalog};
pub use ffmpeg::{find_ffmpeg, probe_version, FfmpegTool};
pub use hotkeys::{
    channel_source, unavailable_source, FailureCallback, HotkeyCallback, HotkeyListener, KeySource,
    KeySourceFactory,
};
#[cfg(feature = "global-hotkeys")]
pub use hotkeys::device_query_source;
pub use overlay::{OverlayHandle, OverlayIndicator, OverlaySurface};
pub use region::{PointerEvent, RegionSelector, SelectionOverlay};
pub use types::{
    even_floor, DisplayInfo, OverlayState, Region, Resolution, SessionConfig, SessionState,
    StopOutcome, StopReason,
};

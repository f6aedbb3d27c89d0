//! Display and audio device discovery.
//!
//! The recorder never enumerates devices on its own initiative; the
//! presentation layer asks a [`DeviceCatalog`] and passes the chosen
//! identifiers into the session config.

use std::path::{Path, PathBuf};

use super::ffmpeg::{list_audio_devices, Grabber};
use super::types::{DisplayInfo, Resolution};

/// Source of selectable displays and audio inputs.
pub trait DeviceCatalog {
    fn displays(&self) -> Vec<DisplayInfo>;
    fn audio_devices(&self) -> Vec<String>;
}

/// Chooses where a recording is written.
pub trait OutputPathPicker {
    /// None when the user backs out.
    fn pick(&self, suggested: &Path) -> Option<PathBuf>;
}

/// Accepts the suggested path unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptSuggestedPath;

impl OutputPathPicker for AcceptSuggestedPath {
    fn pick(&self, suggested: &Path) -> Option<PathBuf> {
        Some(suggested.to_path_buf())
    }
}

/// Catalog backed by the OS monitor list and ffmpeg's device listing.
#[derive(Debug, Clone, Default)]
pub struct SystemDeviceCatalog {
    ffmpeg: Option<PathBuf>,
}

impl SystemDeviceCatalog {
    pub fn new(ffmpeg: Option<PathBuf>) -> Self {
        Self { ffmpeg }
    }
}

impl DeviceCatalog for SystemDeviceCatalog {
    fn displays(&self) -> Vec<DisplayInfo> {
        get_monitor_bounds()
    }

    fn audio_devices(&self) -> Vec<String> {
        match &self.ffmpeg {
            Some(path) => list_audio_devices(path),
            None => Vec::new(),
        }
    }
}

/// Display used when the catalog reports none: the primary screen at
/// `resolution`, named the way the platform grabber expects.
pub fn fallback_display(resolution: Resolution) -> DisplayInfo {
    let id = match Grabber::current() {
        Grabber::GdiGrab => "desktop".to_string(),
        Grabber::AvFoundation => "Capture screen 0".to_string(),
        Grabber::X11Grab => std::env::var("DISPLAY")
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| ":0.0".to_string()),
    };
    DisplayInfo::new(id, 0, 0, resolution.width, resolution.height)
}

/// Enumerate monitors in global desktop coordinates.
#[cfg(target_os = "windows")]
pub fn get_monitor_bounds() -> Vec<DisplayInfo> {
    use std::mem;
    use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
    use windows::Win32::Graphics::Gdi::{
        EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFOEXW,
    };

    let mut monitors: Vec<DisplayInfo> = Vec::new();

    unsafe extern "system" fn enum_callback(
        hmonitor: HMONITOR,
        _hdc: HDC,
        _rect: *mut RECT,
        lparam: LPARAM,
    ) -> BOOL {
        let monitors = &mut *(lparam.0 as *mut Vec<DisplayInfo>);

        let mut info: MONITORINFOEXW = mem::zeroed();
        info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;

        if GetMonitorInfoW(hmonitor, &mut info as *mut _ as *mut _).as_bool() {
            let rect = info.monitorInfo.rcMonitor;
            let name = String::from_utf16_lossy(
                &info.szDevice[..info.szDevice.iter().position(|&c| c == 0).unwrap_or(0)],
            );

            // gdigrab addresses every monitor through the virtual desktop.
            let mut display = DisplayInfo::new(
                "desktop",
                rect.left,
                rect.top,
                (rect.right - rect.left) as u32,
                (rect.bottom - rect.top) as u32,
            );
            display.name = name;
            monitors.push(display);
        }

        BOOL(1) // Continue enumeration
    }

    unsafe {
        let _ = EnumDisplayMonitors(
            HDC::default(),
            None,
            Some(enum_callback),
            LPARAM(&mut monitors as *mut _ as isize),
        );
    }

    monitors
}

#[cfg(not(target_os = "windows"))]
pub fn get_monitor_bounds() -> Vec<DisplayInfo> {
    Vec::new()
}

/// Find the display containing a global desktop point.
pub fn find_display_for_point(displays: &[DisplayInfo], x: i32, y: i32) -> Option<&DisplayInfo> {
    displays.iter().find(|d| {
        x >= d.x && x < d.x + d.width as i32 && y >= d.y && y < d.y + d.height as i32
    })
}

//! FFmpeg integration: locating the binary, probing it, listing audio inputs
//! and building the screen-grab command line.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::capture::CaptureTool;
use super::types::SessionConfig;

/// Create a Command configured to hide the console window on Windows.
///
/// The child also gets its own process group so console control events sent
/// to the recorder are not forwarded to ffmpeg.
pub fn create_hidden_command(program: &Path) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
    }

    cmd
}

/// Find a working ffmpeg binary.
///
/// Order: explicit override, ffmpeg-sidecar's path, system PATH. Each
/// candidate is validated by running `-version`.
pub fn find_ffmpeg(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        if test_ffmpeg_binary(path) {
            log::debug!("[FFMPEG] Using configured path: {}", path.display());
            return Some(path.to_path_buf());
        }
        log::warn!(
            "[FFMPEG] Configured path {} is not a working ffmpeg",
            path.display()
        );
    }

    let sidecar_path = ffmpeg_sidecar::paths::ffmpeg_path();
    if test_ffmpeg_binary(&sidecar_path) {
        log::debug!("[FFMPEG] Using sidecar path: {}", sidecar_path.display());
        return Some(sidecar_path);
    }

    log::debug!(
        "[FFMPEG] Sidecar path failed ({}), trying system PATH",
        sidecar_path.display()
    );

    let binary_name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    if let Some(path) = find_in_system_path(binary_name) {
        if test_ffmpeg_binary(&path) {
            log::debug!("[FFMPEG] Using system PATH: {}", path.display());
            return Some(path);
        }
    }

    log::warn!("[FFMPEG] No working ffmpeg found");
    None
}

/// Test if an ffmpeg binary works by running -version
fn test_ffmpeg_binary(path: &Path) -> bool {
    create_hidden_command(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Find an executable in system PATH
fn find_in_system_path(name: &str) -> Option<PathBuf> {
    let cmd = if cfg!(windows) { "where" } else { "which" };

    Command::new(cmd)
        .arg(name)
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                let path_str = String::from_utf8_lossy(&output.stdout);
                let first_line = path_str.lines().next()?.trim();
                if !first_line.is_empty() {
                    return Some(PathBuf::from(first_line));
                }
            }
            None
        })
}

/// First line of `ffmpeg -version`, e.g. "ffmpeg version 6.1.1 ...".
pub fn probe_version(path: &Path) -> Option<String> {
    let output = create_hidden_command(path).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim_end().to_string())
}

/// List audio capture devices known to ffmpeg.
///
/// Only DirectShow exposes a parseable listing; other platforms return an
/// empty list and the presentation layer supplies device names itself.
pub fn list_audio_devices(ffmpeg: &Path) -> Vec<String> {
    if !cfg!(windows) {
        return Vec::new();
    }

    match create_hidden_command(ffmpeg)
        .args(["-hide_banner", "-list_devices", "true", "-f", "dshow", "-i", "dummy"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
    {
        Ok(output) => {
            let devices = parse_dshow_audio_devices(&String::from_utf8_lossy(&output.stderr));
            if devices.is_empty() {
                log::warn!("[FFMPEG] No audio devices found");
            }
            devices
        },
        Err(e) => {
            log::error!("[FFMPEG] Error listing audio devices: {}", e);
            Vec::new()
        },
    }
}

/// Extract `"Name" (audio)` entries from a dshow device listing.
pub fn parse_dshow_audio_devices(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| line.trim_end().ends_with("(audio)"))
        .filter_map(|line| {
            let start = line.find('"')?;
            let rest = &line[start + 1..];
            let end = rest.find('"')?;
            let name = &rest[..end];
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

// ============================================================================
// Screen-grab command
// ============================================================================

/// Platform screen-grab input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grabber {
    /// Windows GDI grabber with DirectShow audio.
    GdiGrab,
    /// macOS AVFoundation (video and audio in one input).
    AvFoundation,
    /// X11 grabber with PulseAudio audio.
    X11Grab,
}

impl Grabber {
    pub fn current() -> Self {
        if cfg!(windows) {
            Grabber::GdiGrab
        } else if cfg!(target_os = "macos") {
            Grabber::AvFoundation
        } else {
            Grabber::X11Grab
        }
    }
}

/// Build the ffmpeg argument list for a validated session config.
pub fn build_args(config: &SessionConfig, grabber: Grabber) -> Vec<String> {
    let fps = config.frame_rate.to_string();
    let size = config.capture_size();
    let (offset_x, offset_y) = config.capture_offset();
    let audio = config.audio_device.as_deref();

    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostats".into()];
    let mut video_filter = None;

    match grabber {
        Grabber::GdiGrab => {
            args.extend([
                "-f".into(),
                "gdigrab".into(),
                "-framerate".into(),
                fps,
                "-offset_x".into(),
                offset_x.to_string(),
                "-offset_y".into(),
                offset_y.to_string(),
                "-video_size".into(),
                size.to_string(),
                "-i".into(),
                "desktop".into(),
            ]);
            if let Some(device) = audio {
                args.extend(["-f".into(), "dshow".into(), "-i".into(), format!("audio={}", device)]);
            }
        },
        Grabber::AvFoundation => {
            args.extend([
                "-f".into(),
                "avfoundation".into(),
                "-framerate".into(),
                fps,
                "-capture_cursor".into(),
                "1".into(),
                "-i".into(),
                format!("{}:{}", config.display.id, audio.unwrap_or("none")),
            ]);
            if let Some(r) = &config.region {
                video_filter = Some(format!("crop={}:{}:{}:{}", r.width, r.height, r.x, r.y));
            }
        },
        Grabber::X11Grab => {
            args.extend([
                "-f".into(),
                "x11grab".into(),
                "-framerate".into(),
                fps,
                "-video_size".into(),
                size.to_string(),
                "-i".into(),
                format!("{}+{},{}", config.display.id, offset_x, offset_y),
            ]);
            if let Some(device) = audio {
                args.extend(["-f".into(), "pulse".into(), "-i".into(), device.to_string()]);
            }
        },
    }

    if let Some(filter) = video_filter {
        args.extend(["-vf".into(), filter]);
    }

    args.extend([
        "-vcodec".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-preset".into(),
        "ultrafast".into(),
    ]);

    if audio.is_some() {
        args.extend([
            "-acodec".into(),
            "aac".into(),
            "-b:a".into(),
            config.audio_bitrate.clone(),
        ]);
    }

    args.extend(["-y".into(), config.output_path.to_string_lossy().to_string()]);
    args
}

/// The ffmpeg screen recorder.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    binary: PathBuf,
    grabber: Grabber,
}

impl FfmpegTool {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            grabber: Grabber::current(),
        }
    }

    /// Locate ffmpeg (see [`find_ffmpeg`]) and wrap it.
    pub fn discover(override_path: Option<&Path>) -> Option<Self> {
        find_ffmpeg(override_path).map(Self::new)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl CaptureTool for FfmpegTool {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn command(&self, config: &SessionConfig) -> Command {
        let args = build_args(config, self.grabber);
        log::debug!("[FFMPEG] {} {}", self.binary.display(), args.join(" "));
        let mut cmd = create_hidden_command(&self.binary);
        cmd.args(args);
        cmd
    }

    /// ffmpeg finalizes the container when it reads `q` on stdin.
    fn stop_sequence(&self) -> &[u8] {
        b"q"
    }

    fn is_graceful_exit(&self, code: Option<i32>) -> bool {
        matches!(code, Some(0) | Some(2) | Some(130) | Some(255))
    }

    /// Printed once the inputs are open and encoding has begun.
    fn is_ready_line(&self, line: &str) -> bool {
        line.starts_with("Press [q] to stop")
    }
}

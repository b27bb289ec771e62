//! External tool discovery
//!
//! Locates the `yt-dlp` and `ffmpeg` binaries the extractor shells out to.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// Explicit ffmpeg binary path
pub const FFMPEG_BINARY_ENV: &str = "FFMPEG_BINARY";
/// Explicit ffprobe binary path; its directory is assumed to hold ffmpeg too
pub const FFPROBE_BINARY_ENV: &str = "FFPROBE_BINARY";

/// Where ffmpeg was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfmpegLocation {
    /// Directory to hand to `--ffmpeg-location`
    Directory(PathBuf),
    /// Runnable from `PATH`, no location argument needed
    OnPath,
}

impl FfmpegLocation {
    pub fn directory(&self) -> Option<&Path> {
        match self {
            FfmpegLocation::Directory(dir) => Some(dir),
            FfmpegLocation::OnPath => None,
        }
    }
}

/// Locate ffmpeg: a configured location wins, then `FFMPEG_BINARY`, then
/// `FFPROBE_BINARY`, then `ffmpeg -version` on `PATH`.
pub async fn locate_ffmpeg(configured: Option<&Path>) -> Option<FfmpegLocation> {
    if let Some(path) = configured {
        if let Some(location) = location_for_existing(path) {
            info!("Using configured ffmpeg location: {:?}", location);
            return Some(location);
        }
        debug!("Configured ffmpeg location {:?} does not exist", path);
    }

    let from_env = location_from_env(
        std::env::var_os(FFMPEG_BINARY_ENV),
        std::env::var_os(FFPROBE_BINARY_ENV),
    );
    if from_env.is_some() {
        info!("Using ffmpeg location from environment: {:?}", from_env);
        return from_env;
    }

    if probe_binary(Path::new(ffmpeg_binary_name()), "-version").await {
        debug!("ffmpeg found on PATH");
        return Some(FfmpegLocation::OnPath);
    }

    None
}

/// Resolve the env var pair the way `locate_ffmpeg` does, without reading
/// the process environment
pub fn location_from_env(
    ffmpeg_binary: Option<OsString>,
    ffprobe_binary: Option<OsString>,
) -> Option<FfmpegLocation> {
    [ffmpeg_binary, ffprobe_binary]
        .into_iter()
        .flatten()
        .filter(|value| !value.is_empty())
        .find_map(|value| location_for_existing(Path::new(&value)))
}

fn location_for_existing(path: &Path) -> Option<FfmpegLocation> {
    if !path.exists() {
        return None;
    }
    if path.is_dir() {
        return Some(FfmpegLocation::Directory(path.to_path_buf()));
    }
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(|parent| FfmpegLocation::Directory(parent.to_path_buf()))
        .or(Some(FfmpegLocation::OnPath))
}

/// Whether `yt-dlp` at `binary` runs
pub async fn is_ytdlp_available(binary: &Path) -> bool {
    probe_binary(binary, "--version").await
}

/// Run `binary arg` with output discarded and report success
pub async fn probe_binary(binary: &Path, arg: &str) -> bool {
    tokio::process::Command::new(binary)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Platform name of the yt-dlp executable
pub fn ytdlp_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

fn ffmpeg_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

//! Media Extraction Module
//!
//! The seam between the batch pipeline and the external extraction tool.
//! [`MediaExtractor`] is what the pipeline talks to; [`YtDlpExtractor`] is
//! the production implementation, driving `yt-dlp` as a child process and
//! turning its machine-readable progress lines into [`ExtractionProgress`]
//! events.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::core::dependencies::{self, FfmpegLocation};
use crate::core::format_resolver::FormatPlan;
use crate::core::models::{AppError, AppResult, ErrorKind, PlaylistDescriptor, VideoDescriptor};

const PROGRESS_PREFIX: &str = "DOWNLOAD|";
const POSTPROCESS_PREFIX: &str = "POSTPROCESS|";
const FINAL_PATH_PREFIX: &str = "FINAL|";

/// Leftovers yt-dlp may leave next to the real output
const PARTIAL_SUFFIXES: [&str; 4] = [".part", ".ytdl", ".temp", ".tmp"];

/// Stage reported by the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStage {
    Fetching,
    Downloading,
    Processing,
}

/// One raw progress event from the extractor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub stage: ExtractionStage,
}

impl ExtractionProgress {
    pub fn stage(stage: ExtractionStage) -> Self {
        Self {
            downloaded_bytes: 0,
            total_bytes: None,
            stage,
        }
    }

    /// Byte percent of the current stream, `None` when the size is unknown
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64 * 100.0).min(100.0))
            }
            _ => None,
        }
    }
}

/// Extractor progress callback
pub type ExtractionProgressCallback = Arc<dyn Fn(ExtractionProgress) + Send + Sync>;

/// Metadata and download collaborator
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Metadata for a single video
    async fn extract_video(&self, url: &str) -> AppResult<VideoDescriptor>;

    /// Flat playlist listing, entries in playlist order
    async fn extract_playlist(&self, url: &str) -> AppResult<PlaylistDescriptor>;

    /// Download `item` into `output_dir` as `<file_stem>.<ext>` according to
    /// `plan` and return the path of the produced file
    async fn download(
        &self,
        item: &VideoDescriptor,
        plan: &FormatPlan,
        output_dir: &Path,
        file_stem: &str,
        progress: ExtractionProgressCallback,
    ) -> AppResult<PathBuf>;
}

/// yt-dlp invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub ytdlp_binary: PathBuf,
    /// Directory or binary path for `--ffmpeg-location`; discovered when unset
    pub ffmpeg_location: Option<PathBuf>,
    pub socket_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_binary: PathBuf::from(dependencies::ytdlp_binary_name()),
            ffmpeg_location: None,
            socket_timeout_secs: 30,
        }
    }
}

/// [`MediaExtractor`] backed by the `yt-dlp` command line tool
pub struct YtDlpExtractor {
    config: ExtractorConfig,
    ffmpeg: OnceCell<Option<FfmpegLocation>>,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        info!("Creating yt-dlp extractor with binary {:?}", config.ytdlp_binary);
        Self {
            config,
            ffmpeg: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// ffmpeg lookup, done once per extractor
    pub async fn ffmpeg_location(&self) -> Option<&FfmpegLocation> {
        self.ffmpeg
            .get_or_init(|| async {
                let location =
                    dependencies::locate_ffmpeg(self.config.ffmpeg_location.as_deref()).await;
                if location.is_none() {
                    warn!("ffmpeg not found; merging and audio extraction will fail");
                }
                location
            })
            .await
            .as_ref()
    }

    async fn run_metadata(&self, args: &[&str], url: &str) -> AppResult<String> {
        debug!("Running yt-dlp {:?} {}", args, url);

        let output = Command::new(&self.config.ytdlp_binary)
            .args(args)
            .arg("--socket-timeout")
            .arg(self.config.socket_timeout_secs.to_string())
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AppError::Config(format!(
                    "Failed to run yt-dlp at {:?}: {}",
                    self.config.ytdlp_binary, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = match classify_failure(&stderr) {
                // a metadata call that fails for no known reason means the item
                // cannot be listed
                ErrorKind::Download | ErrorKind::Transcode => ErrorKind::Unavailable,
                kind => kind,
            };
            let message = failure_message(&stderr, output.status.code());
            warn!("yt-dlp metadata call failed ({}): {}", kind, message);
            return Err(error_for(kind, message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn download_args(
        &self,
        item: &VideoDescriptor,
        plan: &FormatPlan,
        output_dir: &Path,
        file_stem: &str,
        ffmpeg: Option<&FfmpegLocation>,
    ) -> Vec<String> {
        let template = output_dir.join(format!("{}.%(ext)s", file_stem));

        let mut args = plan.extractor_args();
        args.extend(
            [
                "--newline",
                "--progress",
                "--progress-template",
                "download:DOWNLOAD|%(progress.downloaded_bytes)s|%(progress.total_bytes,progress.total_bytes_estimate)s",
                "--progress-template",
                "postprocess:POSTPROCESS|%(progress.postprocessor)s|%(progress.status)s",
                "--print",
                "after_move:FINAL|%(filepath)s",
                "--no-playlist",
                "--no-overwrites",
                "--no-warnings",
                "--no-mtime",
                "--encoding",
                "utf-8",
                "--socket-timeout",
            ]
            .map(String::from),
        );
        args.push(self.config.socket_timeout_secs.to_string());

        if let Some(dir) = ffmpeg.and_then(FfmpegLocation::directory) {
            args.push("--ffmpeg-location".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }

        args.push("-o".to_string());
        args.push(template.to_string_lossy().into_owned());
        args.push("--".to_string());
        args.push(item.url.clone());
        args
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract_video(&self, url: &str) -> AppResult<VideoDescriptor> {
        let stdout = self
            .run_metadata(&["--dump-json", "--no-warnings", "--no-playlist"], url)
            .await?;

        let json: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
            AppError::Unavailable(format!("Failed to parse yt-dlp output: {}", e))
        })?;
        parse_video_json(&json)
    }

    async fn extract_playlist(&self, url: &str) -> AppResult<PlaylistDescriptor> {
        let stdout = self
            .run_metadata(&["--dump-json", "--no-warnings", "--flat-playlist"], url)
            .await?;
        Ok(parse_playlist_lines(&stdout))
    }

    async fn download(
        &self,
        item: &VideoDescriptor,
        plan: &FormatPlan,
        output_dir: &Path,
        file_stem: &str,
        progress: ExtractionProgressCallback,
    ) -> AppResult<PathBuf> {
        let ffmpeg = self.ffmpeg_location().await;
        if plan.requires_ffmpeg() && ffmpeg.is_none() {
            return Err(AppError::Transcode(
                "FFmpeg not found. Install ffmpeg or set FFMPEG_BINARY".to_string(),
            ));
        }

        let args = self.download_args(item, plan, output_dir, file_stem, ffmpeg);
        debug!("Running yt-dlp {:?}", args);
        progress(ExtractionProgress::stage(ExtractionStage::Fetching));

        let mut child = Command::new(&self.config.ytdlp_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Download(format!("Failed to start yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Download("yt-dlp stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Download("yt-dlp stderr unavailable".to_string()))?;

        // quiet mode routes progress to stderr, so both streams are scanned
        let stderr_task = tokio::spawn(read_output(stderr, progress.clone()));
        let stdout_scan = read_output(stdout, progress.clone()).await;

        let status = child.wait().await?;
        let stderr_scan = stderr_task.await.unwrap_or_default();
        let reported = stdout_scan.final_path.or(stderr_scan.final_path);
        let stderr_text = stderr_scan.lines.join("\n");

        if !status.success() {
            return settle_failed_run(
                &item.title,
                plan,
                &stderr_text,
                status.code(),
                reported,
                output_dir,
            )
            .await;
        }

        existing_output(reported, output_dir, plan)
            .await?
            .ok_or_else(|| {
                AppError::Download("yt-dlp reported success but produced no file".to_string())
            })
    }
}

#[derive(Debug, Default)]
struct OutputScan {
    lines: Vec<String>,
    final_path: Option<PathBuf>,
}

async fn read_output<R>(reader: R, progress: ExtractionProgressCallback) -> OutputScan
where
    R: AsyncRead + Unpin,
{
    let mut scan = OutputScan::default();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read yt-dlp output: {}", e);
                break;
            }
        }

        // titles in a non-UTF-8 locale must not end the scan
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        match parse_output_line(&line) {
            Some(OutputLine::Progress(event)) => progress(event),
            Some(OutputLine::FinalPath(path)) => scan.final_path = Some(path),
            None => {
                debug!("yt-dlp: {}", line);
                scan.lines.push(line);
            }
        }
    }

    scan
}

/// Machine-readable line emitted through the progress and print templates
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    Progress(ExtractionProgress),
    FinalPath(PathBuf),
}

pub fn parse_output_line(line: &str) -> Option<OutputLine> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let mut fields = rest.split('|');
        let downloaded_bytes = parse_byte_field(fields.next()?)?;
        let total_bytes = fields.next().and_then(parse_byte_field);
        return Some(OutputLine::Progress(ExtractionProgress {
            downloaded_bytes,
            total_bytes,
            stage: ExtractionStage::Downloading,
        }));
    }

    if line.starts_with(POSTPROCESS_PREFIX) {
        return Some(OutputLine::Progress(ExtractionProgress::stage(
            ExtractionStage::Processing,
        )));
    }

    line.strip_prefix(FINAL_PATH_PREFIX)
        .filter(|path| !path.is_empty() && *path != "NA")
        .map(|path| OutputLine::FinalPath(PathBuf::from(path)))
}

// yt-dlp prints "NA" for missing fields and may print estimates as floats
fn parse_byte_field(field: &str) -> Option<u64> {
    let field = field.trim();
    field
        .parse::<u64>()
        .ok()
        .or_else(|| field.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

pub fn parse_video_json(json: &serde_json::Value) -> AppResult<VideoDescriptor> {
    let id = json["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Unavailable("Missing video ID in yt-dlp output".to_string()))?;

    let title = json["title"].as_str().unwrap_or("Unknown Title");
    let url = json["webpage_url"]
        .as_str()
        .or_else(|| json["original_url"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| watch_url(id));

    let mut video = VideoDescriptor::new(id, title, url);
    video.duration_secs = json["duration"].as_f64().map(|d| d.max(0.0).round() as u64);
    video.thumbnail = json["thumbnail"].as_str().map(str::to_string);
    video.uploader = json["uploader"]
        .as_str()
        .or_else(|| json["channel"].as_str())
        .map(str::to_string);
    video.view_count = json["view_count"].as_u64();
    Ok(video)
}

/// Parse `--flat-playlist --dump-json` output, one JSON object per entry
pub fn parse_playlist_lines(stdout: &str) -> PlaylistDescriptor {
    let mut playlist = PlaylistDescriptor {
        id: String::new(),
        title: String::new(),
        entries: Vec::new(),
    };

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let json: serde_json::Value = match serde_json::from_str(line) {
            Ok(json) => json,
            Err(e) => {
                warn!("Skipping unparsable playlist line: {}", e);
                continue;
            }
        };

        if playlist.id.is_empty() {
            if let Some(id) = json["playlist_id"].as_str() {
                playlist.id = id.to_string();
            }
        }
        if playlist.title.is_empty() {
            if let Some(title) = json["playlist_title"]
                .as_str()
                .or_else(|| json["playlist"].as_str())
            {
                playlist.title = title.to_string();
            }
        }

        let Some(id) = json["id"].as_str().filter(|id| !id.is_empty()) else {
            debug!("Skipping playlist entry without id");
            continue;
        };

        let url = json["url"]
            .as_str()
            .filter(|url| url.starts_with("http"))
            .map(str::to_string)
            .unwrap_or_else(|| watch_url(id));

        let mut entry = VideoDescriptor::new(id, json["title"].as_str().unwrap_or("Unknown Title"), url);
        entry.duration_secs = json["duration"].as_f64().map(|d| d.max(0.0).round() as u64);
        entry.uploader = json["uploader"]
            .as_str()
            .or_else(|| json["channel"].as_str())
            .map(str::to_string);
        entry.view_count = json["view_count"].as_u64();
        entry.thumbnail = json["thumbnails"]
            .as_array()
            .and_then(|thumbs| thumbs.last())
            .and_then(|thumb| thumb["url"].as_str())
            .map(str::to_string);
        playlist.entries.push(entry);
    }

    if playlist.title.is_empty() {
        playlist.title = if playlist.id.is_empty() {
            "Playlist".to_string()
        } else {
            format!("Playlist {}", playlist.id)
        };
    }

    playlist
}

fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

const UNAVAILABLE_MARKERS: [&str; 12] = [
    "private video",
    "video unavailable",
    "is not available",
    "has been removed",
    "been terminated",
    "blocked",
    "in your country",
    "copyright",
    "members-only",
    "sign in to confirm your age",
    "does not exist",
    "this playlist is empty",
];

const NETWORK_MARKERS: [&str; 9] = [
    "unable to download webpage",
    "unable to download api page",
    "timed out",
    "connection",
    "failed to resolve",
    "name resolution",
    "network is unreachable",
    "no route to host",
    "http error 5",
];

const TRANSCODE_MARKERS: [&str; 4] = ["postprocessing", "ffmpeg", "ffprobe", "conversion failed"];

/// Map yt-dlp stderr onto the error taxonomy
pub fn classify_failure(stderr: &str) -> ErrorKind {
    let lower = strip_ansi(stderr).to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(&UNAVAILABLE_MARKERS) {
        ErrorKind::Unavailable
    } else if has(&NETWORK_MARKERS) {
        ErrorKind::Network
    } else if has(&TRANSCODE_MARKERS) {
        ErrorKind::Transcode
    } else {
        ErrorKind::Download
    }
}

/// The most relevant line of yt-dlp stderr, without colour codes or the
/// `ERROR:` prefix
pub fn failure_message(stderr: &str, exit_code: Option<i32>) -> String {
    let cleaned = strip_ansi(stderr);
    let lines: Vec<&str> = cleaned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find_map(|line| line.strip_prefix("ERROR:"))
        .or_else(|| lines.last().copied())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("yt-dlp exited with code {}", code),
            None => "yt-dlp was terminated".to_string(),
        })
}

pub fn error_for(kind: ErrorKind, message: String) -> AppError {
    match kind {
        ErrorKind::Unavailable => AppError::Unavailable(message),
        ErrorKind::Network => AppError::Network(message),
        ErrorKind::Transcode => AppError::Transcode(message),
        _ => AppError::Download(message),
    }
}

/// Outcome of a non-zero yt-dlp exit. Cover art is best effort: when only
/// thumbnail embedding failed and the media file exists, the file is kept.
pub async fn settle_failed_run(
    title: &str,
    plan: &FormatPlan,
    stderr: &str,
    exit_code: Option<i32>,
    reported: Option<PathBuf>,
    output_dir: &Path,
) -> AppResult<PathBuf> {
    if plan.embed_thumbnail && is_thumbnail_failure(stderr) {
        if let Some(path) = existing_output(reported, output_dir, plan).await? {
            warn!(
                "Thumbnail embedding failed for '{}', keeping file without cover art",
                title
            );
            return Ok(path);
        }
    }

    let kind = classify_failure(stderr);
    let message = failure_message(stderr, exit_code);
    error!("yt-dlp failed for '{}' ({}): {}", title, kind, message);
    Err(error_for(kind, message))
}

fn is_thumbnail_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("thumbnail") && (lower.contains("embed") || lower.contains("postprocessing"))
}

fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    match ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok()) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// The reported path when it exists, otherwise the best candidate found in
/// `output_dir`
async fn existing_output(
    reported: Option<PathBuf>,
    output_dir: &Path,
    plan: &FormatPlan,
) -> AppResult<Option<PathBuf>> {
    if let Some(path) = reported {
        if tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            return Ok(Some(path));
        }
        debug!("Reported output {:?} is missing, scanning {:?}", path, output_dir);
    }
    find_output_file(output_dir, &plan.extension).await
}

/// Pick the produced file in `dir`: the planned extension wins, otherwise the
/// largest finished file
pub async fn find_output_file(dir: &Path, extension: &str) -> AppResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut best: Option<(bool, u64, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }

        let matches_ext = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        let candidate = (matches_ext, metadata.len(), path);
        if best
            .as_ref()
            .map_or(true, |current| (candidate.0, candidate.1) > (current.0, current.1))
        {
            best = Some(candidate);
        }
    }

    Ok(best.map(|(_, _, path)| path))
}

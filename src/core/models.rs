//! Core data models for the batch downloader

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::utils::formatting::format_duration;

/// Target resolution tier for video downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoQuality {
    #[serde(rename = "240p")]
    P240,

    #[serde(rename = "360p")]
    P360,

    #[serde(rename = "480p")]
    P480,

    #[serde(rename = "720p")]
    P720,

    #[serde(rename = "1080p")]
    P1080,

    #[serde(rename = "1440p")]
    P1440,

    #[serde(rename = "2160p")]
    P2160,

    #[serde(rename = "best")]
    Best,
}

impl VideoQuality {
    pub const ALL: [VideoQuality; 8] = [
        VideoQuality::P240,
        VideoQuality::P360,
        VideoQuality::P480,
        VideoQuality::P720,
        VideoQuality::P1080,
        VideoQuality::P1440,
        VideoQuality::P2160,
        VideoQuality::Best,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoQuality::P240 => "240p",
            VideoQuality::P360 => "360p",
            VideoQuality::P480 => "480p",
            VideoQuality::P720 => "720p",
            VideoQuality::P1080 => "1080p",
            VideoQuality::P1440 => "1440p",
            VideoQuality::P2160 => "2160p",
            VideoQuality::Best => "best",
        }
    }

    /// Maximum frame height for this tier, `None` for `best`
    pub fn max_height(&self) -> Option<u32> {
        match self {
            VideoQuality::P240 => Some(240),
            VideoQuality::P360 => Some(360),
            VideoQuality::P480 => Some(480),
            VideoQuality::P720 => Some(720),
            VideoQuality::P1080 => Some(1080),
            VideoQuality::P1440 => Some(1440),
            VideoQuality::P2160 => Some(2160),
            VideoQuality::Best => None,
        }
    }
}

impl FromStr for VideoQuality {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        VideoQuality::ALL
            .iter()
            .copied()
            .find(|quality| quality.as_str() == normalized)
            .ok_or_else(|| AppError::UnsupportedFormat(format!("video quality '{}'", value)))
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target codec for audio-only downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,

    M4a,

    Wav,

    Flac,

    Aac,
}

impl AudioCodec {
    pub const ALL: [AudioCodec; 5] = [
        AudioCodec::Mp3,
        AudioCodec::M4a,
        AudioCodec::Wav,
        AudioCodec::Flac,
        AudioCodec::Aac,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::M4a => "m4a",
            AudioCodec::Wav => "wav",
            AudioCodec::Flac => "flac",
            AudioCodec::Aac => "aac",
        }
    }

    /// File extension produced by the extract-audio step
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for AudioCodec {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        AudioCodec::ALL
            .iter()
            .copied()
            .find(|codec| codec.as_str() == normalized)
            .ok_or_else(|| AppError::UnsupportedFormat(format!("audio format '{}'", value)))
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User intent: either a video tier or an audio codec, never both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputSpec {
    Video { quality: VideoQuality },

    Audio { codec: AudioCodec },
}

impl OutputSpec {
    pub const DEFAULT_VIDEO_QUALITY: VideoQuality = VideoQuality::P1080;
    pub const DEFAULT_AUDIO_CODEC: AudioCodec = AudioCodec::Mp3;

    pub fn video(quality: VideoQuality) -> Self {
        Self::Video { quality }
    }

    pub fn audio(codec: AudioCodec) -> Self {
        Self::Audio { codec }
    }

    /// Build a spec from loose UI strings, rejecting anything outside the
    /// enumerated sets. The option belonging to the other branch is ignored.
    pub fn from_choice(
        kind: &str,
        video_quality: Option<&str>,
        audio_codec: Option<&str>,
    ) -> AppResult<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "video" => {
                let quality = match video_quality {
                    Some(value) => value.parse()?,
                    None => Self::DEFAULT_VIDEO_QUALITY,
                };
                Ok(Self::Video { quality })
            }
            "audio" => {
                let codec = match audio_codec {
                    Some(value) => value.parse()?,
                    None => Self::DEFAULT_AUDIO_CODEC,
                };
                Ok(Self::Audio { codec })
            }
            other => Err(AppError::UnsupportedFormat(format!(
                "format type '{}'",
                other
            ))),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }
}

impl fmt::Display for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video { quality } => write!(f, "video/{}", quality),
            Self::Audio { codec } => write!(f, "audio/{}", codec),
        }
    }
}

/// One downloadable item as reported by the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub id: String,

    pub title: String,

    pub url: String,

    pub duration_secs: Option<u64>,

    pub thumbnail: Option<String>,

    pub uploader: Option<String>,

    pub view_count: Option<u64>,

    /// Position inside the parent playlist (0-based)
    pub playlist_index: Option<usize>,
}

impl VideoDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            duration_secs: None,
            thumbnail: None,
            uploader: None,
            view_count: None,
            playlist_index: None,
        }
    }

    pub fn display_duration(&self) -> String {
        format_duration(self.duration_secs)
    }
}

/// Playlist metadata with its entries in playlist order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistDescriptor {
    pub id: String,

    pub title: String,

    pub entries: Vec<VideoDescriptor>,
}

impl PlaylistDescriptor {
    /// Pick entries by position, keeping the order of `positions`.
    /// Positions past the end are skipped.
    pub fn select(&self, positions: &[usize]) -> Vec<VideoDescriptor> {
        positions
            .iter()
            .filter_map(|&position| self.entries.get(position).cloned())
            .collect()
    }
}

/// Result of a metadata fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Metadata {
    Video(VideoDescriptor),

    Playlist(PlaylistDescriptor),
}

impl Metadata {
    pub fn title(&self) -> &str {
        match self {
            Metadata::Video(video) => &video.title,
            Metadata::Playlist(playlist) => &playlist.title,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Metadata::Video(_) => 1,
            Metadata::Playlist(playlist) => playlist.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_items(self) -> Vec<VideoDescriptor> {
        match self {
            Metadata::Video(video) => vec![video],
            Metadata::Playlist(playlist) => playlist.entries,
        }
    }
}

/// A batch of items sharing one output spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<VideoDescriptor>,

    pub output: OutputSpec,

    pub destination: PathBuf,

    /// Package the result even when only one item was requested
    #[serde(default)]
    pub force_archive: bool,
}

impl BatchRequest {
    pub fn new(
        items: Vec<VideoDescriptor>,
        output: OutputSpec,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            items,
            output,
            destination: destination.into(),
            force_archive: false,
        }
    }

    pub fn with_archive(mut self, force_archive: bool) -> Self {
        self.force_archive = force_archive;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.items.is_empty() {
            return Err(AppError::EmptyBatch);
        }
        Ok(())
    }

    pub fn wants_archive(&self) -> bool {
        self.force_archive || self.items.len() > 1
    }
}

/// Batch progress phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Pending,

    Fetching,

    Downloading,

    Processing,

    Packaging,

    Done,

    Failed,
}

impl ProgressPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressPhase::Done | ProgressPhase::Failed)
    }
}

/// Snapshot of batch progress as seen by a polling reader
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressState {
    pub phase: ProgressPhase,

    pub percent: f64,

    pub current_item_index: usize,

    pub total_items: usize,

    pub message: String,

    pub error: Option<String>,

    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ProgressState {
    pub fn new(total_items: usize) -> Self {
        Self {
            phase: ProgressPhase::Pending,
            percent: 0.0,
            current_item_index: 0,
            total_items,
            message: String::new(),
            error: None,
            updated_at: chrono::Utc::now(),
        }
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Error kind without payload, cheap to clone into results
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,

    Unavailable,

    Network,

    Download,

    Transcode,

    UnsupportedFormat,

    EmptyBatch,

    Cancelled,

    Io,

    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidUrl => "InvalidURL",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Download => "DownloadError",
            ErrorKind::Transcode => "TranscodeError",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::EmptyBatch => "EmptyBatch",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Io => "IoError",
            ErrorKind::Config => "ConfigError",
        };
        f.write_str(label)
    }
}

/// Outcome of one item of a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Delivered under `file_name`, either as the single artifact or as an
    /// archive entry
    Success { file_name: String },

    Failed { kind: ErrorKind, reason: String },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub index: usize,

    pub descriptor: VideoDescriptor,

    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,

    Archive,
}

/// Final deliverable of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,

    pub kind: ArtifactKind,

    pub size_bytes: u64,

    /// Archive entry names in order, or the single file name
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,

    pub items: Vec<ItemResult>,

    pub artifact: Option<Artifact>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// One line per failed item, `None` when nothing failed
    pub fn failure_summary(&self) -> Option<String> {
        let lines: Vec<String> = self
            .items
            .iter()
            .filter_map(|item| match &item.outcome {
                ItemOutcome::Failed { kind, reason } => Some(format!(
                    "#{} {}: {} ({})",
                    item.index, item.descriptor.title, kind, reason
                )),
                ItemOutcome::Success { .. } => None,
            })
            .collect();

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("; "))
        }
    }

    pub fn status_message(&self) -> String {
        let total = self.items.len();
        let ok = self.succeeded();
        let mut message = if total == 1 && ok == 1 {
            "Successfully downloaded 1 video".to_string()
        } else {
            format!("{} of {} downloads succeeded", ok, total)
        };
        if let Some(summary) = self.failure_summary() {
            message.push_str(". Failures: ");
            message.push_str(&summary);
        }
        message
    }
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Batch request contains no items")]
    EmptyBatch,

    #[error("Batch was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            AppError::Unavailable(_) => ErrorKind::Unavailable,
            AppError::Network(_) => ErrorKind::Network,
            AppError::Download(_) => ErrorKind::Download,
            AppError::Transcode(_) => ErrorKind::Transcode,
            AppError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            AppError::EmptyBatch => ErrorKind::EmptyBatch,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Io(_) | AppError::Archive(_) => ErrorKind::Io,
            AppError::Config(_) => ErrorKind::Config,
        }
    }

    /// Human readable reason without the variant label
    pub fn reason(&self) -> String {
        match self {
            AppError::InvalidUrl(reason)
            | AppError::Unavailable(reason)
            | AppError::Network(reason)
            | AppError::Download(reason)
            | AppError::Transcode(reason)
            | AppError::UnsupportedFormat(reason)
            | AppError::Config(reason) => reason.clone(),
            AppError::Io(e) => e.to_string(),
            AppError::Archive(e) => e.to_string(),
            AppError::EmptyBatch | AppError::Cancelled => self.to_string(),
        }
    }

    /// Errors that belong to one item and never abort a batch on their own
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            AppError::Unavailable(_)
                | AppError::Network(_)
                | AppError::Download(_)
                | AppError::Transcode(_)
        )
    }
}

/// Result type alias for application operations

pub type AppResult<T> = Result<T, AppError>;

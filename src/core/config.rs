//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::downloader::DownloaderConfig;
use super::extractor::ExtractorConfig;
use super::models::{AudioCodec, OutputSpec, VideoQuality};

/// Main application configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Batch download behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub output_directory: PathBuf,
    /// Root for per-batch working directories; system temp when unset
    pub temp_root: Option<PathBuf>,
    pub item_timeout_secs: u64,
    pub progress_interval_ms: u64,
    pub default_video_quality: VideoQuality,
    pub default_audio_codec: AudioCodec,
    /// Archive even single-item batches
    pub force_archive: bool,
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ytdlp_path: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    pub socket_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String, // "error", "warn", "info", "debug", "trace"
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let downloader = DownloaderConfig::default();
        Self {
            output_directory: default_output_directory(),
            temp_root: None,
            item_timeout_secs: downloader.item_timeout_secs,
            progress_interval_ms: downloader.progress_interval_ms,
            default_video_quality: OutputSpec::DEFAULT_VIDEO_QUALITY,
            default_audio_codec: OutputSpec::DEFAULT_AUDIO_CODEC,
            force_archive: false,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let extractor = ExtractorConfig::default();
        Self {
            ytdlp_path: extractor.ytdlp_binary,
            ffmpeg_location: extractor.ffmpeg_location,
            socket_timeout_secs: extractor.socket_timeout_secs,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_output_directory() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

impl AppConfig {
    /// Load configuration from file, creating default if not exists
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            let config = Self::load_from(&config_path)?;
            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save()?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    /// Read and validate a configuration file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Saved configuration to: {:?}", path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "ytbatch", "yt-batch-downloader")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.download.item_timeout_secs == 0 {
            anyhow::bail!("Item timeout must be greater than 0");
        }

        if self.download.progress_interval_ms == 0 || self.download.progress_interval_ms > 60_000
        {
            anyhow::bail!("Progress interval should be between 1 and 60000 ms");
        }

        if self.download.output_directory.as_os_str().is_empty() {
            anyhow::bail!("Output directory must not be empty");
        }

        if self.tools.ytdlp_path.as_os_str().is_empty() {
            anyhow::bail!("yt-dlp path must not be empty");
        }

        if self.tools.socket_timeout_secs == 0 || self.tools.socket_timeout_secs > 600 {
            anyhow::bail!("Socket timeout should be between 1 and 600 seconds");
        }

        if !["error", "warn", "info", "debug", "trace"].contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        Ok(())
    }

    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            item_timeout_secs: self.download.item_timeout_secs,
            progress_interval_ms: self.download.progress_interval_ms,
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            ytdlp_binary: self.tools.ytdlp_path.clone(),
            ffmpeg_location: self.tools.ffmpeg_location.clone(),
            socket_timeout_secs: self.tools.socket_timeout_secs,
        }
    }

    /// Configured default spec for audio or video downloads
    pub fn default_output(&self, audio: bool) -> OutputSpec {
        if audio {
            OutputSpec::audio(self.download.default_audio_codec)
        } else {
            OutputSpec::video(self.download.default_video_quality)
        }
    }
}

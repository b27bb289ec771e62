//! YouTube Batch Downloader - Core Library
//!
//! Previews YouTube videos and playlists, downloads a selection of them
//! through `yt-dlp` one after another and delivers the result as a single
//! file or a ZIP archive.

pub mod core;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::AppConfig,
    extractor::{MediaExtractor, YtDlpExtractor},
    models::{
        AppError, AppResult, AudioCodec, BatchRequest, BatchResult, Metadata, OutputSpec,
        PlaylistDescriptor, ProgressPhase, ProgressState, VideoDescriptor, VideoQuality,
    },
    runtime::{BatchHandle, BatchService},
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the default filter
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing(None);
    tracing::info!("{} v{} initialized", NAME, VERSION);
    Ok(())
}

/// Load the stored configuration, falling back to defaults when it is
/// missing or invalid
pub fn load_or_initialize_config() -> AppConfig {
    match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!(
                "Failed to load configuration from disk: {:#}. Using defaults",
                err
            );
            let default_cfg = AppConfig::default();
            if let Err(save_err) = default_cfg.save() {
                tracing::warn!("Failed to persist default configuration: {}", save_err);
            }
            default_cfg
        }
    }
}

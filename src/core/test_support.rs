//! In-process [`MediaExtractor`] used by the unit and integration tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::extractor::{
    error_for, ExtractionProgress, ExtractionProgressCallback, ExtractionStage, MediaExtractor,
};
use crate::core::format_resolver::FormatPlan;
use crate::core::models::{
    AppError, AppResult, AudioCodec, BatchRequest, ErrorKind, OutputSpec, PlaylistDescriptor,
    VideoDescriptor,
};

pub type DownloadHook = Arc<dyn Fn(&VideoDescriptor) + Send + Sync>;

/// Writes `<stem>.<ext>` files instead of talking to the network
#[derive(Default)]
pub struct FakeExtractor {
    videos: HashMap<String, VideoDescriptor>,
    playlists: HashMap<String, PlaylistDescriptor>,
    metadata_failures: HashMap<String, (ErrorKind, String)>,
    item_failures: HashMap<String, (ErrorKind, String)>,
    output_extension: Option<String>,
    empty_output: bool,
    delay: Option<Duration>,
    on_download: Option<DownloadHook>,
    downloads: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, url: &str, video: VideoDescriptor) -> Self {
        self.videos.insert(url.to_string(), video);
        self
    }

    pub fn with_playlist(mut self, url: &str, playlist: PlaylistDescriptor) -> Self {
        self.playlists.insert(url.to_string(), playlist);
        self
    }

    pub fn fail_metadata(mut self, url: &str, kind: ErrorKind, reason: &str) -> Self {
        self.metadata_failures
            .insert(url.to_string(), (kind, reason.to_string()));
        self
    }

    pub fn fail_item(mut self, id: &str, kind: ErrorKind, reason: &str) -> Self {
        self.item_failures
            .insert(id.to_string(), (kind, reason.to_string()));
        self
    }

    /// Produce files with this extension instead of the planned one
    pub fn with_output_extension(mut self, extension: &str) -> Self {
        self.output_extension = Some(extension.to_string());
        self
    }

    pub fn with_empty_output(mut self) -> Self {
        self.empty_output = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn on_download(mut self, hook: DownloadHook) -> Self {
        self.on_download = Some(hook);
        self
    }

    /// Ids passed to `download`, in call order
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }

    /// Ids whose download wrote its output file
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn extract_video(&self, url: &str) -> AppResult<VideoDescriptor> {
        if let Some((kind, reason)) = self.metadata_failures.get(url) {
            return Err(error_for(*kind, reason.clone()));
        }
        self.videos
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Unavailable(format!("no such video: {}", url)))
    }

    async fn extract_playlist(&self, url: &str) -> AppResult<PlaylistDescriptor> {
        if let Some((kind, reason)) = self.metadata_failures.get(url) {
            return Err(error_for(*kind, reason.clone()));
        }
        self.playlists
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Unavailable(format!("no such playlist: {}", url)))
    }

    async fn download(
        &self,
        item: &VideoDescriptor,
        plan: &FormatPlan,
        output_dir: &Path,
        file_stem: &str,
        progress: ExtractionProgressCallback,
    ) -> AppResult<PathBuf> {
        self.downloads.lock().push(item.id.clone());
        if let Some(hook) = &self.on_download {
            hook(item);
        }

        progress(ExtractionProgress::stage(ExtractionStage::Fetching));
        if let Some((kind, reason)) = self.item_failures.get(&item.id) {
            return Err(error_for(*kind, reason.clone()));
        }

        for step in 0..=4u64 {
            progress(ExtractionProgress {
                downloaded_bytes: step * 256,
                total_bytes: Some(1024),
                stage: ExtractionStage::Downloading,
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        progress(ExtractionProgress::stage(ExtractionStage::Processing));

        let extension = self
            .output_extension
            .clone()
            .unwrap_or_else(|| plan.extension.clone());
        let path = output_dir.join(format!("{}.{}", file_stem, extension));
        let contents = if self.empty_output {
            String::new()
        } else {
            format!("{}:{}", item.id, extension)
        };
        tokio::fs::write(&path, contents).await?;
        self.completed.lock().push(item.id.clone());
        Ok(path)
    }
}

pub fn descriptor(id: &str, title: &str) -> VideoDescriptor {
    VideoDescriptor::new(id, title, format!("https://www.youtube.com/watch?v={}", id))
}

pub fn mp3_request(items: Vec<VideoDescriptor>, destination: &Path) -> BatchRequest {
    BatchRequest::new(items, OutputSpec::audio(AudioCodec::Mp3), destination)
}

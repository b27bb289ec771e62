//! Single-item download engine
//!
//! Runs one extractor download inside a private directory beneath the
//! destination, validates what came out and moves exactly one file to
//! `<dest>/<stem>.<ext>`. The private directory is removed on every exit
//! path, including timeouts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::extractor::{
    ExtractionProgress, ExtractionProgressCallback, ExtractionStage, MediaExtractor,
};
use crate::core::format_resolver::FormatPlan;
use crate::core::models::{AppError, AppResult, VideoDescriptor};
use crate::utils::file_utils::move_file;
use crate::utils::formatting::format_file_size;

/// Share of an item's progress given to the byte transfer; the rest covers
/// post-processing
const DOWNLOAD_SHARE: f64 = 90.0;

/// Single-item downloader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Upper bound for one item, extraction and post-processing included
    pub item_timeout_secs: u64,
    /// Minimum gap between progress events when the total size is unknown
    pub progress_interval_ms: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            item_timeout_secs: 30 * 60,
            progress_interval_ms: 500,
        }
    }
}

impl DownloaderConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Progress of one item on its own 0-100 scale
#[derive(Debug, Clone, PartialEq)]
pub struct ItemProgress {
    /// `None` while the total size is unknown
    pub percent: Option<f64>,
    pub stage: ExtractionStage,
    pub message: String,
}

pub type ItemProgressCallback = Arc<dyn Fn(ItemProgress) + Send + Sync>;

/// Rate limiter for progress events
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_stage: Option<ExtractionStage>,
    last_whole_percent: Option<u64>,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_stage: None,
            last_whole_percent: None,
            last_emit: None,
        }
    }

    /// Emit on a stage change, on a whole-percent increase, or once per
    /// interval while the percent is unknown
    pub fn should_emit(
        &mut self,
        stage: ExtractionStage,
        percent: Option<f64>,
        now: Instant,
    ) -> bool {
        let stage_changed = self.last_stage != Some(stage);
        let emit = match percent {
            _ if stage_changed => true,
            Some(percent) => {
                let whole = percent.max(0.0).floor() as u64;
                self.last_whole_percent.map_or(true, |last| whole > last)
            }
            None => self
                .last_emit
                .map_or(true, |last| now.duration_since(last) >= self.interval),
        };

        if emit {
            self.last_stage = Some(stage);
            self.last_emit = Some(now);
            if let Some(percent) = percent {
                self.last_whole_percent = Some(percent.max(0.0).floor() as u64);
            } else if stage_changed {
                self.last_whole_percent = None;
            }
        }
        emit
    }
}

/// Maps raw extractor events onto the item's own 0-100 scale.
///
/// The download share is split evenly across the plan's streams; a drop in
/// the downloaded byte count marks the start of the next stream.
#[derive(Debug)]
pub struct ItemPercentMapper {
    streams: usize,
    stream_index: usize,
    last_downloaded: u64,
}

impl ItemPercentMapper {
    pub fn new(streams: usize) -> Self {
        Self {
            streams: streams.max(1),
            stream_index: 0,
            last_downloaded: 0,
        }
    }

    pub fn percent(&mut self, event: &ExtractionProgress) -> Option<f64> {
        match event.stage {
            ExtractionStage::Fetching => Some(0.0),
            ExtractionStage::Downloading => {
                if event.downloaded_bytes < self.last_downloaded
                    && self.stream_index + 1 < self.streams
                {
                    self.stream_index += 1;
                }
                self.last_downloaded = event.downloaded_bytes;

                let share = DOWNLOAD_SHARE / self.streams as f64;
                event
                    .percent()
                    .map(|p| share * self.stream_index as f64 + p / 100.0 * share)
            }
            ExtractionStage::Processing => Some(DOWNLOAD_SHARE),
        }
    }
}

/// Downloads single items through a [`MediaExtractor`]
pub struct ItemDownloader {
    extractor: Arc<dyn MediaExtractor>,
    config: DownloaderConfig,
}

impl ItemDownloader {
    pub fn new(extractor: Arc<dyn MediaExtractor>, config: DownloaderConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Download `item` into `dest_dir` as `<file_stem>.<plan.extension>`
    pub async fn download(
        &self,
        item: &VideoDescriptor,
        plan: &FormatPlan,
        dest_dir: &Path,
        file_stem: &str,
        on_progress: ItemProgressCallback,
    ) -> AppResult<PathBuf> {
        info!("Downloading '{}' ({}) as {}", item.title, item.id, file_stem);

        let workdir = tempfile::Builder::new()
            .prefix(".item-")
            .tempdir_in(dest_dir)?;

        let callback = throttled_callback(
            item.title.clone(),
            plan.stream_count(),
            self.config.progress_interval(),
            on_progress.clone(),
        );

        let produced = match tokio::time::timeout(
            self.config.item_timeout(),
            self.extractor
                .download(item, plan, workdir.path(), file_stem, callback),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Download of '{}' timed out after {}s",
                    item.title, self.config.item_timeout_secs
                );
                return Err(AppError::Download(format!(
                    "Timed out after {}s",
                    self.config.item_timeout_secs
                )));
            }
        };

        let metadata = tokio::fs::metadata(&produced).await.map_err(|e| {
            AppError::Download(format!("Output file {:?} is missing: {}", produced, e))
        })?;
        if metadata.len() == 0 {
            return Err(AppError::Download("Extractor produced an empty file".to_string()));
        }

        let extension_matches = produced
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(plan.extension.as_str()))
            .unwrap_or(false);
        if !extension_matches {
            return Err(AppError::Transcode(format!(
                "Expected a .{} file but got {:?}",
                plan.extension,
                produced.file_name().unwrap_or_default()
            )));
        }

        let target = dest_dir.join(format!("{}.{}", file_stem, plan.extension));
        move_file(&produced, &target)?;
        workdir.close()?;

        debug!(
            "Finished '{}' ({})",
            item.title,
            format_file_size(metadata.len())
        );
        on_progress(ItemProgress {
            percent: Some(100.0),
            stage: ExtractionStage::Processing,
            message: format!("Finished {}", item.title),
        });

        Ok(target)
    }
}

fn throttled_callback(
    title: String,
    streams: usize,
    interval: Duration,
    on_progress: ItemProgressCallback,
) -> ExtractionProgressCallback {
    let state = Mutex::new((
        ItemPercentMapper::new(streams),
        ProgressThrottle::new(interval),
    ));

    Arc::new(move |event: ExtractionProgress| {
        let percent = {
            let mut state = state.lock();
            let (mapper, throttle) = &mut *state;
            let percent = mapper.percent(&event);
            if !throttle.should_emit(event.stage, percent, Instant::now()) {
                return;
            }
            percent
        };

        let message = match event.stage {
            ExtractionStage::Fetching => format!("Fetching {}", title),
            ExtractionStage::Downloading => match event.total_bytes {
                Some(total) => format!(
                    "Downloading {} ({} / {})",
                    title,
                    format_file_size(event.downloaded_bytes),
                    format_file_size(total)
                ),
                None => format!(
                    "Downloading {} ({})",
                    title,
                    format_file_size(event.downloaded_bytes)
                ),
            },
            ExtractionStage::Processing => format!("Processing {}", title),
        };

        on_progress(ItemProgress {
            percent,
            stage: event.stage,
            message,
        });
    })
}

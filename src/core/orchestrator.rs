//! Batch orchestration
//!
//! Drives one batch from request to artifact: items are downloaded one
//! after another into a scoped working directory, per-item failures are
//! recorded without stopping the batch, and the survivors are delivered
//! either as a single file or as a ZIP archive.

use chrono::Local;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::downloader::{DownloaderConfig, ItemDownloader, ItemProgress, ItemProgressCallback};
use crate::core::extractor::{ExtractionStage, MediaExtractor};
use crate::core::format_resolver::{resolve, FormatPlan};
use crate::core::models::{
    AppError, AppResult, Artifact, ArtifactKind, BatchRequest, BatchResult, ItemOutcome,
    ItemResult, ProgressPhase,
};
use crate::core::progress_tracker::{batch_percent, ProgressTracker};
use crate::core::temp_manager::TempManager;
use crate::utils::file_utils::{move_file, sanitize_filename, unique_path};

/// `strftime` pattern of archive names
pub const ARCHIVE_NAME_FORMAT: &str = "playlist_%Y%m%d_%H%M%S.zip";

/// A downloaded item waiting for delivery
#[derive(Debug)]
struct Produced {
    position: usize,
    entry_name: String,
    path: PathBuf,
}

/// Runs batches sequentially through one [`ItemDownloader`]
pub struct BatchOrchestrator {
    downloader: ItemDownloader,
    temp: Arc<TempManager>,
}

impl BatchOrchestrator {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        temp: Arc<TempManager>,
        config: DownloaderConfig,
    ) -> Self {
        Self {
            downloader: ItemDownloader::new(extractor, config),
            temp,
        }
    }

    /// Run a whole batch, reporting through `tracker`.
    ///
    /// Item failures are part of the returned [`BatchResult`]; an `Err` means
    /// the batch itself was rejected, cancelled or could not be packaged.
    pub async fn run(
        &self,
        batch_id: &str,
        request: &BatchRequest,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> AppResult<BatchResult> {
        request.validate()?;
        info!(
            "Starting batch {} with {} items as {}",
            batch_id,
            request.items.len(),
            request.output
        );

        let workdir = match self.temp.acquire() {
            Ok(workdir) => workdir,
            Err(e) => {
                tracker.fail(e.to_string());
                return Err(e);
            }
        };

        let outcome = self
            .process(batch_id, request, workdir.path(), tracker, cancel)
            .await;

        if let Err(e) = workdir.close() {
            warn!("Failed to remove working directory of batch {}: {}", batch_id, e);
        }

        match &outcome {
            Ok(result) => info!("Batch {} finished: {}", batch_id, result.status_message()),
            Err(e) => {
                error!("Batch {} failed: {}", batch_id, e);
                tracker.fail(e.to_string());
            }
        }
        outcome
    }

    async fn process(
        &self,
        batch_id: &str,
        request: &BatchRequest,
        workdir: &Path,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> AppResult<BatchResult> {
        let total = request.items.len();
        let plan = resolve(&request.output);
        debug!("Batch {} format plan: {:?}", batch_id, plan);

        let mut items = Vec::with_capacity(total);
        let mut produced = Vec::new();

        for (index, item) in request.items.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            tracker.begin_item(
                index,
                format!("Downloading {} ({}/{})", item.title, index + 1, total),
            );
            let stem = format!("{}-{}", index, sanitize_filename(&item.title));
            let on_progress = item_progress_callback(tracker.clone(), index, total);

            // cancellation lands between items; the current one runs to the end
            let downloaded = self
                .downloader
                .download(item, &plan, workdir, &stem, on_progress)
                .await;

            let outcome = match downloaded {
                Ok(path) => {
                    let entry_name = file_name_of(&path, &stem, &plan);
                    produced.push(Produced {
                        position: items.len(),
                        entry_name: entry_name.clone(),
                        path,
                    });
                    ItemOutcome::Success {
                        file_name: entry_name,
                    }
                }
                Err(e) => {
                    error!("Item {} '{}' failed: {}", index, item.title, e);
                    tracker.set_message(format!("{} failed: {}", item.title, e.reason()));
                    ItemOutcome::Failed {
                        kind: e.kind(),
                        reason: e.reason(),
                    }
                }
            };

            items.push(ItemResult {
                index,
                descriptor: item.clone(),
                outcome,
            });
        }

        let mut result = BatchResult {
            batch_id: batch_id.to_string(),
            items,
            artifact: None,
        };

        if produced.is_empty() {
            tracker.fail(result.status_message());
            return Ok(result);
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        std::fs::create_dir_all(&request.destination)?;

        let artifact = if request.wants_archive() {
            tracker.update(
                ProgressPhase::Packaging,
                0.0,
                format!("Packaging {} files", produced.len()),
            );
            package(workdir, &request.destination, &produced).await?
        } else {
            let single = &produced[0];
            let delivered = deliver_single(single, &request.items[0].title, &plan, &request.destination)?;
            if let Some(item) = result.items.get_mut(single.position) {
                item.outcome = ItemOutcome::Success {
                    file_name: delivered.entries[0].clone(),
                };
            }
            delivered
        };

        info!(
            "Batch {} delivered {:?} ({} bytes)",
            batch_id, artifact.path, artifact.size_bytes
        );
        result.artifact = Some(artifact);
        tracker.finish(result.status_message());
        Ok(result)
    }
}

fn item_progress_callback(
    tracker: ProgressTracker,
    index: usize,
    total: usize,
) -> ItemProgressCallback {
    Arc::new(move |progress: ItemProgress| {
        let phase = match progress.stage {
            ExtractionStage::Fetching => ProgressPhase::Fetching,
            ExtractionStage::Downloading => ProgressPhase::Downloading,
            ExtractionStage::Processing => ProgressPhase::Processing,
        };
        let percent = batch_percent(index, total, progress.percent.unwrap_or(0.0));
        tracker.update(phase, percent, progress.message);
    })
}

fn file_name_of(path: &Path, stem: &str, plan: &FormatPlan) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.{}", stem, plan.extension))
}

/// Move the only file of a single-item batch to the destination root under
/// its sanitized title
fn deliver_single(
    produced: &Produced,
    title: &str,
    plan: &FormatPlan,
    destination: &Path,
) -> AppResult<Artifact> {
    let name = format!("{}.{}", sanitize_filename(title), plan.extension);
    let target = unique_path(destination, &name);
    move_file(&produced.path, &target)?;

    let size_bytes = std::fs::metadata(&target)?.len();
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or(name);

    Ok(Artifact {
        path: target,
        kind: ArtifactKind::File,
        size_bytes,
        entries: vec![file_name],
    })
}

/// Zip every produced file in order and move the archive to the destination
async fn package(workdir: &Path, destination: &Path, produced: &[Produced]) -> AppResult<Artifact> {
    let archive_name = Local::now().format(ARCHIVE_NAME_FORMAT).to_string();
    let staging = workdir.join(&archive_name);
    let entries: Vec<(String, PathBuf)> = produced
        .iter()
        .map(|p| (p.entry_name.clone(), p.path.clone()))
        .collect();

    let staging_path = staging.clone();
    let archive_entries = entries.clone();
    tokio::task::spawn_blocking(move || write_archive(&staging_path, &archive_entries))
        .await
        .map_err(|e| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    let target = unique_path(destination, &archive_name);
    move_file(&staging, &target)?;
    let size_bytes = std::fs::metadata(&target)?.len();

    Ok(Artifact {
        path: target,
        kind: ArtifactKind::Archive,
        size_bytes,
        entries: entries.into_iter().map(|(name, _)| name).collect(),
    })
}

/// Write a deflate ZIP with one entry per `(name, source)` pair, in order
pub fn write_archive(archive: &Path, entries: &[(String, PathBuf)]) -> AppResult<()> {
    let mut zip = ZipWriter::new(File::create(archive)?);

    for (name, source) in entries {
        let size = std::fs::metadata(source)?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u64::from(u32::MAX));

        zip.start_file(name.as_str(), options)?;
        let mut input = File::open(source)?;
        std::io::copy(&mut input, &mut zip)?;
        debug!("Added {} to archive", name);
    }

    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_write_archive_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.mp3");
        let second = dir.path().join("b.mp3");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second").unwrap();

        let archive = dir.path().join("out.zip");
        write_archive(
            &archive,
            &[
                ("1-B.mp3".to_string(), second),
                ("0-A.mp3".to_string(), first),
            ],
        )
        .unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        assert_eq!(zip.by_index(0).unwrap().name(), "1-B.mp3");

        let mut contents = String::new();
        zip.by_name("0-A.mp3")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "first");
    }

    #[test]
    fn test_archive_name_format() {
        let name = Local::now().format(ARCHIVE_NAME_FORMAT).to_string();
        assert!(name.starts_with("playlist_"));
        assert!(name.ends_with(".zip"));
        assert_eq!(name.len(), "playlist_20240101_120000.zip".len());
    }
}

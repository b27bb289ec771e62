//! Batch runtime.
//!
//! The UI-facing entry point. `start_batch` validates synchronously and hands
//! the batch to a background task; callers keep a [`BatchHandle`] to poll
//! progress, cancel, and collect the result without ever blocking on the
//! worker.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::config::AppConfig;
use crate::core::downloader::DownloaderConfig;
use crate::core::extractor::{MediaExtractor, YtDlpExtractor};
use crate::core::metadata::MetadataFetcher;
use crate::core::models::{AppError, AppResult, BatchRequest, BatchResult, Metadata, ProgressState};
use crate::core::orchestrator::BatchOrchestrator;
use crate::core::progress_tracker::ProgressTracker;
use crate::core::temp_manager::TempManager;

type ResultSlot = Arc<Mutex<Option<AppResult<BatchResult>>>>;

/// Preview and batch entry points sharing one extractor
pub struct BatchService {
    orchestrator: Arc<BatchOrchestrator>,
    metadata: MetadataFetcher,
}

impl BatchService {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        temp: Arc<TempManager>,
        config: DownloaderConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(BatchOrchestrator::new(extractor.clone(), temp, config)),
            metadata: MetadataFetcher::new(extractor),
        }
    }

    /// Service backed by `yt-dlp`, configured from `config`
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let temp = match &config.download.temp_root {
            Some(root) => TempManager::new(root)?,
            None => TempManager::in_system_temp()?,
        };
        let extractor: Arc<dyn MediaExtractor> =
            Arc::new(YtDlpExtractor::new(config.extractor_config()));

        Ok(Self::new(extractor, Arc::new(temp), config.downloader_config()))
    }

    /// Fetch metadata for a video or playlist URL
    pub async fn preview(&self, url: &str) -> AppResult<Metadata> {
        self.metadata.fetch(url).await
    }

    /// Validate `request` and run it in the background.
    ///
    /// Runs on the current tokio runtime when there is one, otherwise on a
    /// dedicated thread with its own runtime.
    pub fn start_batch(&self, request: BatchRequest) -> AppResult<BatchHandle> {
        request.validate()?;

        let id = Uuid::new_v4().to_string();
        let tracker = ProgressTracker::new(request.items.len());
        let cancel = CancellationToken::new();
        let slot: ResultSlot = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = watch::channel(false);

        let handle = BatchHandle {
            id: id.clone(),
            tracker: tracker.clone(),
            cancel: cancel.clone(),
            result: slot.clone(),
            done: done_rx,
        };

        let orchestrator = self.orchestrator.clone();
        let batch = async move {
            let result = orchestrator.run(&id, &request, &tracker, &cancel).await;
            debug!("[RUNTIME] Batch {} settled, ok: {}", id, result.is_ok());
            *slot.lock() = Some(result);
            let _ = done_tx.send(true);
        };

        spawn_batch(batch, handle.tracker.clone(), handle.result.clone())?;
        info!("[RUNTIME] Started batch {}", handle.id);
        Ok(handle)
    }
}

fn spawn_batch<F>(batch: F, tracker: ProgressTracker, slot: ResultSlot) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            debug!("[RUNTIME] Spawning batch in existing tokio runtime");
            handle.spawn(batch);
        }
        Err(_) => {
            warn!("[RUNTIME] No tokio runtime found, creating dedicated thread with new runtime");
            std::thread::Builder::new()
                .name("batch-runtime".into())
                .spawn(move || {
                    match tokio::runtime::Builder::new_multi_thread()
                        .worker_threads(2)
                        .enable_all()
                        .thread_name("batch-runtime-worker")
                        .build()
                    {
                        Ok(runtime) => runtime.block_on(batch),
                        Err(e) => {
                            tracker.fail(format!("Failed to start batch runtime: {}", e));
                            *slot.lock() = Some(Err(AppError::Io(e)));
                        }
                    }
                })?;
        }
    }
    Ok(())
}

/// Caller's view of one running batch
#[derive(Clone)]
pub struct BatchHandle {
    id: String,
    tracker: ProgressTracker,
    cancel: CancellationToken,
    result: ResultSlot,
    done: watch::Receiver<bool>,
}

impl BatchHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Consistent progress snapshot, never blocks on the worker
    pub fn poll_progress(&self) -> ProgressState {
        self.tracker.snapshot()
    }

    /// The batch outcome once it has settled. Handed over exactly once;
    /// later calls return `None`.
    pub fn get_result(&self) -> Option<AppResult<BatchResult>> {
        self.result.lock().take()
    }

    /// Whether the outcome is waiting to be collected
    pub fn is_finished(&self) -> bool {
        self.result.lock().is_some()
    }

    /// Wait for the batch to settle and take its outcome
    pub async fn wait(&self) -> Option<AppResult<BatchResult>> {
        let mut done = self.done.clone();
        if done.wait_for(|finished| *finished).await.is_err() {
            debug!("[RUNTIME] Batch {} worker went away", self.id);
        }
        self.get_result()
    }

    /// Request cooperative cancellation; the batch ends with `Cancelled`
    pub fn cancel(&self) {
        info!("[RUNTIME] Cancelling batch {}", self.id);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.id)
            .field("progress", &self.tracker.snapshot())
            .finish()
    }
}

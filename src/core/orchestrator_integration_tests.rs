//! End-to-end batch runs against the in-process extractor

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::core::downloader::DownloaderConfig;
use crate::core::models::{
    AppError, ArtifactKind, BatchRequest, ErrorKind, ItemOutcome, OutputSpec, ProgressPhase,
    VideoDescriptor, VideoQuality,
};
use crate::core::orchestrator::BatchOrchestrator;
use crate::core::progress_tracker::ProgressTracker;
use crate::core::temp_manager::{TempManager, WORKDIR_PREFIX};
use crate::core::test_support::{descriptor, mp3_request, FakeExtractor};

struct Harness {
    temp_root: TempDir,
    destination: TempDir,
    orchestrator: BatchOrchestrator,
}

impl Harness {
    fn new(extractor: FakeExtractor) -> Self {
        Self::shared(Arc::new(extractor))
    }

    fn shared(extractor: Arc<FakeExtractor>) -> Self {
        let temp_root = TempDir::new().unwrap();
        let destination = TempDir::new().unwrap();
        let temp = Arc::new(TempManager::new(temp_root.path()).unwrap());
        let orchestrator = BatchOrchestrator::new(
            extractor,
            temp,
            DownloaderConfig {
                item_timeout_secs: 30,
                progress_interval_ms: 10,
            },
        );
        Self {
            temp_root,
            destination,
            orchestrator,
        }
    }

    fn dest(&self) -> &Path {
        self.destination.path()
    }

    fn workdirs_left(&self) -> usize {
        std::fs::read_dir(self.temp_root.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(WORKDIR_PREFIX))
            .count()
    }

    fn delivered(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dest())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn archive_entries(path: &Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

#[tokio::test]
async fn test_three_audio_items_are_archived_in_order() {
    let harness = Harness::new(FakeExtractor::new());
    let request = mp3_request(
        vec![
            descriptor("a", "Alpha"),
            descriptor("b", "Beta"),
            descriptor("c", "Gamma"),
        ],
        harness.dest(),
    );
    let tracker = ProgressTracker::new(3);

    let result = harness
        .orchestrator
        .run("batch-1", &request, &tracker, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.succeeded(), 3);
    let artifact = result.artifact.expect("archive expected");
    assert_eq!(artifact.kind, ArtifactKind::Archive);
    assert_eq!(
        artifact.entries,
        vec!["0-Alpha.mp3", "1-Beta.mp3", "2-Gamma.mp3"]
    );
    assert_eq!(archive_entries(&artifact.path), artifact.entries);
    assert!(artifact.size_bytes > 0);

    let name = artifact.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("playlist_") && name.ends_with(".zip"));
    assert_eq!(harness.delivered(), vec![name]);

    let state = tracker.snapshot();
    assert_eq!(state.phase, ProgressPhase::Done);
    assert_eq!(state.percent, 100.0);
    assert_eq!(state.current_item_index, 2);
    assert_eq!(harness.workdirs_left(), 0);
}

#[tokio::test]
async fn test_single_item_is_delivered_as_plain_file() {
    let harness = Harness::new(FakeExtractor::new());
    let request = BatchRequest::new(
        vec![descriptor("v", "My: Clip?")],
        OutputSpec::video(VideoQuality::P720),
        harness.dest(),
    );
    let tracker = ProgressTracker::new(1);

    let result = harness
        .orchestrator
        .run("batch-2", &request, &tracker, &CancellationToken::new())
        .await
        .unwrap();

    let artifact = result.artifact.clone().unwrap();
    assert_eq!(artifact.kind, ArtifactKind::File);
    assert_eq!(artifact.path, harness.dest().join("My_ Clip_.mkv"));
    assert_eq!(std::fs::read_to_string(&artifact.path).unwrap(), "v:mkv");
    assert_eq!(
        result.items[0].outcome,
        ItemOutcome::Success {
            file_name: "My_ Clip_.mkv".to_string()
        }
    );
    assert_eq!(result.status_message(), "Successfully downloaded 1 video");
    assert_eq!(harness.workdirs_left(), 0);
}

#[tokio::test]
async fn test_single_file_name_collision_gets_suffix() {
    let harness = Harness::new(FakeExtractor::new());
    std::fs::write(harness.dest().join("Song.mp3"), b"older").unwrap();
    let request = mp3_request(vec![descriptor("s", "Song")], harness.dest());

    let result = harness
        .orchestrator
        .run("batch-3", &request, &ProgressTracker::new(1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        result.artifact.unwrap().path,
        harness.dest().join("Song (1).mp3")
    );
    assert_eq!(
        std::fs::read_to_string(harness.dest().join("Song.mp3")).unwrap(),
        "older"
    );
}

#[tokio::test]
async fn test_region_blocked_single_item_yields_no_artifact() {
    let extractor = FakeExtractor::new().fail_item(
        "r",
        ErrorKind::Unavailable,
        "The uploader has not made this video available in your country",
    );
    let harness = Harness::new(extractor);
    let request = BatchRequest::new(
        vec![descriptor("r", "Blocked")],
        OutputSpec::video(VideoQuality::P1080),
        harness.dest(),
    );
    let tracker = ProgressTracker::new(1);

    let result = harness
        .orchestrator
        .run("batch-4", &request, &tracker, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.artifact.is_none());
    assert_eq!(result.succeeded(), 0);
    assert!(matches!(
        result.items[0].outcome,
        ItemOutcome::Failed {
            kind: ErrorKind::Unavailable,
            ..
        }
    ));

    let state = tracker.snapshot();
    assert_eq!(state.phase, ProgressPhase::Failed);
    let error = state.error.unwrap();
    assert!(error.contains("Blocked"));
    assert!(error.contains("in your country"));
    assert!(harness.delivered().is_empty());
    assert_eq!(harness.workdirs_left(), 0);
}

#[tokio::test]
async fn test_partial_failure_archives_survivors_only() {
    let extractor =
        FakeExtractor::new().fail_item("b", ErrorKind::Network, "connection reset by peer");
    let harness = Harness::new(extractor);
    let request = mp3_request(
        vec![descriptor("a", "First"), descriptor("b", "Second")],
        harness.dest(),
    );
    let tracker = ProgressTracker::new(2);

    let result = harness
        .orchestrator
        .run("batch-5", &request, &tracker, &CancellationToken::new())
        .await
        .unwrap();

    let artifact = result.artifact.clone().unwrap();
    assert_eq!(archive_entries(&artifact.path), vec!["0-First.mp3"]);
    assert_eq!(result.succeeded(), 1);
    assert_eq!(result.failed(), 1);

    let summary = result.failure_summary().unwrap();
    assert!(summary.contains("#1 Second"));
    assert!(summary.contains("NetworkError"));
    assert!(summary.contains("connection reset by peer"));
    assert_eq!(tracker.snapshot().phase, ProgressPhase::Done);
    assert!(tracker.snapshot().message.starts_with("1 of 2 downloads succeeded"));
}

#[tokio::test]
async fn test_all_failures_list_every_reason() {
    let extractor = FakeExtractor::new()
        .fail_item("a", ErrorKind::Unavailable, "Private video")
        .fail_item("b", ErrorKind::Transcode, "FFmpeg not found");
    let harness = Harness::new(extractor);
    let request = mp3_request(
        vec![descriptor("a", "One"), descriptor("b", "Two")],
        harness.dest(),
    );
    let tracker = ProgressTracker::new(2);

    let result = harness
        .orchestrator
        .run("batch-6", &request, &tracker, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.artifact.is_none());
    let summary = result.failure_summary().unwrap();
    assert!(summary.contains("Private video"));
    assert!(summary.contains("FFmpeg not found"));
    assert_eq!(tracker.snapshot().phase, ProgressPhase::Failed);
    assert!(harness.delivered().is_empty());
}

#[tokio::test]
async fn test_forced_archive_for_single_item() {
    let harness = Harness::new(FakeExtractor::new());
    let request =
        mp3_request(vec![descriptor("a", "Only")], harness.dest()).with_archive(true);

    let result = harness
        .orchestrator
        .run("batch-7", &request, &ProgressTracker::new(1), &CancellationToken::new())
        .await
        .unwrap();

    let artifact = result.artifact.unwrap();
    assert_eq!(artifact.kind, ArtifactKind::Archive);
    assert_eq!(archive_entries(&artifact.path), vec!["0-Only.mp3"]);
}

#[tokio::test]
async fn test_duplicate_titles_get_distinct_entries() {
    let harness = Harness::new(FakeExtractor::new());
    let request = mp3_request(
        vec![descriptor("a", "Same"), descriptor("b", "Same")],
        harness.dest(),
    );

    let result = harness
        .orchestrator
        .run("batch-8", &request, &ProgressTracker::new(2), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        archive_entries(&result.artifact.unwrap().path),
        vec!["0-Same.mp3", "1-Same.mp3"]
    );
}

#[tokio::test]
async fn test_empty_request_is_rejected_before_any_work() {
    let harness = Harness::new(FakeExtractor::new());
    let request = mp3_request(vec![], harness.dest());
    let tracker = ProgressTracker::new(0);

    let err = harness
        .orchestrator
        .run("batch-9", &request, &tracker, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::EmptyBatch));
    assert_eq!(tracker.snapshot().phase, ProgressPhase::Pending);
    assert_eq!(harness.workdirs_left(), 0);
}

#[tokio::test]
async fn test_cancellation_lets_current_item_finish() {
    let delay = Duration::from_millis(150);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let extractor = Arc::new(
        FakeExtractor::new()
            .with_delay(delay)
            .on_download(Arc::new(move |_: &VideoDescriptor| trigger.cancel())),
    );
    let harness = Harness::shared(extractor.clone());
    let request = mp3_request(
        vec![descriptor("a", "A"), descriptor("b", "B")],
        harness.dest(),
    );
    let tracker = ProgressTracker::new(2);

    let started = std::time::Instant::now();
    let err = harness
        .orchestrator
        .run("batch-10", &request, &tracker, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    assert!(started.elapsed() >= delay);
    assert_eq!(extractor.completed(), vec!["a"]);
    assert_eq!(extractor.downloads(), vec!["a"]);
    assert_eq!(tracker.snapshot().phase, ProgressPhase::Failed);
    assert!(harness.delivered().is_empty());
    assert_eq!(harness.workdirs_left(), 0);
}

#[tokio::test]
async fn test_cancellation_before_start_runs_nothing() {
    let extractor = Arc::new(FakeExtractor::new());
    let harness = Harness::shared(extractor.clone());
    let request = mp3_request(vec![descriptor("a", "A")], harness.dest());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .orchestrator
        .run("batch-12", &request, &ProgressTracker::new(1), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    assert!(extractor.downloads().is_empty());
    assert_eq!(harness.workdirs_left(), 0);
}

#[tokio::test]
async fn test_sampled_progress_is_monotonic_per_item() {
    let extractor = FakeExtractor::new().with_delay(Duration::from_millis(30));
    let harness = Arc::new(Harness::new(extractor));
    let request = mp3_request(
        (0..3)
            .map(|i| descriptor(&format!("id{i}"), &format!("Track {i}")))
            .collect(),
        harness.dest(),
    );
    let tracker = ProgressTracker::new(3);

    let runner = {
        let harness = harness.clone();
        let tracker = tracker.clone();
        tokio::spawn(async move {
            harness
                .orchestrator
                .run("batch-11", &request, &tracker, &CancellationToken::new())
                .await
        })
    };

    let mut samples = Vec::new();
    loop {
        let state = tracker.snapshot();
        let terminal = state.phase.is_terminal();
        samples.push(state);
        if terminal {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    runner.await.unwrap().unwrap();

    for pair in samples.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        assert!(after.current_item_index >= before.current_item_index);
        if after.current_item_index == before.current_item_index {
            assert!(
                after.percent >= before.percent,
                "percent went from {} to {}",
                before.percent,
                after.percent
            );
        }
    }
    assert_eq!(samples.last().unwrap().percent, 100.0);
}

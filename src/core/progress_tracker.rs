//! Batch Progress Tracking Module
//!
//! A shared progress record written by the worker running a batch and read
//! by any number of pollers. Every field sits behind one lock, so a snapshot
//! never mixes the phase of one update with the percent of another.
//!
//! Percent only moves forward within an item. [`ProgressTracker::begin_item`]
//! is the only call allowed to move it back, and only when the item index
//! advances.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::models::{ProgressPhase, ProgressState};

/// Cloneable handle to one batch's progress record
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    state: Arc<RwLock<ProgressState>>,
}

impl ProgressTracker {
    /// Create a tracker in `pending` for a batch of `total_items`
    pub fn new(total_items: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(ProgressState::new(total_items))),
        }
    }

    /// Consistent copy of the whole record
    pub fn snapshot(&self) -> ProgressState {
        self.state.read().clone()
    }

    /// Update phase, percent and message together.
    ///
    /// The percent is clamped to [0, 100] and never lowered. Updates after a
    /// terminal phase are ignored.
    pub fn update(&self, phase: ProgressPhase, percent: f64, message: impl Into<String>) {
        let mut state = self.state.write();
        if state.phase.is_terminal() {
            debug!("Ignoring progress update after terminal phase {:?}", state.phase);
            return;
        }

        let percent = clamp_percent(percent);
        state.phase = phase;
        if percent > state.percent {
            state.percent = percent;
        }
        state.message = message.into();
        state.updated_at = chrono::Utc::now();
    }

    /// Replace only the message, e.g. with an item's failure reason
    pub fn set_message(&self, message: impl Into<String>) {
        let mut state = self.state.write();
        state.message = message.into();
        state.updated_at = chrono::Utc::now();
    }

    /// Move to item `index` in `downloading`, at that item's share of the
    /// batch. A lower index than the current one is ignored.
    pub fn begin_item(&self, index: usize, message: impl Into<String>) {
        let mut state = self.state.write();
        if state.phase.is_terminal() {
            return;
        }
        if index < state.current_item_index {
            warn!(
                "Ignoring attempt to move progress back from item {} to {}",
                state.current_item_index, index
            );
            return;
        }

        state.current_item_index = index;
        state.phase = ProgressPhase::Downloading;
        state.percent = batch_percent(index, state.total_items, 0.0);
        state.message = message.into();
        state.updated_at = chrono::Utc::now();
    }

    /// Terminal success
    pub fn finish(&self, message: impl Into<String>) {
        let mut state = self.state.write();
        state.phase = ProgressPhase::Done;
        state.percent = 100.0;
        state.message = message.into();
        state.error = None;
        state.updated_at = chrono::Utc::now();
        info!("Batch progress finished: {}", state.message);
    }

    /// Terminal failure; the percent stays where it was
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        let mut state = self.state.write();
        state.phase = ProgressPhase::Failed;
        state.message = error.clone();
        state.error = Some(error);
        state.updated_at = chrono::Utc::now();
        warn!("Batch progress failed: {}", state.message);
    }

    /// Reset to `pending` for a new batch
    pub fn reset(&self, total_items: usize) {
        *self.state.write() = ProgressState::new(total_items);
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Overall batch percent for item `index` of `total` at `item_percent`
pub fn batch_percent(index: usize, total: usize, item_percent: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let item_fraction = clamp_percent(item_percent) / 100.0;
    (index as f64 + item_fraction) / total as f64 * 100.0
}

fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_pending() {
        let tracker = ProgressTracker::new(3);
        let state = tracker.snapshot();
        assert_eq!(state.phase, ProgressPhase::Pending);
        assert_eq!(state.percent, 0.0);
        assert_eq!(state.total_items, 3);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_percent_never_decreases_within_item() {
        let tracker = ProgressTracker::new(1);
        tracker.begin_item(0, "start");
        tracker.update(ProgressPhase::Downloading, 40.0, "40");
        tracker.update(ProgressPhase::Downloading, 10.0, "second stream");
        let state = tracker.snapshot();
        assert_eq!(state.percent, 40.0);
        assert_eq!(state.message, "second stream");

        tracker.update(ProgressPhase::Processing, 250.0, "clamped");
        assert_eq!(tracker.snapshot().percent, 100.0);
        assert_eq!(tracker.snapshot().phase, ProgressPhase::Processing);
    }

    #[test]
    fn test_begin_item_only_moves_forward() {
        let tracker = ProgressTracker::new(2);
        tracker.begin_item(1, "second");
        tracker.begin_item(0, "back");
        let state = tracker.snapshot();
        assert_eq!(state.current_item_index, 1);
        assert_eq!(state.percent, 50.0);
        assert_eq!(state.message, "second");
    }

    #[test]
    fn test_terminal_phase_is_sticky() {
        let tracker = ProgressTracker::new(1);
        tracker.fail("boom");
        tracker.update(ProgressPhase::Downloading, 80.0, "late");
        let state = tracker.snapshot();
        assert_eq!(state.phase, ProgressPhase::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert_eq!(state.percent, 0.0);
    }

    #[test]
    fn test_finish_and_reset() {
        let tracker = ProgressTracker::new(1);
        tracker.finish("done");
        assert_eq!(tracker.snapshot().percent, 100.0);
        assert_eq!(tracker.snapshot().phase, ProgressPhase::Done);

        tracker.reset(4);
        let state = tracker.snapshot();
        assert_eq!(state.phase, ProgressPhase::Pending);
        assert_eq!(state.total_items, 4);
    }

    #[test]
    fn test_batch_percent_scaling() {
        assert_eq!(batch_percent(0, 4, 0.0), 0.0);
        assert_eq!(batch_percent(1, 4, 50.0), 37.5);
        assert_eq!(batch_percent(3, 4, 100.0), 100.0);
        assert_eq!(batch_percent(0, 0, 50.0), 0.0);
    }

    #[test]
    fn test_snapshots_from_other_threads_are_consistent() {
        let tracker = ProgressTracker::new(1);
        let reader = tracker.clone();

        let handle = std::thread::spawn(move || {
            let mut last = 0.0;
            for _ in 0..1000 {
                let state = reader.snapshot();
                assert!(state.percent >= last);
                last = state.percent;
            }
        });

        for i in 0..=100 {
            tracker.update(ProgressPhase::Downloading, i as f64, format!("{i}%"));
        }
        handle.join().unwrap();
    }
}

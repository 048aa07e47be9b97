//! Progress snapshots published while a run executes.

use crate::scheduler::StateCounts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time view of run progress.
///
/// Published on a watch channel at a fixed interval plus once at run
/// start and once at the end, so observers always see the final
/// counts. Consumers only ever see the latest snapshot; intermediate
/// ones may be skipped under load, which is fine for progress display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// When the snapshot was taken.
    pub timestamp: Option<DateTime<Utc>>,
    /// Task counts per state at that moment.
    pub counts: StateCounts,
}

impl ProgressSnapshot {
    /// Snapshots the given counts at the current wall-clock time.
    pub fn new(counts: StateCounts) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            counts,
        }
    }

    /// Fraction of tasks in a terminal state, in `[0.0, 1.0]`.
    pub fn fraction_complete(&self) -> f64 {
        let total = self.counts.total();
        if total == 0 {
            return 1.0;
        }
        self.counts.terminal() as f64 / total as f64
    }

    /// True once every task has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.counts.total() > 0 && self.counts.terminal() == self.counts.total()
    }
}

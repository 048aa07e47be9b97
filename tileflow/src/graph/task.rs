//! Task identity and lifecycle states.

use crate::grid::TileId;
use crate::pipeline::StageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The atomic schedulable unit: one (tile, stage) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// The tile this task processes.
    pub tile: TileId,
    /// The pipeline stage it executes.
    pub stage: StageId,
}

impl TaskId {
    /// Creates a task id.
    pub fn new(tile: TileId, stage: StageId) -> Self {
        Self { tile, stage }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tile, self.stage)
    }
}

/// Lifecycle state of a task.
///
/// All transitions are made by the scheduler, which owns the task
/// table exclusively. Workers only report outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting on at least one dependency.
    Pending,
    /// All dependencies `Done`; queued for dispatch.
    Ready,
    /// Dispatched to the worker pool.
    Running,
    /// Completed; artifact durably stored.
    Done,
    /// Hard failure or retries exhausted.
    Failed,
    /// Never ran because an upstream task failed.
    Skipped,
}

impl TaskState {
    /// Returns true if the task will make no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Skipped)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

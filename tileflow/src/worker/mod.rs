//! Worker pools: uniform task execution over local or cluster backends.
//!
//! The scheduler is written once against [`WorkerPool`]; whether a task
//! runs on a tokio worker thread or in a remote batch-cluster slot is
//! invisible to it. Both implementations classify every outcome as
//! success, soft failure (transient, worth retrying), hard failure
//! (not worth retrying), or cancelled.
//!
//! ```text
//! Scheduler ──execute(attempt)──► WorkerPool
//!                                   ├── LocalWorkerPool   (tokio spawn + timeout)
//!                                   └── ClusterWorkerPool (submit / poll / verify)
//! ```

mod cluster;
mod local;

use crate::error::TaskError;
use crate::graph::TaskId;
use crate::grid::Tile;
use crate::pipeline::{ProcessFn, StageId};
use crate::store::ArtifactRef;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use cluster::{
    ClusterClient, ClusterFuture, ClusterJobId, ClusterJobSpec, ClusterJobState,
    ClusterWorkerPool, DEFAULT_POLL_INTERVAL_MS,
};
pub use local::LocalWorkerPool;

/// Boxed future type for dyn-compatible worker methods.
pub type WorkerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a worker needs to run one attempt of one task.
///
/// Built by the scheduler at dispatch time, after every dependency has
/// been observed `Done`.
pub struct TaskAttempt {
    /// The task being attempted.
    pub task: TaskId,
    /// Geometry of the task's tile.
    pub tile: Tile,
    /// Stage index within the pipeline.
    pub stage: StageId,
    /// Stage name, used for artifact keys and logging.
    pub stage_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Wall-clock timeout; exceeding it is a soft failure.
    pub timeout: Duration,
    /// The opaque processing function for this stage.
    pub process: Arc<dyn ProcessFn>,
    /// Refs of every dependency artifact, in deterministic order.
    pub inputs: Vec<(TaskId, ArtifactRef)>,
    /// Cancellation scoped to this run.
    pub cancellation: CancellationToken,
}

impl std::fmt::Debug for TaskAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskAttempt")
            .field("task", &self.task)
            .field("stage_name", &self.stage_name)
            .field("attempt", &self.attempt)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

/// Classified result of one execution attempt.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The task completed and its artifact is durably stored.
    Success(ArtifactRef),
    /// Transient failure (timeout, preemption, store write error).
    /// Retried under the stage's retry policy.
    SoftFailure(TaskError),
    /// Permanent failure (malformed input, processing logic error).
    /// Never retried.
    HardFailure(TaskError),
    /// The run was cancelled while the attempt was in flight.
    Cancelled,
}

impl TaskOutcome {
    /// Returns true for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// Uniform execution surface over local and cluster backends.
pub trait WorkerPool: Send + Sync + 'static {
    /// Executes one attempt to completion (or timeout/cancellation).
    ///
    /// Never panics outward: a panicking processing function is
    /// reported as a hard failure.
    fn execute(&self, attempt: TaskAttempt) -> WorkerFuture<'_, TaskOutcome>;
}

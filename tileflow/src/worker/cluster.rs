//! Cluster adapter: runs tasks through a remote batch scheduler.
//!
//! The adapter speaks a minimal submit/poll/cancel protocol via the
//! [`ClusterClient`] trait, so swapping PBS for another batch system
//! changes no scheduler logic. Submission never blocks the scheduler;
//! progress is observed through bounded-interval polling (polling is
//! unavoidable at this boundary, batch schedulers offer no completion
//! channel).
//!
//! Remote jobs write their artifacts into the shared [`ArtifactStore`]
//! root; the adapter treats "job finished" as trustworthy only once
//! the artifact is visible in the store.

use super::{TaskAttempt, TaskOutcome, WorkerFuture, WorkerPool};
use crate::error::TaskError;
use crate::graph::TaskId;
use crate::store::{ArtifactRef, ArtifactStore};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Boxed future type for dyn-compatible cluster client methods.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque identifier of a submitted batch job.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterJobId(pub String);

impl fmt::Display for ClusterJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the batch system needs to start one task attempt remotely.
#[derive(Clone, Debug)]
pub struct ClusterJobSpec {
    /// The task being attempted.
    pub task: TaskId,
    /// Stage name (selects the processing binary/entry point remotely).
    pub stage_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Observed state of a submitted batch job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterJobState {
    /// Waiting for a cluster slot.
    Queued,
    /// Executing on a node.
    Running,
    /// Finished; the artifact should be in the shared store.
    Succeeded,
    /// Failed. `transient` distinguishes preemption/node loss from a
    /// processing error.
    Failed {
        /// Whether the failure is worth retrying.
        transient: bool,
        /// Batch-system diagnostic.
        message: String,
    },
}

/// Minimal batch-scheduler protocol.
pub trait ClusterClient: Send + Sync + 'static {
    /// Submits a job. Must return promptly (queue insertion only).
    fn submit(&self, spec: ClusterJobSpec) -> ClusterFuture<'_, Result<ClusterJobId, TaskError>>;

    /// Polls a job's current state.
    fn poll<'a>(
        &'a self,
        id: &'a ClusterJobId,
    ) -> ClusterFuture<'a, Result<ClusterJobState, TaskError>>;

    /// Best-effort cancellation of a queued or running job.
    fn cancel<'a>(&'a self, id: &'a ClusterJobId) -> ClusterFuture<'a, ()>;
}

/// Worker pool that dispatches task attempts to a batch cluster.
pub struct ClusterWorkerPool<C: ClusterClient> {
    client: Arc<C>,
    store: Arc<dyn ArtifactStore>,
    poll_interval: Duration,
}

impl<C: ClusterClient> ClusterWorkerPool<C> {
    /// Creates an adapter polling at the default interval.
    pub fn new(client: Arc<C>, store: Arc<dyn ArtifactStore>) -> Self {
        Self::with_poll_interval(client, store, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }

    /// Creates an adapter with an explicit poll interval.
    pub fn with_poll_interval(
        client: Arc<C>,
        store: Arc<dyn ArtifactStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            store,
            poll_interval,
        }
    }

    /// Confirms a remotely reported success against the store. A job
    /// that exits zero without publishing its artifact is treated as a
    /// transient infrastructure fault.
    async fn verify_artifact(&self, task: TaskId, stage_name: &str) -> Option<ArtifactRef> {
        self.store.lookup(task.tile, stage_name).await
    }
}

impl<C: ClusterClient> WorkerPool for ClusterWorkerPool<C> {
    fn execute(&self, attempt: TaskAttempt) -> WorkerFuture<'_, TaskOutcome> {
        Box::pin(async move {
            if attempt.cancellation.is_cancelled() {
                return TaskOutcome::Cancelled;
            }

            let spec = ClusterJobSpec {
                task: attempt.task,
                stage_name: attempt.stage_name.clone(),
                attempt: attempt.attempt,
            };

            let job_id = match self.client.submit(spec).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(task = %attempt.task, error = %e, "Cluster submission failed");
                    // Submission failures are infrastructure, not input.
                    return TaskOutcome::SoftFailure(TaskError::transient(format!(
                        "cluster submission failed: {e}"
                    )));
                }
            };

            debug!(task = %attempt.task, job = %job_id, "Submitted to cluster");

            let deadline = tokio::time::Instant::now() + attempt.timeout;
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = attempt.cancellation.cancelled() => {
                        self.client.cancel(&job_id).await;
                        return TaskOutcome::Cancelled;
                    }

                    _ = tokio::time::sleep_until(deadline) => {
                        warn!(
                            task = %attempt.task,
                            job = %job_id,
                            timeout_secs = attempt.timeout.as_secs(),
                            "Cluster job exceeded wall-clock timeout"
                        );
                        self.client.cancel(&job_id).await;
                        return TaskOutcome::SoftFailure(TaskError::transient(format!(
                            "cluster job {job_id} timed out after {:?}",
                            attempt.timeout
                        )));
                    }

                    _ = interval.tick() => {
                        let state = match self.client.poll(&job_id).await {
                            Ok(state) => state,
                            Err(e) if e.is_transient() => {
                                // Transient polling error; keep waiting.
                                debug!(job = %job_id, error = %e, "Poll failed, will retry");
                                continue;
                            }
                            Err(e) => {
                                return TaskOutcome::SoftFailure(TaskError::transient(format!(
                                    "lost contact with cluster job {job_id}: {e}"
                                )));
                            }
                        };

                        match state {
                            ClusterJobState::Queued | ClusterJobState::Running => continue,
                            ClusterJobState::Succeeded => {
                                match self.verify_artifact(attempt.task, &attempt.stage_name).await {
                                    Some(artifact) => return TaskOutcome::Success(artifact),
                                    None => {
                                        warn!(
                                            task = %attempt.task,
                                            job = %job_id,
                                            "Cluster job succeeded but artifact missing from store"
                                        );
                                        return TaskOutcome::SoftFailure(TaskError::transient(
                                            "cluster job finished without publishing artifact",
                                        ));
                                    }
                                }
                            }
                            ClusterJobState::Failed { transient, message } => {
                                let err = TaskError::new(message);
                                return if transient {
                                    TaskOutcome::SoftFailure(TaskError::transient(
                                        err.message().to_string(),
                                    ))
                                } else {
                                    TaskOutcome::HardFailure(err)
                                };
                            }
                        }
                    }
                }
            }
        })
    }
}

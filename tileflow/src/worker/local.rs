//! Local worker pool: runs processing functions on the tokio runtime.

use super::{TaskAttempt, TaskOutcome, WorkerFuture, WorkerPool};
use crate::error::{StoreError, TaskError};
use crate::pipeline::{ProcessContext, ProcessInput};
use crate::store::ArtifactStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes tasks in-process.
///
/// Each attempt: resolve dependency artifacts from the store, run the
/// processing function under the stage timeout, persist the produced
/// bytes. Concurrency is bounded by the scheduler's budget, not here;
/// the pool itself only isolates and classifies failures:
///
/// - timeout → soft failure (the in-flight attempt is aborted)
/// - panic in the processing function → hard failure
/// - store write error → soft failure (retry may land on healthy I/O)
/// - corrupt dependency artifact → hard failure (retry cannot fix it)
pub struct LocalWorkerPool {
    store: Arc<dyn ArtifactStore>,
}

impl LocalWorkerPool {
    /// Creates a pool writing artifacts through `store`.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    async fn resolve_inputs(&self, attempt: &TaskAttempt) -> Result<Vec<ProcessInput>, TaskOutcome> {
        let mut inputs = Vec::with_capacity(attempt.inputs.len());
        for (task, artifact) in &attempt.inputs {
            match self.store.get(artifact).await {
                Ok(data) => inputs.push(ProcessInput { task: *task, data }),
                Err(e @ StoreError::Corrupt { .. }) => {
                    warn!(task = %attempt.task, upstream = %task, "Dependency artifact corrupt");
                    return Err(TaskOutcome::HardFailure(e.into_task_error()));
                }
                Err(e) => {
                    return Err(TaskOutcome::SoftFailure(
                        TaskError::transient(format!(
                            "failed to read dependency artifact from {task}"
                        ))
                        .with_source(e),
                    ));
                }
            }
        }
        Ok(inputs)
    }
}

impl WorkerPool for LocalWorkerPool {
    fn execute(&self, attempt: TaskAttempt) -> WorkerFuture<'_, TaskOutcome> {
        Box::pin(async move {
            if attempt.cancellation.is_cancelled() {
                return TaskOutcome::Cancelled;
            }

            let inputs = match self.resolve_inputs(&attempt).await {
                Ok(inputs) => inputs,
                Err(outcome) => return outcome,
            };

            let ctx = ProcessContext {
                tile: attempt.tile.clone(),
                stage: attempt.stage,
                stage_name: attempt.stage_name.clone(),
                attempt: attempt.attempt,
                inputs,
                cancellation: attempt.cancellation.clone(),
            };

            debug!(
                task = %attempt.task,
                stage = %attempt.stage_name,
                attempt = attempt.attempt,
                "Executing task"
            );

            // Spawn so a panicking processing function is contained to
            // this attempt instead of unwinding into the scheduler.
            let process = Arc::clone(&attempt.process);
            let handle = tokio::spawn(async move {
                let result = process.run(&ctx).await;
                (ctx, result)
            });
            // Taken before the select! consumes the handle, so both the
            // cancellation and timeout paths can stop the spawned task.
            let abort = handle.abort_handle();

            let result = tokio::select! {
                _ = attempt.cancellation.cancelled() => {
                    abort.abort();
                    return TaskOutcome::Cancelled;
                }
                joined = tokio::time::timeout(attempt.timeout, handle) => match joined {
                    Err(_) => {
                        abort.abort();
                        warn!(
                            task = %attempt.task,
                            timeout_secs = attempt.timeout.as_secs(),
                            "Task exceeded wall-clock timeout"
                        );
                        return TaskOutcome::SoftFailure(TaskError::transient(format!(
                            "timed out after {:?}",
                            attempt.timeout
                        )));
                    }
                    Ok(Err(join_err)) => {
                        return TaskOutcome::HardFailure(TaskError::new(format!(
                            "processing function panicked: {join_err}"
                        )));
                    }
                    Ok(Ok((_ctx, result))) => result,
                },
            };

            match result {
                Ok(data) => {
                    match self
                        .store
                        .put(attempt.task.tile, &attempt.stage_name, attempt.attempt, data)
                        .await
                    {
                        Ok(artifact) => TaskOutcome::Success(artifact),
                        Err(StoreError::AlreadyExists { .. }) => {
                            // Another writer completed this (tile, stage)
                            // first. The stored artifact is valid.
                            match self
                                .store
                                .lookup(attempt.task.tile, &attempt.stage_name)
                                .await
                            {
                                Some(artifact) => TaskOutcome::Success(artifact),
                                None => TaskOutcome::SoftFailure(TaskError::transient(
                                    "artifact vanished after write conflict",
                                )),
                            }
                        }
                        Err(e) => TaskOutcome::SoftFailure(e.into_task_error()),
                    }
                }
                Err(e) if e.is_transient() => TaskOutcome::SoftFailure(e),
                Err(e) => TaskOutcome::HardFailure(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskId;
    use crate::grid::{Rect, Tile, TileId};
    use crate::pipeline::StageId;
    use crate::store::MemoryArtifactStore;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Sleeps, then sets `finished`. Lets tests observe whether an
    /// attempt kept running after it should have been stopped.
    struct DelayedMarker {
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    impl crate::pipeline::ProcessFn for DelayedMarker {
        fn run<'a>(
            &'a self,
            _ctx: &'a ProcessContext,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Bytes, TaskError>> + Send + 'a>,
        > {
            Box::pin(async {
                tokio::time::sleep(self.delay).await;
                self.finished.store(true, Ordering::SeqCst);
                Ok(Bytes::new())
            })
        }
    }

    fn test_tile() -> Tile {
        Tile {
            id: TileId::new(0, 0),
            core: Rect::new(0.0, 0.0, 100.0, 100.0),
            processing: Rect::new(0.0, 0.0, 100.0, 100.0),
        }
    }

    fn attempt(
        process: impl crate::pipeline::ProcessFn,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> TaskAttempt {
        TaskAttempt {
            task: TaskId::new(TileId::new(0, 0), StageId(0)),
            tile: test_tile(),
            stage: StageId(0),
            stage_name: "resample".to_string(),
            attempt: 1,
            timeout,
            process: Arc::new(process),
            inputs: vec![],
            cancellation,
        }
    }

    #[tokio::test]
    async fn test_success_stores_artifact() {
        let store = Arc::new(MemoryArtifactStore::new());
        let pool = LocalWorkerPool::new(store.clone());

        let outcome = pool
            .execute(attempt(
                |_: &ProcessContext| Ok(Bytes::from_static(b"resampled")),
                Duration::from_secs(5),
                CancellationToken::new(),
            ))
            .await;

        let TaskOutcome::Success(artifact) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(
            store.get(&artifact).await.unwrap(),
            Bytes::from_static(b"resampled")
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_hard() {
        let pool = LocalWorkerPool::new(Arc::new(MemoryArtifactStore::new()));
        let outcome = pool
            .execute(attempt(
                |_: &ProcessContext| Err(TaskError::new("malformed tile input")),
                Duration::from_secs(5),
                CancellationToken::new(),
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::HardFailure(_)));
    }

    #[tokio::test]
    async fn test_transient_failure_is_soft() {
        let pool = LocalWorkerPool::new(Arc::new(MemoryArtifactStore::new()));
        let outcome = pool
            .execute(attempt(
                |_: &ProcessContext| Err(TaskError::transient("node preempted")),
                Duration::from_secs(5),
                CancellationToken::new(),
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::SoftFailure(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_soft_failure() {
        let pool = LocalWorkerPool::new(Arc::new(MemoryArtifactStore::new()));
        let outcome = pool
            .execute(attempt(
                DelayedMarker {
                    delay: Duration::from_secs(60),
                    finished: Arc::new(AtomicBool::new(false)),
                },
                Duration::from_millis(20),
                CancellationToken::new(),
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::SoftFailure(_)));
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_aborted() {
        let finished = Arc::new(AtomicBool::new(false));
        let pool = LocalWorkerPool::new(Arc::new(MemoryArtifactStore::new()));

        let outcome = pool
            .execute(attempt(
                DelayedMarker {
                    delay: Duration::from_millis(100),
                    finished: finished.clone(),
                },
                Duration::from_millis(10),
                CancellationToken::new(),
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::SoftFailure(_)));

        // An aborted attempt never reaches its completion marker
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_attempt() {
        let finished = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let pool = LocalWorkerPool::new(Arc::new(MemoryArtifactStore::new()));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let outcome = pool
            .execute(attempt(
                DelayedMarker {
                    delay: Duration::from_millis(100),
                    finished: finished.clone(),
                },
                Duration::from_secs(5),
                token,
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::Cancelled));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_hard_failure() {
        let pool = LocalWorkerPool::new(Arc::new(MemoryArtifactStore::new()));
        let outcome = pool
            .execute(attempt(
                |_: &ProcessContext| -> Result<Bytes, TaskError> {
                    panic!("logic error in processing function")
                },
                Duration::from_secs(5),
                CancellationToken::new(),
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::HardFailure(_)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_attempt() {
        let pool = LocalWorkerPool::new(Arc::new(MemoryArtifactStore::new()));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = pool
            .execute(attempt(
                |_: &ProcessContext| Ok(Bytes::new()),
                Duration::from_secs(5),
                token,
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_inputs_resolved_from_store() {
        let store = Arc::new(MemoryArtifactStore::new());
        let upstream_tile = TileId::new(0, 0);
        let upstream_ref = store
            .put(upstream_tile, "resample", 1, Bytes::from_static(b"grid"))
            .await
            .unwrap();

        let pool = LocalWorkerPool::new(store);
        let mut a = attempt(
            |ctx: &ProcessContext| {
                let input = ctx
                    .input_from(TileId::new(0, 0), StageId(0))
                    .ok_or_else(|| TaskError::new("missing input"))?;
                Ok(Bytes::from(format!("matched:{}", input.len())))
            },
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        a.task = TaskId::new(upstream_tile, StageId(1));
        a.stage = StageId(1);
        a.stage_name = "match".to_string();
        a.inputs = vec![(TaskId::new(upstream_tile, StageId(0)), upstream_ref)];

        let outcome = pool.execute(a).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_corrupt_dependency_is_hard_failure() {
        let store = Arc::new(MemoryArtifactStore::new());
        let tile = TileId::new(0, 0);
        let upstream_ref = store
            .put(tile, "resample", 1, Bytes::from_static(b"grid"))
            .await
            .unwrap();
        store.corrupt(tile, "resample", Bytes::from_static(b"junk"));

        let pool = LocalWorkerPool::new(store);
        let mut a = attempt(
            |_: &ProcessContext| Ok(Bytes::new()),
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        a.inputs = vec![(TaskId::new(tile, StageId(0)), upstream_ref)];

        let outcome = pool.execute(a).await;
        assert!(matches!(outcome, TaskOutcome::HardFailure(_)));
    }
}

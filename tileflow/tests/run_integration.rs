//! End-to-end tests for the run coordinator.
//!
//! These tests drive complete runs over in-memory and disk stores:
//! - full grids to `Succeeded`
//! - single-task failure → downstream skip → `PartialFailure`
//! - idempotent re-runs over a populated store
//! - restart after operator cancellation
//! - retry of transient failures and retry exhaustion
//!
//! Run with: `cargo test --test run_integration`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use tileflow::pipeline::ProcessContext;
use tileflow::{
    ArtifactStore, ConcurrencyBudget, DependencyPattern, DiskArtifactStore, Footprint,
    LocalWorkerPool, MemoryArtifactStore, Pipeline, RetryPolicy, RunConfig, RunCoordinator,
    RunStatus, Stage, StageId, TaskError, TaskId, TileId, TileOutcome,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// A stage whose processing function always succeeds.
fn ok_stage(name: &str, pattern: DependencyPattern) -> Stage {
    let name_owned = name.to_string();
    Stage::new(name, pattern, move |ctx: &ProcessContext| {
        Ok(Bytes::from(format!("{}:{}", name_owned, ctx.tile.id)))
    })
}

/// A stage that counts invocations.
fn counting_stage(name: &str, pattern: DependencyPattern, counter: Arc<AtomicU64>) -> Stage {
    Stage::new(name, pattern, move |_: &ProcessContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"out"))
    })
}

fn coordinator_over(
    pipeline: Pipeline,
    store: Arc<MemoryArtifactStore>,
    footprint: Footprint,
    tile_size: f64,
    margin: f64,
    tolerance: f64,
) -> RunCoordinator {
    let worker = Arc::new(LocalWorkerPool::new(store.clone()));
    let config = RunConfig::new(tile_size, margin, tolerance)
        .with_budget(ConcurrencyBudget::total(4))
        .with_progress_interval(Duration::from_millis(20));
    RunCoordinator::new(footprint, pipeline, config, worker, store)
}

/// 10×10 grid of 100-unit tiles, no margin.
fn ten_by_ten() -> Footprint {
    Footprint::new(0.0, 0.0, 1000.0, 1000.0).unwrap()
}

fn three_sequential_stages() -> Pipeline {
    Pipeline::builder()
        .stage(ok_stage("resample", DependencyPattern::Root))
        .stage(ok_stage("match", DependencyPattern::Sequential))
        .stage(ok_stage("triangulate", DependencyPattern::Sequential))
        .build()
        .unwrap()
}

// ============================================================================
// Clean Runs
// ============================================================================

#[tokio::test]
async fn test_ten_by_ten_three_stages_all_done() {
    let invocations = Arc::new(AtomicU64::new(0));
    let pipeline = Pipeline::builder()
        .stage(counting_stage(
            "resample",
            DependencyPattern::Root,
            invocations.clone(),
        ))
        .stage(counting_stage(
            "match",
            DependencyPattern::Sequential,
            invocations.clone(),
        ))
        .stage(counting_stage(
            "triangulate",
            DependencyPattern::Sequential,
            invocations.clone(),
        ))
        .build()
        .unwrap();

    let store = Arc::new(MemoryArtifactStore::new());
    let coordinator = coordinator_over(pipeline, store.clone(), ten_by_ten(), 100.0, 0.0, 0.0);

    let report = coordinator.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.counts.done, 300);
    assert_eq!(report.counts.failed, 0);
    assert_eq!(report.counts.skipped, 0);
    assert_eq!(report.invocations, 300);
    assert_eq!(invocations.load(Ordering::SeqCst), 300);
    assert_eq!(report.artifacts.len(), 300);
    assert_eq!(report.tile_outcomes.len(), 100);
    assert!(report
        .tile_outcomes
        .iter()
        .all(|(_, o)| *o == TileOutcome::Done));
    assert_eq!(store.put_count(), 300);
}

#[tokio::test]
async fn test_progress_reaches_completion() {
    let store = Arc::new(MemoryArtifactStore::new());
    let coordinator = coordinator_over(
        three_sequential_stages(),
        store,
        Footprint::new(0.0, 0.0, 300.0, 300.0).unwrap(),
        100.0,
        0.0,
        0.0,
    );
    let progress = coordinator.subscribe();

    coordinator.execute().await.unwrap();

    let last = *progress.borrow();
    assert!(last.is_complete());
    assert_eq!(last.counts.done, 27);
    assert!(last.timestamp.is_some());
}

// ============================================================================
// Failure Propagation
// ============================================================================

#[tokio::test]
async fn test_single_tile_hard_failure_skips_only_its_downstream() {
    let poisoned = TileId::new(4, 4);
    let pipeline = Pipeline::builder()
        .stage(ok_stage("resample", DependencyPattern::Root))
        .stage(Stage::new(
            "match",
            DependencyPattern::Sequential,
            move |ctx: &ProcessContext| {
                if ctx.tile.id == poisoned {
                    Err(TaskError::new("malformed tile input"))
                } else {
                    Ok(Bytes::from_static(b"disparity"))
                }
            },
        ))
        .stage(ok_stage("triangulate", DependencyPattern::Sequential))
        .build()
        .unwrap();

    let store = Arc::new(MemoryArtifactStore::new());
    let coordinator = coordinator_over(pipeline, store, ten_by_ten(), 100.0, 0.0, 0.05);

    let report = coordinator.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.skipped, 1);
    // Every task independent of the failure is unaffected.
    assert_eq!(report.counts.done, 298);
    assert_eq!(
        report.failed_tasks,
        vec![TaskId::new(poisoned, StageId(1))]
    );
    assert_eq!(report.failed_tiles(), vec![poisoned]);

    // The skipped task is exactly the poisoned tile's stage-3 task.
    let skipped: Vec<_> = report
        .tile_outcomes
        .iter()
        .filter(|(_, o)| *o == TileOutcome::Skipped)
        .collect();
    assert!(skipped.is_empty(), "failure outranks skip on the same tile");
}

#[tokio::test]
async fn test_margin_failure_reaches_neighbors() {
    // rasterize consumes triangulate output from margin neighbors, so a
    // failed triangulation poisons the rasterization of every adjacent
    // tile, and only those.
    let poisoned = TileId::new(1, 1);
    let pipeline = Pipeline::builder()
        .stage(ok_stage("resample", DependencyPattern::Root))
        .stage(Stage::new(
            "triangulate",
            DependencyPattern::Sequential,
            move |ctx: &ProcessContext| {
                if ctx.tile.id == poisoned {
                    Err(TaskError::new("degenerate point cloud"))
                } else {
                    Ok(Bytes::from_static(b"cloud"))
                }
            },
        ))
        .stage(ok_stage("rasterize", DependencyPattern::Margin))
        .build()
        .unwrap();

    let store = Arc::new(MemoryArtifactStore::new());
    let footprint = Footprint::new(0.0, 0.0, 400.0, 400.0).unwrap();
    let coordinator = coordinator_over(pipeline, store, footprint, 100.0, 10.0, 1.0);

    let report = coordinator.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.counts.failed, 1);
    // (1,1) is interior in a 4×4 grid: its own rasterize task plus the
    // rasterize task of all 8 neighbors are skipped.
    assert_eq!(report.counts.skipped, 9);
    assert_eq!(report.counts.done, 4 * 4 * 3 - 10);

    let skipped_tiles: Vec<_> = report
        .tile_outcomes
        .iter()
        .filter(|(_, o)| *o == TileOutcome::Skipped)
        .map(|(t, _)| *t)
        .collect();
    assert_eq!(skipped_tiles.len(), 8);
    assert!(skipped_tiles
        .iter()
        .all(|t| t.row.abs_diff(1) <= 1 && t.col.abs_diff(1) <= 1));
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_transient_failures_retried_to_success() {
    let flaky = TileId::new(0, 0);
    let pipeline = Pipeline::builder()
        .stage(
            Stage::new(
                "resample",
                DependencyPattern::Root,
                move |ctx: &ProcessContext| {
                    if ctx.tile.id == flaky && ctx.attempt < 3 {
                        Err(TaskError::transient("node preempted"))
                    } else {
                        Ok(Bytes::from_static(b"grid"))
                    }
                },
            )
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1))),
        )
        .build()
        .unwrap();

    let store = Arc::new(MemoryArtifactStore::new());
    let footprint = Footprint::new(0.0, 0.0, 200.0, 200.0).unwrap();
    let coordinator = coordinator_over(pipeline, store, footprint, 100.0, 0.0, 0.0);

    let report = coordinator.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.counts.done, 4);
    // 4 tiles + 2 extra attempts for the flaky one
    assert_eq!(report.invocations, 6);
}

#[tokio::test]
async fn test_retry_exhaustion_fails_task_and_skips_downstream() {
    let pipeline = Pipeline::builder()
        .stage(
            Stage::new("resample", DependencyPattern::Root, |ctx: &ProcessContext| {
                if ctx.tile.id == TileId::new(0, 0) {
                    Err(TaskError::transient("storage flapping"))
                } else {
                    Ok(Bytes::from_static(b"grid"))
                }
            })
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
        )
        .stage(ok_stage("match", DependencyPattern::Sequential))
        .build()
        .unwrap();

    let store = Arc::new(MemoryArtifactStore::new());
    let footprint = Footprint::new(0.0, 0.0, 200.0, 100.0).unwrap();
    let coordinator = coordinator_over(pipeline, store, footprint, 100.0, 0.0, 1.0);

    let report = coordinator.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::PartialFailure);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.counts.done, 2);
    assert_eq!(
        report.failed_tasks,
        vec![TaskId::new(TileId::new(0, 0), StageId(0))]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_is_retried_as_soft_failure() {
    let slow_once = TileId::new(0, 1);
    let pipeline = Pipeline::builder()
        .stage(
            Stage::new(
                "match",
                DependencyPattern::Root,
                move |ctx: &ProcessContext| {
                    if ctx.tile.id == slow_once && ctx.attempt == 1 {
                        // Exceeds the stage timeout; the attempt is
                        // dropped and retried.
                        std::thread::sleep(Duration::from_millis(200));
                    }
                    Ok(Bytes::from_static(b"disparity"))
                },
            )
            .with_timeout(Duration::from_millis(50))
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
        )
        .build()
        .unwrap();

    let store = Arc::new(MemoryArtifactStore::new());
    let footprint = Footprint::new(0.0, 0.0, 200.0, 100.0).unwrap();
    let coordinator = coordinator_over(pipeline, store, footprint, 100.0, 0.0, 0.0);

    let report = coordinator.execute().await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.counts.done, 2);
}

// ============================================================================
// Idempotence and Restart
// ============================================================================

#[tokio::test]
async fn test_second_run_over_populated_store_invokes_nothing() {
    let store = Arc::new(MemoryArtifactStore::new());
    let footprint = Footprint::new(0.0, 0.0, 300.0, 300.0).unwrap();

    let first = coordinator_over(
        three_sequential_stages(),
        store.clone(),
        footprint,
        100.0,
        0.0,
        0.0,
    );
    let report = first.execute().await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.invocations, 27);
    assert_eq!(store.put_count(), 27);

    let second = coordinator_over(
        three_sequential_stages(),
        store.clone(),
        footprint,
        100.0,
        0.0,
        0.0,
    );
    let report = second.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.invocations, 0);
    assert_eq!(report.cache_hits, 27);
    assert_eq!(report.counts.done, 27);
    // No artifact was rewritten
    assert_eq!(store.put_count(), 27);
}

#[tokio::test]
async fn test_restart_after_cancellation_completes_the_run() {
    let store = Arc::new(MemoryArtifactStore::new());
    let footprint = Footprint::new(0.0, 0.0, 400.0, 400.0).unwrap();
    let completed = Arc::new(AtomicU64::new(0));

    // The processing function cancels the run from the inside once
    // eight tasks have finished, which is deterministic where a timer
    // would race the scheduler.
    let completed_in_fn = completed.clone();
    let pipeline = Pipeline::builder()
        .stage(Stage::new(
            "resample",
            DependencyPattern::Root,
            move |ctx: &ProcessContext| {
                if completed_in_fn.fetch_add(1, Ordering::SeqCst) + 1 == 8 {
                    ctx.cancellation.cancel();
                }
                Ok(Bytes::from_static(b"grid"))
            },
        ))
        .stage(ok_stage("match", DependencyPattern::Sequential))
        .build()
        .unwrap();

    let first = coordinator_over(pipeline, store.clone(), footprint, 100.0, 0.0, 1.0);
    let report = first.execute().await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.counts.skipped > 0, "cancellation skips pending work");
    assert!(report.counts.done < 32);

    // Re-run with a healthy pipeline over the same store.
    let pipeline = Pipeline::builder()
        .stage(ok_stage("resample", DependencyPattern::Root))
        .stage(ok_stage("match", DependencyPattern::Sequential))
        .build()
        .unwrap();
    let second = coordinator_over(pipeline, store.clone(), footprint, 100.0, 0.0, 0.0);
    let report = second.execute().await.unwrap();

    // The final artifact set matches an uninterrupted run.
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.counts.done, 32);
    assert_eq!(report.cache_hits + report.invocations, 32);
    assert!(report.cache_hits > 0, "first run's artifacts were reused");
    assert_eq!(store.len(), 32);
}

// ============================================================================
// Disk Store End-to-End
// ============================================================================

#[tokio::test]
async fn test_margin_pipeline_over_disk_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(DiskArtifactStore::new(dir.path()));
    let worker = Arc::new(LocalWorkerPool::new(store.clone()));

    // rasterize reports how many dependency artifacts it saw, which
    // pins the margin-neighbor wiring end to end.
    let pipeline = Pipeline::builder()
        .stage(ok_stage("triangulate", DependencyPattern::Root))
        .stage(Stage::new(
            "rasterize",
            DependencyPattern::Margin,
            |ctx: &ProcessContext| Ok(Bytes::from(format!("{}", ctx.inputs.len()))),
        ))
        .build()
        .unwrap();

    let footprint = Footprint::new(0.0, 0.0, 300.0, 300.0).unwrap();
    let config = RunConfig::new(100.0, 10.0, 0.0)
        .with_budget(ConcurrencyBudget::total(4))
        .with_progress_interval(Duration::from_millis(20))
        .with_state_path(dir.path().join("run_state.json"));
    let coordinator = RunCoordinator::new(footprint, pipeline, config, worker, store.clone());

    let report = coordinator.execute().await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.counts.done, 18);

    // Center tile of a 3×3 grid consumes itself plus all 8 neighbors.
    let center = store
        .lookup(TileId::new(1, 1), "rasterize")
        .await
        .expect("center artifact");
    assert_eq!(
        store.get(&center).await.unwrap(),
        Bytes::from_static(b"9")
    );
    // Corner tile consumes itself plus 3 neighbors.
    let corner = store
        .lookup(TileId::new(0, 0), "rasterize")
        .await
        .expect("corner artifact");
    assert_eq!(
        store.get(&corner).await.unwrap(),
        Bytes::from_static(b"4")
    );

    // The persisted run state reflects the terminal status.
    let state = tileflow::run::RunState::load(&dir.path().join("run_state.json"))
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Succeeded);
    assert_eq!(state.tiles.len(), 9);
    assert_eq!(state.tasks.len(), 18);
    assert_eq!(state.artifacts.len(), 18);
}

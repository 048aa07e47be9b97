//! The run coordinator: one end-to-end execution over a footprint.
//!
//! Owns the lifecycle the scheduler does not: partitioning, graph
//! construction, terminal-status classification, per-tile outcome
//! aggregation, and run-state persistence. Graph errors abort before
//! any scheduling; once the scheduler starts, every task reaches a
//! terminal state and no tile is ever silently dropped from the
//! report.

use super::progress::ProgressSnapshot;
use super::state::RunState;
use crate::error::GraphError;
use crate::graph::{TaskGraph, TaskId, TaskState};
use crate::grid::{Footprint, TileGrid, TileId};
use crate::pipeline::Pipeline;
use crate::scheduler::{ConcurrencyBudget, Scheduler, SchedulerReport, StateCounts};
use crate::store::{ArtifactRef, ArtifactStore};
use crate::worker::WorkerPool;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default interval between progress snapshots.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Lifecycle status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Partitioning and graph construction in progress.
    Initializing,
    /// The scheduler is driving tasks.
    Running,
    /// Every task ended `Done`.
    Succeeded,
    /// Some tasks failed or were skipped, within the configured
    /// failure tolerance.
    PartialFailure,
    /// Failures exceeded the tolerance, a graph error occurred, or the
    /// run was cancelled.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Initializing => "initializing",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartialFailure => "partial-failure",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Final outcome of one tile across all stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileOutcome {
    /// Every stage of the tile completed.
    Done,
    /// At least one stage failed permanently.
    Failed,
    /// No stage failed, but at least one was skipped (an upstream
    /// neighbor's failure reached this tile, or the run was cancelled).
    Skipped,
}

/// Run-wide parameters.
///
/// The failure tolerance is deliberately a required constructor
/// argument: how many tiles a product can lose before it is worthless
/// is a per-product decision, never a library default.
#[derive(Clone, Debug)]
pub struct RunConfig {
    tile_size: f64,
    margin: f64,
    failure_tolerance: f64,
    budget: ConcurrencyBudget,
    progress_interval: Duration,
    state_path: Option<PathBuf>,
}

impl RunConfig {
    /// Creates a config.
    ///
    /// `failure_tolerance` is the maximum fraction of tasks allowed to
    /// end `Failed` or `Skipped` before the whole run is classified
    /// `Failed` instead of `PartialFailure`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_tolerance` is outside `[0.0, 1.0]`.
    pub fn new(tile_size: f64, margin: f64, failure_tolerance: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_tolerance),
            "failure tolerance must be a fraction in [0.0, 1.0]"
        );
        Self {
            tile_size,
            margin,
            failure_tolerance,
            budget: ConcurrencyBudget::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            state_path: None,
        }
    }

    /// Sets the concurrency budget.
    pub fn with_budget(mut self, budget: ConcurrencyBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Sets the interval between progress snapshots.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Persists run state (tile geometry, task statuses, artifact
    /// index) to `path` at run start and completion.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }
}

/// Everything a caller learns from a finished run.
#[derive(Debug)]
pub struct RunReport {
    /// Terminal classification.
    pub status: RunStatus,
    /// Final outcome per tile, sorted by tile id. Every tile of the
    /// partition appears exactly once.
    pub tile_outcomes: Vec<(TileId, TileOutcome)>,
    /// Tasks that ended `Failed`, sorted.
    pub failed_tasks: Vec<TaskId>,
    /// Task counts per final state.
    pub counts: StateCounts,
    /// Artifact refs of every completed task.
    pub artifacts: Vec<ArtifactRef>,
    /// Processing-function dispatches (cache hits excluded).
    pub invocations: u64,
    /// Tasks satisfied from the artifact store without running.
    pub cache_hits: u64,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl RunReport {
    /// Tiles that did not complete every stage.
    pub fn failed_tiles(&self) -> Vec<TileId> {
        self.tile_outcomes
            .iter()
            .filter(|(_, o)| *o != TileOutcome::Done)
            .map(|(t, _)| *t)
            .collect()
    }
}

/// Drives one run from footprint to final report.
pub struct RunCoordinator {
    footprint: Footprint,
    pipeline: Arc<Pipeline>,
    config: RunConfig,
    worker: Arc<dyn WorkerPool>,
    store: Arc<dyn ArtifactStore>,
    cancellation: CancellationToken,
    progress: watch::Sender<ProgressSnapshot>,
}

impl RunCoordinator {
    /// Creates a coordinator. Nothing runs until [`execute`] is called.
    ///
    /// [`execute`]: RunCoordinator::execute
    pub fn new(
        footprint: Footprint,
        pipeline: Pipeline,
        config: RunConfig,
        worker: Arc<dyn WorkerPool>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        Self {
            footprint,
            pipeline: Arc::new(pipeline),
            config,
            worker,
            store,
            cancellation: CancellationToken::new(),
            progress,
        }
    }

    /// A token that cancels the run when triggered: dispatch stops,
    /// in-flight tasks are cancelled, and the run reports `Failed`
    /// with accurate per-tile outcomes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Subscribes to progress snapshots. The receiver always holds the
    /// latest snapshot; the final one carries the terminal counts.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// Runs the pipeline over the footprint to a terminal state.
    ///
    /// # Errors
    ///
    /// [`GraphError`] for partitioning or graph-construction problems,
    /// raised before any task is scheduled. Task failures never surface
    /// here; they are classified into the report's status.
    pub async fn execute(&self) -> Result<RunReport, GraphError> {
        let started = Instant::now();
        info!(
            tile_size = self.config.tile_size,
            margin = self.config.margin,
            stages = self.pipeline.len(),
            "Run initializing"
        );

        let grid = Arc::new(TileGrid::partition(
            self.footprint,
            self.config.tile_size,
            self.config.margin,
        )?);
        let graph = Arc::new(TaskGraph::build(&grid, &self.pipeline)?);

        let mut state = self.initial_state(&grid, &graph);
        if let (Some(path), Some(state)) = (&self.config.state_path, &mut state) {
            if let Err(e) = state.save(path).await {
                // Persistence is advisory; the run itself must not die
                // on a state-file write error.
                warn!(error = %e, path = %path.display(), "Failed to save initial run state");
            }
        }

        let scheduler = Scheduler::new(
            Arc::clone(&grid),
            Arc::clone(&self.pipeline),
            Arc::clone(&graph),
            Arc::clone(&self.worker),
            Arc::clone(&self.store),
            self.config.budget.clone(),
            self.cancellation.clone(),
            self.config.progress_interval,
        );
        let report = scheduler.run(&self.progress).await;

        let counts = count_states(&report.states);
        let status = self.classify(&report, counts);
        let tile_outcomes = tile_outcomes(&grid, &report.states);
        let duration = started.elapsed();

        if let (Some(path), Some(mut state)) = (&self.config.state_path, state) {
            state.status = status;
            state.updated_at = Utc::now();
            state.tasks = report.states.clone();
            state.artifacts = report.artifacts.clone();
            state.counts = counts;
            if let Err(e) = state.save(path).await {
                warn!(error = %e, path = %path.display(), "Failed to save final run state");
            }
        }

        info!(
            status = %status,
            done = counts.done,
            failed = counts.failed,
            skipped = counts.skipped,
            invocations = report.invocations,
            cache_hits = report.cache_hits,
            duration_ms = duration.as_millis() as u64,
            "Run finished"
        );

        Ok(RunReport {
            status,
            tile_outcomes,
            failed_tasks: report.failed_tasks(),
            counts,
            artifacts: report.artifacts,
            invocations: report.invocations,
            cache_hits: report.cache_hits,
            duration,
        })
    }

    fn initial_state(&self, grid: &TileGrid, graph: &TaskGraph) -> Option<RunState> {
        self.config.state_path.as_ref()?;
        let tasks = graph
            .tasks()
            .iter()
            .map(|&t| (t, TaskState::Pending))
            .collect();
        let stages = self
            .pipeline
            .stages()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        Some(RunState::initial(
            self.footprint,
            self.config.tile_size,
            self.config.margin,
            stages,
            grid,
            tasks,
        ))
    }

    fn classify(&self, report: &SchedulerReport, counts: StateCounts) -> RunStatus {
        if report.cancelled {
            return RunStatus::Failed;
        }
        let lost = counts.failed + counts.skipped;
        if lost == 0 {
            return RunStatus::Succeeded;
        }
        let fraction = lost as f64 / counts.total() as f64;
        if fraction <= self.config.failure_tolerance {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failed
        }
    }
}

fn count_states(states: &[(TaskId, TaskState)]) -> StateCounts {
    let mut counts = StateCounts::default();
    for (_, state) in states {
        match state {
            TaskState::Pending => counts.pending += 1,
            TaskState::Ready => counts.ready += 1,
            TaskState::Running => counts.running += 1,
            TaskState::Done => counts.done += 1,
            TaskState::Failed => counts.failed += 1,
            TaskState::Skipped => counts.skipped += 1,
        }
    }
    counts
}

/// Folds per-task states into one outcome per tile. `Failed` wins over
/// `Skipped`, which wins over `Done`.
fn tile_outcomes(grid: &TileGrid, states: &[(TaskId, TaskState)]) -> Vec<(TileId, TileOutcome)> {
    let mut outcomes: BTreeMap<TileId, TileOutcome> = grid
        .tiles()
        .iter()
        .map(|t| (t.id, TileOutcome::Done))
        .collect();

    for (task, state) in states {
        let entry = outcomes.entry(task.tile).or_insert(TileOutcome::Done);
        match state {
            TaskState::Failed => *entry = TileOutcome::Failed,
            TaskState::Skipped if *entry == TileOutcome::Done => *entry = TileOutcome::Skipped,
            _ => {}
        }
    }

    outcomes.into_iter().collect()
}

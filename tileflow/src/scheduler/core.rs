//! The scheduling event loop.
//!
//! A single async loop owns the task table and the ready queue; it is
//! the only place task state changes. Workers run in spawned tasks and
//! report outcomes over an mpsc channel, so completion is awaited
//! cooperatively rather than polled. The loop:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Scheduler                            │
//! │                                                              │
//! │  seed from store ──► ready queue ──► dispatch up to budget   │
//! │         ▲                                    │               │
//! │         │                                    ▼               │
//! │   completion events ◄──── mpsc ◄──── WorkerPool::execute     │
//! │         │                                                    │
//! │         ├── Success: mark Done, promote dependents           │
//! │         ├── Soft failure: backoff + retry while allowed      │
//! │         └── Hard failure / retries out: Failed, skip         │
//! │             every transitive dependent                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use super::policy::{BudgetTracker, ConcurrencyBudget};
use super::queue::ReadyQueue;
use super::table::TaskTable;
use crate::error::TaskError;
use crate::graph::{TaskGraph, TaskId, TaskState};
use crate::grid::TileGrid;
use crate::pipeline::{Pipeline, ResourceClass, Stage};
use crate::run::ProgressSnapshot;
use crate::store::{ArtifactRef, ArtifactStore};
use crate::worker::{TaskAttempt, TaskOutcome, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Completion channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events flowing back into the scheduler loop.
enum Event {
    /// A worker finished an attempt.
    Completed {
        task: TaskId,
        class: ResourceClass,
        outcome: TaskOutcome,
    },
    /// A retry backoff elapsed.
    RetryDue { task: TaskId },
}

/// Final accounting handed to the run coordinator.
#[derive(Debug)]
pub struct SchedulerReport {
    /// Final state of every task, sorted by id.
    pub states: Vec<(TaskId, TaskState)>,
    /// Artifact refs of every completed task.
    pub artifacts: Vec<ArtifactRef>,
    /// Worker dispatches performed (excludes cache hits).
    pub invocations: u64,
    /// Tasks seeded pre-`Done` from the artifact store.
    pub cache_hits: u64,
    /// Whether the run was cancelled before completion.
    pub cancelled: bool,
}

impl SchedulerReport {
    /// Tasks that ended `Failed`.
    pub fn failed_tasks(&self) -> Vec<TaskId> {
        self.states
            .iter()
            .filter(|(_, s)| *s == TaskState::Failed)
            .map(|(t, _)| *t)
            .collect()
    }
}

/// Drives one run's task graph to a terminal state.
pub struct Scheduler {
    grid: Arc<TileGrid>,
    pipeline: Arc<Pipeline>,
    graph: Arc<TaskGraph>,
    worker: Arc<dyn WorkerPool>,
    store: Arc<dyn ArtifactStore>,
    budget: ConcurrencyBudget,
    cancellation: CancellationToken,
    progress_interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler over an already-validated graph.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grid: Arc<TileGrid>,
        pipeline: Arc<Pipeline>,
        graph: Arc<TaskGraph>,
        worker: Arc<dyn WorkerPool>,
        store: Arc<dyn ArtifactStore>,
        budget: ConcurrencyBudget,
        cancellation: CancellationToken,
        progress_interval: Duration,
    ) -> Self {
        Self {
            grid,
            pipeline,
            graph,
            worker,
            store,
            budget,
            cancellation,
            progress_interval,
        }
    }

    /// Runs the graph to completion (or cancellation), publishing
    /// progress snapshots on `progress`.
    pub async fn run(&self, progress: &watch::Sender<ProgressSnapshot>) -> SchedulerReport {
        let mut table = TaskTable::new(&self.graph);
        let mut queue = ReadyQueue::new();
        let mut tracker = BudgetTracker::new(self.budget.clone());
        let (tx, mut rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);

        let mut invocations: u64 = 0;
        let mut cancelled = false;

        let cache_hits = self.seed_from_store(&mut table).await;
        self.promote_initial_ready(&mut table, &mut queue);

        info!(
            tasks = self.graph.len(),
            cache_hits,
            budget = self.budget.max_total(),
            "Scheduler starting"
        );

        let _ = progress.send(ProgressSnapshot::new(table.counts()));
        let mut ticker = tokio::time::interval(self.progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if !cancelled {
                self.dispatch_ready(&mut queue, &mut tracker, &mut table, &tx, &mut invocations);
            }

            if table.all_terminal() && tracker.in_flight() == 0 {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancellation.cancelled(), if !cancelled => {
                    info!("Run cancelled - stopping dispatch, draining in-flight tasks");
                    cancelled = true;
                    queue.clear();
                }

                Some(event) = rx.recv() => {
                    self.handle_event(event, cancelled, &mut table, &mut queue, &mut tracker, &tx);
                }

                _ = ticker.tick() => {
                    let _ = progress.send(ProgressSnapshot::new(table.counts()));
                }
            }

            // Once dispatch has stopped and in-flight work has drained,
            // everything left is unreachable: report it as skipped.
            if cancelled && tracker.in_flight() == 0 {
                for task in table.non_terminal() {
                    table.set_state(task, TaskState::Skipped);
                }
            }
        }

        let counts = table.counts();
        let _ = progress.send(ProgressSnapshot::new(counts));
        info!(
            done = counts.done,
            failed = counts.failed,
            skipped = counts.skipped,
            invocations,
            cache_hits,
            "Scheduler finished"
        );

        SchedulerReport {
            states: table.final_states(),
            artifacts: table.artifacts(),
            invocations,
            cache_hits,
            cancelled,
        }
    }

    /// Marks every task whose artifact already exists as `Done`
    /// without invoking its processing function.
    async fn seed_from_store(&self, table: &mut TaskTable) -> u64 {
        let mut cache_hits = 0u64;
        for &task in self.graph.tasks() {
            let Some(stage) = self.pipeline.stage(task.stage) else {
                continue;
            };
            if let Some(artifact) = self.store.lookup(task.tile, stage.name()).await {
                table.set_state(task, TaskState::Done);
                table.set_artifact(task, artifact);
                cache_hits += 1;
            }
        }
        if cache_hits > 0 {
            info!(cache_hits, "Seeded completed tasks from artifact store");
        }
        cache_hits
    }

    /// Recomputes dependency counts after seeding and queues every
    /// task with no unfinished dependencies.
    fn promote_initial_ready(&self, table: &mut TaskTable, queue: &mut ReadyQueue) {
        for &task in self.graph.tasks() {
            if table.state(task) == TaskState::Done {
                continue;
            }
            let remaining = self
                .graph
                .dependencies(task)
                .iter()
                .filter(|&&dep| table.state(dep) != TaskState::Done)
                .count();
            table.set_remaining_deps(task, remaining);
            if remaining == 0 {
                table.set_state(task, TaskState::Ready);
                queue.push(task, self.graph.height(task), self.class_of(task));
            }
        }
    }

    /// Dispatches ready tasks until the queue or the budget runs out.
    fn dispatch_ready(
        &self,
        queue: &mut ReadyQueue,
        tracker: &mut BudgetTracker,
        table: &mut TaskTable,
        tx: &mpsc::Sender<Event>,
        invocations: &mut u64,
    ) {
        let mut deferred = Vec::new();

        while !queue.is_empty() && tracker.in_flight() < self.budget.max_total() {
            let Some(entry) = queue.pop() else {
                break;
            };
            // Stale entries: the task was skipped after a dependency
            // failure while it sat in the queue.
            if table.state(entry.task) != TaskState::Ready {
                continue;
            }
            if !tracker.can_dispatch(entry.class) {
                deferred.push(entry);
                continue;
            }

            match self.build_attempt(entry.task, table) {
                Ok(attempt) => {
                    tracker.acquire(entry.class);
                    table.set_state(entry.task, TaskState::Running);
                    *invocations += 1;

                    let worker = Arc::clone(&self.worker);
                    let tx = tx.clone();
                    let task = entry.task;
                    let class = entry.class;
                    tokio::spawn(async move {
                        let outcome = worker.execute(attempt).await;
                        let _ = tx.send(Event::Completed { task, class, outcome }).await;
                    });
                }
                Err(err) => {
                    // A dependency artifact went missing between its
                    // completion and this dispatch. Unrecoverable.
                    self.fail_task(entry.task, &err, table);
                }
            }
        }

        for entry in deferred {
            queue.requeue(entry);
        }
    }

    /// Assembles a [`TaskAttempt`] from the graph, grid, and pipeline.
    fn build_attempt(&self, task: TaskId, table: &mut TaskTable) -> Result<TaskAttempt, TaskError> {
        let stage = self
            .pipeline
            .stage(task.stage)
            .ok_or_else(|| TaskError::new(format!("unknown stage {}", task.stage)))?;
        let tile = self
            .grid
            .tile(task.tile)
            .ok_or_else(|| TaskError::new(format!("unknown tile {}", task.tile)))?
            .clone();

        let mut inputs = Vec::new();
        for dep in self.graph.dependencies(task) {
            let artifact = table
                .artifact(dep)
                .cloned()
                .ok_or_else(|| TaskError::missing_input(dep))?;
            inputs.push((dep, artifact));
        }

        let attempt_number = table.record_attempt(task);
        Ok(TaskAttempt {
            task,
            tile,
            stage: task.stage,
            stage_name: stage.name().to_string(),
            attempt: attempt_number,
            timeout: stage.timeout(),
            process: stage.process(),
            inputs,
            cancellation: self.cancellation.clone(),
        })
    }

    fn handle_event(
        &self,
        event: Event,
        cancelled: bool,
        table: &mut TaskTable,
        queue: &mut ReadyQueue,
        tracker: &mut BudgetTracker,
        tx: &mpsc::Sender<Event>,
    ) {
        match event {
            Event::Completed { task, class, outcome } => {
                tracker.release(class);
                match outcome {
                    TaskOutcome::Success(artifact) => {
                        self.complete_task(task, artifact, cancelled, table, queue);
                    }
                    TaskOutcome::SoftFailure(err) => {
                        self.handle_soft_failure(task, err, cancelled, table, tx);
                    }
                    TaskOutcome::HardFailure(err) => {
                        self.fail_task(task, &err, table);
                    }
                    TaskOutcome::Cancelled => {
                        table.set_state(task, TaskState::Skipped);
                    }
                }
            }
            Event::RetryDue { task } => {
                if !cancelled && table.state(task) == TaskState::Pending {
                    table.set_state(task, TaskState::Ready);
                    queue.push(task, self.graph.height(task), self.class_of(task));
                }
            }
        }
    }

    fn complete_task(
        &self,
        task: TaskId,
        artifact: ArtifactRef,
        cancelled: bool,
        table: &mut TaskTable,
        queue: &mut ReadyQueue,
    ) {
        debug!(task = %task, "Task done");
        table.set_state(task, TaskState::Done);
        table.set_artifact(task, artifact);

        for dependent in self.graph.dependents(task) {
            let remaining = table.satisfy_dependency(dependent);
            if remaining == 0 && table.state(dependent) == TaskState::Pending && !cancelled {
                table.set_state(dependent, TaskState::Ready);
                queue.push(dependent, self.graph.height(dependent), self.class_of(dependent));
            }
        }
    }

    fn handle_soft_failure(
        &self,
        task: TaskId,
        err: TaskError,
        cancelled: bool,
        table: &mut TaskTable,
        tx: &mpsc::Sender<Event>,
    ) {
        if cancelled {
            table.set_state(task, TaskState::Skipped);
            return;
        }

        let attempts = table.attempts(task);
        let retry = self
            .pipeline
            .stage(task.stage)
            .map(Stage::retry)
            .cloned()
            .unwrap_or_default();

        match retry.delay_for_attempt(attempts) {
            Some(delay) => {
                warn!(
                    task = %task,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient task failure - retrying after backoff"
                );
                // Pending with zero remaining deps = waiting out backoff.
                table.set_state(task, TaskState::Pending);
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::RetryDue { task }).await;
                });
            }
            None => {
                warn!(task = %task, attempts, "Retries exhausted");
                self.fail_task(task, &err, table);
            }
        }
    }

    /// Marks a task `Failed` and every transitive dependent `Skipped`.
    /// Tasks independent of the failure are untouched.
    fn fail_task(&self, task: TaskId, err: &TaskError, table: &mut TaskTable) {
        warn!(task = %task, error = %err, "Task failed permanently");
        table.set_state(task, TaskState::Failed);

        for dependent in self.graph.transitive_dependents(task) {
            if !table.state(dependent).is_terminal() {
                table.set_state(dependent, TaskState::Skipped);
            }
        }
    }

    fn class_of(&self, task: TaskId) -> ResourceClass {
        self.pipeline
            .stage(task.stage)
            .map(Stage::resource_class)
            .unwrap_or(ResourceClass::Cpu)
    }
}

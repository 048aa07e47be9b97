//! The task status table.
//!
//! The single mutable record of every task's lifecycle. Owned
//! exclusively by the scheduler loop; workers never touch it, they
//! only report outcomes.

use crate::graph::{TaskGraph, TaskId, TaskState};
use crate::store::ArtifactRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-state task counts, snapshot into progress events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Tasks waiting on dependencies (or on retry backoff).
    pub pending: usize,
    /// Tasks queued for dispatch.
    pub ready: usize,
    /// Tasks in flight.
    pub running: usize,
    /// Completed tasks.
    pub done: usize,
    /// Hard-failed or retry-exhausted tasks.
    pub failed: usize,
    /// Tasks skipped because an upstream task failed.
    pub skipped: usize,
}

impl StateCounts {
    /// Total tasks across all states.
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.done + self.failed + self.skipped
    }

    /// Tasks in a terminal state.
    pub fn terminal(&self) -> usize {
        self.done + self.failed + self.skipped
    }
}

#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub state: TaskState,
    /// Attempts dispatched so far.
    pub attempts: u32,
    /// Dependencies not yet `Done`.
    pub remaining_deps: usize,
    /// Artifact of the successful attempt.
    pub artifact: Option<ArtifactRef>,
}

/// Status and bookkeeping for every task in the run.
#[derive(Debug)]
pub(crate) struct TaskTable {
    entries: HashMap<TaskId, TaskEntry>,
    counts: StateCounts,
}

impl TaskTable {
    /// Creates a table with every task `Pending` and its dependency
    /// count taken from the graph.
    pub fn new(graph: &TaskGraph) -> Self {
        let mut entries = HashMap::with_capacity(graph.len());
        for &task in graph.tasks() {
            entries.insert(
                task,
                TaskEntry {
                    state: TaskState::Pending,
                    attempts: 0,
                    remaining_deps: graph.dependency_count(task),
                    artifact: None,
                },
            );
        }
        let counts = StateCounts {
            pending: entries.len(),
            ..StateCounts::default()
        };
        Self { entries, counts }
    }

    pub fn state(&self, task: TaskId) -> TaskState {
        self.entries[&task].state
    }

    pub fn set_state(&mut self, task: TaskId, state: TaskState) {
        let entry = self.entries.get_mut(&task).expect("task in table");
        Self::adjust(&mut self.counts, entry.state, -1);
        entry.state = state;
        Self::adjust(&mut self.counts, state, 1);
    }

    pub fn attempts(&self, task: TaskId) -> u32 {
        self.entries[&task].attempts
    }

    pub fn record_attempt(&mut self, task: TaskId) -> u32 {
        let entry = self.entries.get_mut(&task).expect("task in table");
        entry.attempts += 1;
        entry.attempts
    }

    pub fn artifact(&self, task: TaskId) -> Option<&ArtifactRef> {
        self.entries[&task].artifact.as_ref()
    }

    pub fn set_artifact(&mut self, task: TaskId, artifact: ArtifactRef) {
        self.entries.get_mut(&task).expect("task in table").artifact = Some(artifact);
    }

    /// Decrements a dependent's remaining-dependency count, returning
    /// the new value.
    pub fn satisfy_dependency(&mut self, task: TaskId) -> usize {
        let entry = self.entries.get_mut(&task).expect("task in table");
        entry.remaining_deps = entry.remaining_deps.saturating_sub(1);
        entry.remaining_deps
    }

    #[cfg(test)]
    pub fn remaining_deps(&self, task: TaskId) -> usize {
        self.entries[&task].remaining_deps
    }

    /// Overwrites a task's remaining-dependency count. Used after
    /// store seeding, when some dependencies start out `Done`.
    pub fn set_remaining_deps(&mut self, task: TaskId, remaining: usize) {
        self.entries
            .get_mut(&task)
            .expect("task in table")
            .remaining_deps = remaining;
    }

    pub fn counts(&self) -> StateCounts {
        self.counts
    }

    /// True when every task is `Done`, `Failed`, or `Skipped`.
    pub fn all_terminal(&self) -> bool {
        self.counts.terminal() == self.counts.total()
    }

    /// Final (task, state) pairs, sorted for deterministic reporting.
    pub fn final_states(&self) -> Vec<(TaskId, TaskState)> {
        let mut states: Vec<_> = self.entries.iter().map(|(&t, e)| (t, e.state)).collect();
        states.sort_by_key(|(t, _)| *t);
        states
    }

    /// Artifact refs of every completed task.
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        let mut refs: Vec<_> = self
            .entries
            .values()
            .filter_map(|e| e.artifact.clone())
            .collect();
        refs.sort_by(|a, b| (a.tile, &a.stage).cmp(&(b.tile, &b.stage)));
        refs
    }

    /// Tasks currently not in a terminal state, sorted.
    pub fn non_terminal(&self) -> Vec<TaskId> {
        let mut tasks: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.state.is_terminal())
            .map(|(&t, _)| t)
            .collect();
        tasks.sort();
        tasks
    }

    fn adjust(counts: &mut StateCounts, state: TaskState, delta: isize) {
        let slot = match state {
            TaskState::Pending => &mut counts.pending,
            TaskState::Ready => &mut counts.ready,
            TaskState::Running => &mut counts.running,
            TaskState::Done => &mut counts.done,
            TaskState::Failed => &mut counts.failed,
            TaskState::Skipped => &mut counts.skipped,
        };
        *slot = slot.saturating_add_signed(delta);
    }
}

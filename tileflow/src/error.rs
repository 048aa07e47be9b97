//! Crate-wide error taxonomy.
//!
//! Errors fall into three tiers with different blast radii:
//!
//! - [`GraphError`]: graph-definition problems (cycles, bad stage
//!   declarations, empty footprints). Fatal: detected before any
//!   scheduling starts and abort the run immediately.
//! - [`TaskError`]: per-task execution failures. Contained by the
//!   scheduler; a transient error is retried under the task's retry
//!   policy, a permanent one fails the task and skips its dependents.
//! - [`StoreError`]: artifact store I/O. Write errors surface as
//!   transient task failures (retryable); a checksum mismatch on a
//!   previously completed artifact is corruption and is never retried.

use crate::graph::TaskId;
use crate::grid::TileId;
use thiserror::Error;

/// Fatal errors raised while partitioning the footprint or building
/// the task graph. Any of these aborts the run before scheduling.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The pipeline definition contains no stages.
    #[error("pipeline has no stages")]
    EmptyPipeline,

    /// Two stages share a name.
    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    /// The first stage declared a dependency on a preceding stage.
    #[error("stage '{0}' at index 0 cannot consume a previous stage")]
    FirstStageDependency(String),

    /// The footprint or tile size is degenerate.
    #[error("invalid partition geometry: {0}")]
    InvalidGeometry(String),

    /// The dependency graph contains a cycle. This can only be caused
    /// by a stage-definition bug and is checked before scheduling.
    #[error("task graph contains a cycle involving {0}")]
    Cycle(TaskId),

    /// A dependency edge referenced a task that was never created.
    #[error("unknown task referenced while building graph: {0}")]
    UnknownTask(TaskId),
}

/// Error produced by a task's processing function or its execution
/// environment (timeout, preemption, panic).
///
/// The `transient` flag distinguishes soft failures (worth retrying)
/// from hard failures (malformed input, logic errors).
#[derive(Debug)]
pub struct TaskError {
    message: String,
    transient: bool,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    /// Creates a permanent (non-retryable) error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    /// Creates a transient (retryable) error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            source: None,
        }
    }

    /// Creates an error for a dependency artifact that could not be
    /// resolved when the task was dispatched.
    pub fn missing_input(task: TaskId) -> Self {
        Self::new(format!("missing input artifact from {task}"))
    }

    /// Attaches a source error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns true if this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &_)
    }
}

/// Errors raised by an artifact store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure. Treated as transient for writes.
    #[error("artifact store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A completed artifact's content no longer matches its checksum.
    /// Retrying cannot fix this; it is surfaced to the coordinator.
    #[error("artifact for tile {tile} stage '{stage}' is corrupt")]
    Corrupt {
        /// Tile whose artifact failed verification.
        tile: TileId,
        /// Stage name of the corrupt artifact.
        stage: String,
    },

    /// Lookup of an artifact that was never stored.
    #[error("no artifact for tile {tile} stage '{stage}'")]
    NotFound {
        /// Tile that was queried.
        tile: TileId,
        /// Stage name that was queried.
        stage: String,
    },

    /// A second write was attempted for a completed (tile, stage) key.
    /// Keys are write-once for the lifetime of a run.
    #[error("artifact for tile {tile} stage '{stage}' already exists")]
    AlreadyExists {
        /// Tile of the rejected write.
        tile: TileId,
        /// Stage name of the rejected write.
        stage: String,
    },
}

impl StoreError {
    /// Converts a store error into the task-level error that the
    /// scheduler understands: I/O is transient, corruption is not.
    pub fn into_task_error(self) -> TaskError {
        match &self {
            StoreError::Io(_) => TaskError::transient(self.to_string()).with_source(self),
            _ => TaskError::new(self.to_string()).with_source(self),
        }
    }
}

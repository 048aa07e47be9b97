//! The processing-function contract.
//!
//! The engine treats photogrammetric work (resampling, matching,
//! triangulation, rasterization) as opaque callables behind the
//! [`ProcessFn`] trait. A processing function receives its tile's
//! geometry and the artifacts of its declared dependencies, and either
//! produces one artifact payload or fails with a classified
//! [`TaskError`] (transient → retried, permanent → not).
//!
//! The trait is dyn-compatible via `Pin<Box<dyn Future>>` so stages can
//! hold `Arc<dyn ProcessFn>` resolved once at graph-build time.

use crate::error::TaskError;
use crate::graph::TaskId;
use crate::grid::{Tile, TileId};
use crate::pipeline::StageId;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// One resolved dependency artifact handed to a processing function.
#[derive(Clone, Debug)]
pub struct ProcessInput {
    /// The upstream task that produced this artifact.
    pub task: TaskId,
    /// The artifact payload.
    pub data: Bytes,
}

/// Everything a processing function may observe about its task.
///
/// Inputs are resolved from the artifact store by the worker pool
/// before the function runs; a task is never dispatched until every
/// dependency is `Done` and retrievable.
pub struct ProcessContext {
    /// Geometry of the tile being processed.
    pub tile: Tile,
    /// The stage being executed.
    pub stage: StageId,
    /// Stage name, for logging.
    pub stage_name: String,
    /// 1-based attempt number (1 is the first attempt).
    pub attempt: u32,
    /// Dependency artifacts in deterministic (tile, stage) order.
    pub inputs: Vec<ProcessInput>,
    /// Cooperative cancellation for long-running functions.
    pub cancellation: CancellationToken,
}

impl ProcessContext {
    /// Looks up the input produced by a specific upstream task.
    pub fn input_from(&self, tile: TileId, stage: StageId) -> Option<&Bytes> {
        self.inputs
            .iter()
            .find(|i| i.task.tile == tile && i.task.stage == stage)
            .map(|i| &i.data)
    }

    /// Returns true if the run is being cancelled. Long-running
    /// functions should check this periodically.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("tile", &self.tile.id)
            .field("stage", &self.stage_name)
            .field("attempt", &self.attempt)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

/// An opaque per-stage processing function.
///
/// Implementations must classify their failures: a transient error
/// (`TaskError::transient`) is retried under the stage's retry policy,
/// a permanent one fails the task and skips its dependents.
pub trait ProcessFn: Send + Sync + 'static {
    /// Runs the function for one task attempt.
    fn run<'a>(
        &'a self,
        ctx: &'a ProcessContext,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, TaskError>> + Send + 'a>>;
}

/// Adapter so closures can serve as processing functions in tests and
/// simple pipelines.
impl<F> ProcessFn for F
where
    F: Fn(&ProcessContext) -> Result<Bytes, TaskError> + Send + Sync + 'static,
{
    fn run<'a>(
        &'a self,
        ctx: &'a ProcessContext,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, TaskError>> + Send + 'a>> {
        let result = self(ctx);
        Box::pin(async move { result })
    }
}

//! Tileflow - tiled, dependency-driven execution for photogrammetric
//! pipelines.
//!
//! A large output footprint is partitioned into tiles, an ordered
//! pipeline of stages is expanded into one task per (tile, stage), and
//! the resulting dependency graph is driven to completion over a local
//! or cluster worker pool, with every intermediate artifact persisted
//! for restart-by-cache-hit.
//!
//! ```text
//! Footprint ──► grid ──► graph ──► scheduler ⇄ worker ⇄ store
//!                                      │
//!                                 run coordinator
//!                            (progress, status, report)
//! ```
//!
//! The photogrammetric math itself is out of scope: stages carry
//! opaque [`ProcessFn`](pipeline::ProcessFn) implementations supplied
//! by the caller.

pub mod error;
pub mod graph;
pub mod grid;
pub mod logging;
pub mod pipeline;
pub mod run;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use error::{GraphError, StoreError, TaskError};
pub use graph::{TaskGraph, TaskId, TaskState};
pub use grid::{Footprint, Rect, Tile, TileGrid, TileId};
pub use pipeline::{DependencyPattern, Pipeline, ProcessContext, ProcessFn, ResourceClass, Stage, StageId};
pub use run::{ProgressSnapshot, RunConfig, RunCoordinator, RunReport, RunStatus, TileOutcome};
pub use scheduler::{ConcurrencyBudget, RetryPolicy};
pub use store::{ArtifactRef, ArtifactStore, DiskArtifactStore, MemoryArtifactStore};
pub use worker::{ClusterClient, ClusterWorkerPool, LocalWorkerPool, TaskOutcome, WorkerPool};

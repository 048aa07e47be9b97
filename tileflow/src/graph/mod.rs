//! The task dependency graph.
//!
//! One task per (tile, stage) pair, with edges derived from each
//! stage's [`DependencyPattern`](crate::pipeline::DependencyPattern).
//! The graph is built once per run, validated acyclic before any
//! scheduling begins, and never mutated afterwards. Task *status*
//! lives in the scheduler's table, not here.

mod builder;
mod task;

pub use builder::TaskGraph;
pub use task::{TaskId, TaskState};

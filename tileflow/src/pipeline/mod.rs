//! Pipeline definition: ordered stages and the processing-function
//! contract.
//!
//! A pipeline is an ordered list of [`Stage`]s. Each stage names an
//! opaque [`ProcessFn`] (the engine never looks inside it), declares
//! how its tasks depend on upstream work, and carries the execution
//! hints the scheduler needs: resource class, wall-clock timeout, and
//! retry policy.
//!
//! # Dependency patterns
//!
//! - [`DependencyPattern::Root`]: no dependencies. Only valid for the
//!   first stage.
//! - [`DependencyPattern::Sequential`]: the previous stage's task on
//!   the same tile.
//! - [`DependencyPattern::Margin`]: the previous stage on the same
//!   tile plus the previous stage on every tile whose core intersects
//!   this tile's margin. Margin stages consume *upstream* neighbor
//!   outputs; same-stage neighbor edges would make adjacent tiles
//!   mutually dependent.
//!
//! # Example
//!
//! ```ignore
//! use tileflow::pipeline::{Pipeline, Stage, DependencyPattern};
//!
//! let pipeline = Pipeline::builder()
//!     .stage(Stage::new("resample", DependencyPattern::Root, resample_fn))
//!     .stage(Stage::new("match", DependencyPattern::Sequential, match_fn))
//!     .stage(Stage::new("triangulate", DependencyPattern::Sequential, tri_fn))
//!     .stage(Stage::new("rasterize", DependencyPattern::Margin, raster_fn))
//!     .build()?;
//! ```

mod process;
mod stage;

pub use process::{ProcessContext, ProcessFn, ProcessInput};
pub use stage::{DependencyPattern, Pipeline, PipelineBuilder, ResourceClass, Stage, StageId};

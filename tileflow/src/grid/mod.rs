//! Tile partitioning for the output footprint.
//!
//! The partitioner divides a rectangular footprint into a regular grid
//! of [`Tile`]s. Each tile has a *core* region (the grid exactly tiles
//! the footprint: no gaps, no core overlap) and a *processing* region
//! (the core expanded by the margin width and clipped to the footprint)
//! used by stages that consume neighbor data.
//!
//! Partitioning is deterministic: identical inputs produce identical
//! tile ids and bounds, which is what makes restart-by-cache-hit work.
//!
//! # Example
//!
//! ```ignore
//! use tileflow::grid::{Footprint, TileGrid};
//!
//! let footprint = Footprint::new(0.0, 0.0, 1000.0, 800.0)?;
//! let grid = TileGrid::partition(footprint, 100.0, 10.0)?;
//!
//! assert_eq!(grid.rows(), 8);
//! assert_eq!(grid.cols(), 10);
//! ```

mod footprint;
mod partitioner;

pub use footprint::{Footprint, Rect};
pub use partitioner::{Tile, TileGrid, TileId};

//! Deterministic grid partitioning of a footprint into tiles.

use super::footprint::{Footprint, Rect};
use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid coordinates of a tile within the partition.
///
/// Row 0 is the southernmost row, column 0 the westernmost column.
/// Ids are stable across runs for identical partition inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    /// Grid row (south to north).
    pub row: u32,
    /// Grid column (west to east).
    pub col: u32,
}

impl TileId {
    /// Creates a tile id from grid coordinates.
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// One tile of the partition.
///
/// Geometry is immutable after the partitioner creates it; task status
/// lives in the scheduler's task table, never here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tile {
    /// Grid coordinates.
    pub id: TileId,
    /// Core region. Cores exactly tile the footprint.
    pub core: Rect,
    /// Processing region: core expanded by the margin, clipped to the
    /// footprint. Edge tiles get clipped margins.
    pub processing: Rect,
}

/// The full set of tiles covering a footprint.
///
/// Produced once at run start by [`TileGrid::partition`]; read-only
/// afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileGrid {
    footprint: Footprint,
    tile_size: f64,
    margin: f64,
    rows: u32,
    cols: u32,
    tiles: Vec<Tile>,
}

impl TileGrid {
    /// Partitions `footprint` into a grid of tiles of side `tile_size`
    /// with an overlap margin of `margin` map units.
    ///
    /// The last row and column absorb the remainder, so edge tiles may
    /// be smaller than `tile_size` but are never empty. Margins are
    /// clipped at the footprint boundary rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidGeometry`] for non-positive tile
    /// size or negative margin.
    pub fn partition(footprint: Footprint, tile_size: f64, margin: f64) -> Result<Self, GraphError> {
        if tile_size <= 0.0 || !tile_size.is_finite() {
            return Err(GraphError::InvalidGeometry(format!(
                "tile size must be positive, got {tile_size}"
            )));
        }
        if margin < 0.0 || !margin.is_finite() {
            return Err(GraphError::InvalidGeometry(format!(
                "margin must be non-negative, got {margin}"
            )));
        }

        let bounds = *footprint.bounds();
        let cols = (bounds.width() / tile_size).ceil() as u32;
        let rows = (bounds.height() / tile_size).ceil() as u32;

        let mut tiles = Vec::with_capacity((rows * cols) as usize);
        for row in 0..rows {
            for col in 0..cols {
                // Both sides of a shared edge are computed from the
                // same expression so neighbors agree bitwise; edge
                // tiles are clipped to the footprint extent.
                let core = Rect::new(
                    bounds.min_x + col as f64 * tile_size,
                    bounds.min_y + row as f64 * tile_size,
                    (bounds.min_x + (col + 1) as f64 * tile_size).min(bounds.max_x),
                    (bounds.min_y + (row + 1) as f64 * tile_size).min(bounds.max_y),
                );
                let processing = core.expand(margin).clip(&bounds);

                tiles.push(Tile {
                    id: TileId::new(row, col),
                    core,
                    processing,
                });
            }
        }

        Ok(Self {
            footprint,
            tile_size,
            margin,
            rows,
            cols,
            tiles,
        })
    }

    /// Number of grid rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of grid columns.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Total number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns true if the grid contains no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// The partition's margin width.
    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// The footprint this grid covers.
    pub fn footprint(&self) -> &Footprint {
        &self.footprint
    }

    /// Tiles in row-major order (deterministic iteration order).
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Looks up a tile by id.
    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        if id.row >= self.rows || id.col >= self.cols {
            return None;
        }
        self.tiles.get((id.row * self.cols + id.col) as usize)
    }

    /// Returns the tiles whose core intersects `id`'s margin strip.
    ///
    /// Neighbors that would fall outside the footprint simply do not
    /// exist; boundary tiles legitimately have fewer neighbors.
    pub fn margin_neighbors(&self, id: TileId) -> Vec<TileId> {
        let Some(tile) = self.tile(id) else {
            return Vec::new();
        };
        if self.margin == 0.0 {
            return Vec::new();
        }

        // Margin never exceeds one tile in practice, but scan the full
        // candidate window geometrically so larger margins stay correct.
        let reach = (self.margin / self.tile_size).ceil() as i64;
        let mut neighbors = Vec::new();
        for dr in -reach..=reach {
            for dc in -reach..=reach {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let row = id.row as i64 + dr;
                let col = id.col as i64 + dc;
                if row < 0 || col < 0 || row >= self.rows as i64 || col >= self.cols as i64 {
                    continue;
                }
                let other = TileId::new(row as u32, col as u32);
                if let Some(candidate) = self.tile(other) {
                    if candidate.core.intersects(&tile.processing) {
                        neighbors.push(other);
                    }
                }
            }
        }
        neighbors
    }
}

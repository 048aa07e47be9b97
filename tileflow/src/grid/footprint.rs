//! Rectangle and footprint geometry in map units.

use crate::error::GraphError;
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in map units.
///
/// Used both for tile core/processing bounds and for the overall
/// footprint. Coordinates follow the usual convention: `x` grows
/// east, `y` grows north.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Western edge.
    pub min_x: f64,
    /// Southern edge.
    pub min_y: f64,
    /// Eastern edge.
    pub max_x: f64,
    /// Northern edge.
    pub max_y: f64,
}

impl Rect {
    /// Creates a rectangle from its corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width along the x axis.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height along the y axis.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Returns this rectangle expanded by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Rect {
        Rect::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }

    /// Returns this rectangle clipped to `bounds`.
    pub fn clip(&self, bounds: &Rect) -> Rect {
        Rect::new(
            self.min_x.max(bounds.min_x),
            self.min_y.max(bounds.min_y),
            self.max_x.min(bounds.max_x),
            self.max_y.min(bounds.max_y),
        )
    }

    /// Returns true if the interiors of the two rectangles overlap.
    ///
    /// Shared edges do not count as intersection: two adjacent tile
    /// cores touch but do not overlap.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Returns true if the rectangle has positive area.
    pub fn is_valid(&self) -> bool {
        self.max_x > self.min_x && self.max_y > self.min_y
    }
}

/// The rectangular output footprint of a run.
///
/// Validated at construction so the partitioner can assume positive
/// extents.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Footprint(Rect);

impl Footprint {
    /// Creates a footprint from corner coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidGeometry`] if the rectangle has
    /// non-positive width or height.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, GraphError> {
        let rect = Rect::new(min_x, min_y, max_x, max_y);
        if !rect.is_valid() {
            return Err(GraphError::InvalidGeometry(format!(
                "footprint has non-positive extent: {}x{}",
                rect.width(),
                rect.height()
            )));
        }
        Ok(Self(rect))
    }

    /// The footprint rectangle.
    pub fn bounds(&self) -> &Rect {
        &self.0
    }
}

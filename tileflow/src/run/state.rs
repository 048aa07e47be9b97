//! Persisted run state.
//!
//! One JSON document per run: the tile geometry table, the task status
//! table, and the artifact index. Written atomically (tmp + rename) at
//! run start and again at completion, so the file is inspectable after
//! process termination. Restart itself is driven by artifact-store
//! cache hits, never by this file; re-running with identical inputs
//! reconstructs identical tile and task identities from the footprint.

use super::RunStatus;
use crate::graph::{TaskId, TaskState};
use crate::grid::{Footprint, Tile, TileGrid};
use crate::scheduler::StateCounts;
use crate::store::ArtifactRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Layout version, bumped on incompatible changes to this document.
pub const RUN_STATE_VERSION: u32 = 1;

/// Snapshot of one run, durable across process termination.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunState {
    /// Document layout version.
    pub version: u32,
    /// Lifecycle status at the time of the write.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When this document was last written.
    pub updated_at: DateTime<Utc>,
    /// The footprint the grid was partitioned from.
    pub footprint: Footprint,
    /// Target tile size in map units.
    pub tile_size: f64,
    /// Margin width in map units.
    pub margin: f64,
    /// Stage names in pipeline order.
    pub stages: Vec<String>,
    /// Tile geometry table.
    pub tiles: Vec<Tile>,
    /// Task status table, sorted by task id.
    pub tasks: Vec<(TaskId, TaskState)>,
    /// Artifact index of every completed task.
    pub artifacts: Vec<ArtifactRef>,
    /// Task counts per state.
    pub counts: StateCounts,
}

impl RunState {
    /// Initial state for a freshly partitioned run: every task
    /// `Pending`, no artifacts.
    pub fn initial(
        footprint: Footprint,
        tile_size: f64,
        margin: f64,
        stages: Vec<String>,
        grid: &TileGrid,
        tasks: Vec<(TaskId, TaskState)>,
    ) -> Self {
        let now = Utc::now();
        let counts = StateCounts {
            pending: tasks.len(),
            ..StateCounts::default()
        };
        Self {
            version: RUN_STATE_VERSION,
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            footprint,
            tile_size,
            margin,
            stages,
            tiles: grid.tiles().to_vec(),
            tasks,
            artifacts: Vec::new(),
            counts,
        }
    }

    /// Writes the document atomically: the JSON lands in a `.tmp`
    /// sibling and is renamed into place, so a crash mid-write leaves
    /// either the previous document or none at all.
    pub async fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), status = ?self.status, "Run state saved");
        Ok(())
    }

    /// Loads a previously saved document.
    pub async fn load(path: &Path) -> Result<Self, std::io::Error> {
        let raw = fs::read(path).await?;
        serde_json::from_slice(&raw).map_err(std::io::Error::other)
    }
}

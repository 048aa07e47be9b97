//! Run lifecycle: coordination, progress, and persisted state.
//!
//! ```text
//! RunCoordinator::execute()
//!   ├── partition footprint ─► TileGrid
//!   ├── build task graph    ─► TaskGraph (graph errors abort here)
//!   ├── save initial RunState
//!   ├── drive Scheduler     ─► SchedulerReport
//!   │     └── ProgressSnapshot ─► watch channel ─► subscribers
//!   ├── classify status, fold per-tile outcomes
//!   └── save final RunState ─► RunReport
//! ```

mod coordinator;
mod progress;
mod state;

pub use coordinator::{
    RunConfig, RunCoordinator, RunReport, RunStatus, TileOutcome, DEFAULT_PROGRESS_INTERVAL,
};
pub use progress::ProgressSnapshot;
pub use state::{RunState, RUN_STATE_VERSION};

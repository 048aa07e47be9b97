//! Task scheduling: policies, the ready queue, and the event loop.
//!
//! All task state lives in one table owned by one async loop; workers
//! only ever report outcomes back over a channel. That single
//! synchronization point keeps the dependency bookkeeping free of
//! locks and race conditions by construction.

mod core;
mod policy;
mod queue;
mod table;

pub use self::core::{Scheduler, SchedulerReport};
pub use policy::{
    ConcurrencyBudget, RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS,
    DEFAULT_MAX_DELAY_SECS, DEFAULT_MAX_IN_FLIGHT,
};
pub use table::StateCounts;

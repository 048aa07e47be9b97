//! Scheduling policies: retries and the concurrency budget.

use crate::pipeline::ResourceClass;
use std::collections::HashMap;
use std::time::Duration;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a task handles transient failures.
///
/// Applies only to soft failures (timeouts, preemption, transient
/// I/O). Hard failures are never retried regardless of policy.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail on the first error.
    None,

    /// Fixed number of attempts with constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff. The delay grows by `multiplier` after each
    /// failed attempt, capped at `max_delay`. Recommended for cluster
    /// execution so a briefly overloaded batch system is not hammered.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Delay cap.
        max_delay: Duration,
        /// Multiplier applied after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::None
    }
}

impl RetryPolicy {
    /// Exponential backoff with the default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Fixed-delay retries.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// The delay before the next retry, given how many attempts have
    /// already run (1-based), or `None` when attempts are exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => {
                if attempt < *max_attempts {
                    Some(*delay)
                } else {
                    None
                }
            }
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt < *max_attempts {
                    let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                    let delay_ms = initial_delay.as_millis() as f64 * factor;
                    let delay =
                        Duration::from_millis(delay_ms.min(max_delay.as_millis() as f64) as u64);
                    Some(delay.min(*max_delay))
                } else {
                    None
                }
            }
        }
    }

    /// Maximum number of attempts allowed by this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

// =============================================================================
// Concurrency Budget
// =============================================================================

/// Default maximum number of in-flight tasks.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Bounds on how many tasks may be in flight at once.
///
/// A global cap plus optional per-[`ResourceClass`] caps, so
/// memory-heavy stages can be held below the total worker count.
#[derive(Clone, Debug, PartialEq)]
pub struct ConcurrencyBudget {
    max_total: usize,
    per_class: HashMap<ResourceClass, usize>,
}

impl ConcurrencyBudget {
    /// A budget with a single global cap.
    ///
    /// # Panics
    ///
    /// Panics if `max_total` is zero - the run could never progress.
    pub fn total(max_total: usize) -> Self {
        assert!(max_total > 0, "concurrency budget must be at least 1");
        Self {
            max_total,
            per_class: HashMap::new(),
        }
    }

    /// Caps a specific resource class below the global limit.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero - tasks of that class could never
    /// dispatch and the run would stall short of a terminal state.
    pub fn with_class_limit(mut self, class: ResourceClass, limit: usize) -> Self {
        assert!(limit > 0, "class limit must be at least 1");
        self.per_class.insert(class, limit.min(self.max_total));
        self
    }

    /// The global cap.
    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// The cap for a class (the global cap if none was set).
    pub fn class_limit(&self, class: ResourceClass) -> usize {
        self.per_class.get(&class).copied().unwrap_or(self.max_total)
    }
}

impl Default for ConcurrencyBudget {
    fn default() -> Self {
        Self::total(DEFAULT_MAX_IN_FLIGHT)
    }
}

/// Live in-flight accounting against a [`ConcurrencyBudget`].
///
/// Owned by the scheduler loop; never shared.
#[derive(Debug)]
pub(crate) struct BudgetTracker {
    budget: ConcurrencyBudget,
    total: usize,
    per_class: HashMap<ResourceClass, usize>,
}

impl BudgetTracker {
    pub fn new(budget: ConcurrencyBudget) -> Self {
        Self {
            budget,
            total: 0,
            per_class: HashMap::new(),
        }
    }

    /// Returns true if a task of `class` may be dispatched now.
    pub fn can_dispatch(&self, class: ResourceClass) -> bool {
        self.total < self.budget.max_total()
            && self.per_class.get(&class).copied().unwrap_or(0) < self.budget.class_limit(class)
    }

    pub fn acquire(&mut self, class: ResourceClass) {
        self.total += 1;
        *self.per_class.entry(class).or_insert(0) += 1;
    }

    pub fn release(&mut self, class: ResourceClass) {
        self.total = self.total.saturating_sub(1);
        if let Some(count) = self.per_class.get_mut(&class) {
            *count = count.saturating_sub(1);
        }
    }

    /// Number of tasks currently in flight.
    pub fn in_flight(&self) -> usize {
        self.total
    }
}

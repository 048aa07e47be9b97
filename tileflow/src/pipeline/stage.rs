//! Stage descriptors and pipeline validation.

use super::process::ProcessFn;
use crate::error::GraphError;
use crate::scheduler::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default per-task wall-clock timeout.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;

/// Index of a stage within the ordered pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub u16);

impl StageId {
    /// The numeric stage index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// The id of the immediately preceding stage, if any.
    pub fn previous(&self) -> Option<StageId> {
        self.0.checked_sub(1).map(StageId)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage{}", self.0)
    }
}

/// How a stage's tasks depend on upstream work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyPattern {
    /// No dependencies. Only valid for the first stage.
    Root,
    /// The previous stage's task on the same tile.
    Sequential,
    /// The previous stage on the same tile, plus the previous stage on
    /// every tile whose core intersects this tile's margin.
    Margin,
}

/// Resource class hint for concurrency budgeting.
///
/// The scheduler may subdivide its budget per class so memory-heavy
/// stages (e.g. rasterization over large margins) do not saturate the
/// worker pool alongside CPU-heavy matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceClass {
    /// Compute-bound work.
    Cpu,
    /// Memory-bound work.
    Memory,
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::Cpu => write!(f, "cpu"),
            ResourceClass::Memory => write!(f, "memory"),
        }
    }
}

/// One step of the processing pipeline.
///
/// Carries the opaque processing function plus everything the
/// scheduler needs to know about tasks of this stage.
#[derive(Clone)]
pub struct Stage {
    name: String,
    pattern: DependencyPattern,
    resource_class: ResourceClass,
    timeout: Duration,
    retry: RetryPolicy,
    process: Arc<dyn ProcessFn>,
}

impl Stage {
    /// Creates a stage with default hints: CPU resource class, the
    /// default timeout, and no retries.
    pub fn new(
        name: impl Into<String>,
        pattern: DependencyPattern,
        process: impl ProcessFn,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            resource_class: ResourceClass::Cpu,
            timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            retry: RetryPolicy::None,
            process: Arc::new(process),
        }
    }

    /// Sets the resource class hint.
    pub fn with_resource_class(mut self, class: ResourceClass) -> Self {
        self.resource_class = class;
        self
    }

    /// Sets the per-task wall-clock timeout. A task exceeding it is a
    /// soft failure (retried under the stage's retry policy).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy for transient failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared dependency pattern.
    pub fn pattern(&self) -> DependencyPattern {
        self.pattern
    }

    /// The resource class hint.
    pub fn resource_class(&self) -> ResourceClass {
        self.resource_class
    }

    /// The per-task timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The retry policy.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The processing function.
    pub fn process(&self) -> Arc<dyn ProcessFn> {
        Arc::clone(&self.process)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("resource_class", &self.resource_class)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A validated, ordered list of stages.
#[derive(Clone, Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Starts building a pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: Vec::new() }
    }

    /// The stages in pipeline order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages (never true for a
    /// built pipeline).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Looks up a stage by id.
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(id.index())
    }

    /// Iterates (id, stage) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (StageId, &Stage)> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, s)| (StageId(i as u16), s))
    }
}

/// Builder that validates the stage list before producing a pipeline.
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Appends a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validates and builds the pipeline.
    ///
    /// # Errors
    ///
    /// - [`GraphError::EmptyPipeline`] if no stages were added.
    /// - [`GraphError::DuplicateStage`] for repeated names.
    /// - [`GraphError::FirstStageDependency`] if the first stage
    ///   declares `Sequential` or `Margin` (there is nothing upstream),
    ///   or a later stage declares `Root` (it would silently detach
    ///   from the pipeline).
    pub fn build(self) -> Result<Pipeline, GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::EmptyPipeline);
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if !names.insert(stage.name.clone()) {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
        }

        if self.stages[0].pattern != DependencyPattern::Root {
            return Err(GraphError::FirstStageDependency(self.stages[0].name.clone()));
        }
        for stage in &self.stages[1..] {
            if stage.pattern == DependencyPattern::Root {
                return Err(GraphError::FirstStageDependency(stage.name.clone()));
            }
        }

        Ok(Pipeline { stages: self.stages })
    }
}

//! Dependency graph construction and validation.

use super::task::TaskId;
use crate::error::GraphError;
use crate::grid::TileGrid;
use crate::pipeline::{DependencyPattern, Pipeline};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use tracing::debug;

/// The immutable task dependency DAG for one run.
///
/// Edges point from a dependency to its dependent: `a -> b` means `b`
/// consumes `a`'s artifact. The graph is validated acyclic at build
/// time; a cycle can only come from a stage-definition bug and is
/// fatal before any scheduling begins.
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
    /// Row-major, stage-major creation order, used for deterministic
    /// tie-breaking during scheduling.
    creation_order: Vec<TaskId>,
    /// Longest downstream chain per task (critical-path height).
    height: HashMap<TaskId, u32>,
}

impl TaskGraph {
    /// Builds the task graph for `grid` and `pipeline`.
    ///
    /// One task per (tile, stage). Dependencies:
    /// - `Sequential`: previous stage, same tile.
    /// - `Margin`: previous stage, same tile, plus previous stage on
    ///   every margin neighbor. Neighbors outside the footprint do not
    ///   exist and their edges are omitted, not errors.
    ///
    /// # Errors
    ///
    /// [`GraphError::Cycle`] if validation fails (stage-definition bug).
    pub fn build(grid: &TileGrid, pipeline: &Pipeline) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut creation_order = Vec::with_capacity(grid.len() * pipeline.len());

        // Nodes first: stage-major so stage 0 tasks carry the lowest
        // creation sequence numbers.
        for (stage_id, _) in pipeline.iter() {
            for tile in grid.tiles() {
                let task = TaskId::new(tile.id, stage_id);
                let node = graph.add_node(task);
                index.insert(task, node);
                creation_order.push(task);
            }
        }

        // Edges per stage pattern.
        for (stage_id, stage) in pipeline.iter() {
            let prev = match stage.pattern() {
                DependencyPattern::Root => continue,
                DependencyPattern::Sequential | DependencyPattern::Margin => {
                    // Builder validation guarantees a previous stage.
                    stage_id
                        .previous()
                        .ok_or_else(|| GraphError::UnknownTask(TaskId::new(
                            grid.tiles()[0].id,
                            stage_id,
                        )))?
                }
            };

            for tile in grid.tiles() {
                let this = index[&TaskId::new(tile.id, stage_id)];

                let same_tile = TaskId::new(tile.id, prev);
                let upstream = *index
                    .get(&same_tile)
                    .ok_or(GraphError::UnknownTask(same_tile))?;
                graph.add_edge(upstream, this, ());

                if stage.pattern() == DependencyPattern::Margin {
                    for neighbor in grid.margin_neighbors(tile.id) {
                        let neighbor_task = TaskId::new(neighbor, prev);
                        let upstream = *index
                            .get(&neighbor_task)
                            .ok_or(GraphError::UnknownTask(neighbor_task))?;
                        graph.add_edge(upstream, this, ());
                    }
                }
            }
        }

        let built = Self {
            graph,
            index,
            creation_order,
            height: HashMap::new(),
        };
        let order = built.toposort()?;
        let height = built.compute_heights(&order);

        debug!(
            tasks = built.graph.node_count(),
            edges = built.graph.edge_count(),
            "Task graph built"
        );

        Ok(Self { height, ..built })
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Tasks in deterministic creation order.
    pub fn tasks(&self) -> &[TaskId] {
        &self.creation_order
    }

    /// The upstream tasks `task` consumes, in deterministic order.
    pub fn dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.adjacent(task, Direction::Incoming)
    }

    /// The downstream tasks consuming `task`'s artifact.
    pub fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.adjacent(task, Direction::Outgoing)
    }

    /// Number of direct dependencies.
    pub fn dependency_count(&self, task: TaskId) -> usize {
        self.index
            .get(&task)
            .map(|&n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .unwrap_or(0)
    }

    /// Critical-path height: the longest chain of dependents below
    /// this task. Used as scheduling priority so long chains are not
    /// starved by wide, shallow work.
    pub fn height(&self, task: TaskId) -> u32 {
        self.height.get(&task).copied().unwrap_or(0)
    }

    /// All tasks transitively depending on `task`, excluding `task`
    /// itself. Used for failure propagation.
    pub fn transitive_dependents(&self, task: TaskId) -> Vec<TaskId> {
        let Some(&start) = self.index.get(&task) else {
            return Vec::new();
        };
        let mut seen = HashMap::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if seen.insert(next, ()).is_none() {
                    stack.push(next);
                }
            }
        }
        let mut result: Vec<TaskId> = seen.keys().map(|&n| self.graph[n]).collect();
        result.sort();
        result
    }

    fn adjacent(&self, task: TaskId, dir: Direction) -> Vec<TaskId> {
        let Some(&node) = self.index.get(&task) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self
            .graph
            .neighbors_directed(node, dir)
            .map(|n| self.graph[n])
            .collect();
        out.sort();
        out
    }

    /// Kahn's algorithm with creation-order tie-breaking, mirroring
    /// the deterministic toposort used for plan generation.
    fn toposort(&self) -> Result<Vec<TaskId>, GraphError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut queue: std::collections::VecDeque<NodeIndex> = self
            .creation_order
            .iter()
            .map(|t| self.index[t])
            .filter(|n| in_degree[n] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(node) = queue.pop_front() {
            order.push(self.graph[node]);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let d = in_degree.get_mut(&next).expect("node in degree map");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != self.graph.node_count() {
            // Some node never reached zero in-degree: it sits on a cycle.
            let on_cycle = self
                .creation_order
                .iter()
                .find(|t| !order.contains(t))
                .copied()
                .unwrap_or(self.creation_order[0]);
            return Err(GraphError::Cycle(on_cycle));
        }
        Ok(order)
    }

    /// Computes critical-path heights by walking the topological order
    /// backwards: a task's height is one more than its tallest
    /// dependent.
    fn compute_heights(&self, order: &[TaskId]) -> HashMap<TaskId, u32> {
        let mut height = HashMap::with_capacity(order.len());
        for task in order.iter().rev() {
            let node = self.index[task];
            let h = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .map(|n| height.get(&self.graph[n]).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            height.insert(*task, h);
        }
        height
    }
}

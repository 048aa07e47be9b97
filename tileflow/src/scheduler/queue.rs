//! Ready queue: priority ordering for dispatchable tasks.
//!
//! Tasks are ordered by critical-path height (taller chains first, so
//! long dependency chains are not starved by wide shallow stages),
//! then by enqueue order (FIFO within the same height). Dispatch order
//! among ready tasks only affects latency, never correctness.

use crate::graph::TaskId;
use crate::pipeline::ResourceClass;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A task waiting for a concurrency slot.
#[derive(Debug, Clone)]
pub(crate) struct QueuedTask {
    /// The ready task.
    pub task: TaskId,
    /// Critical-path height (higher dispatches first).
    pub priority: u32,
    /// Resource class of the task's stage.
    pub class: ResourceClass,
    /// FIFO sequence within a priority level.
    sequence: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (older)
        // first within a priority level.
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Priority queue of ready tasks.
///
/// Not thread-safe: owned exclusively by the scheduler loop, which is
/// the single synchronization point for graph state.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<QueuedTask>,
    next_sequence: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a task with a fresh FIFO sequence number.
    pub fn push(&mut self, task: TaskId, priority: u32, class: ResourceClass) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedTask {
            task,
            priority,
            class,
            sequence,
        });
    }

    /// Re-enqueues a previously popped entry, preserving its original
    /// FIFO position. Used when a task's resource class is at budget.
    pub fn requeue(&mut self, entry: QueuedTask) {
        self.heap.push(entry);
    }

    /// Removes and returns the highest-priority task.
    pub fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drops all queued tasks (run cancellation).
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileId;
    use crate::pipeline::StageId;

    fn task(row: u32, stage: u16) -> TaskId {
        TaskId::new(TileId::new(row, 0), StageId(stage))
    }

    #[test]
    fn test_taller_chains_first() {
        let mut queue = ReadyQueue::new();
        queue.push(task(0, 2), 0, ResourceClass::Cpu);
        queue.push(task(0, 0), 2, ResourceClass::Cpu);
        queue.push(task(0, 1), 1, ResourceClass::Cpu);

        assert_eq!(queue.pop().unwrap().task, task(0, 0));
        assert_eq!(queue.pop().unwrap().task, task(0, 1));
        assert_eq!(queue.pop().unwrap().task, task(0, 2));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = ReadyQueue::new();
        queue.push(task(1, 0), 3, ResourceClass::Cpu);
        queue.push(task(2, 0), 3, ResourceClass::Cpu);
        queue.push(task(3, 0), 3, ResourceClass::Cpu);

        assert_eq!(queue.pop().unwrap().task, task(1, 0));
        assert_eq!(queue.pop().unwrap().task, task(2, 0));
        assert_eq!(queue.pop().unwrap().task, task(3, 0));
    }

    #[test]
    fn test_requeue_preserves_fifo_position() {
        let mut queue = ReadyQueue::new();
        queue.push(task(1, 0), 1, ResourceClass::Memory);
        queue.push(task(2, 0), 1, ResourceClass::Cpu);

        let first = queue.pop().unwrap();
        assert_eq!(first.task, task(1, 0));
        // Budget full for Memory: put it back, it stays ahead of later pushes
        queue.requeue(first);
        queue.push(task(3, 0), 1, ResourceClass::Cpu);

        assert_eq!(queue.pop().unwrap().task, task(1, 0));
        assert_eq!(queue.pop().unwrap().task, task(2, 0));
        assert_eq!(queue.pop().unwrap().task, task(3, 0));
    }

    #[test]
    fn test_clear() {
        let mut queue = ReadyQueue::new();
        queue.push(task(0, 0), 0, ResourceClass::Cpu);
        assert!(!queue.is_empty());
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }
}

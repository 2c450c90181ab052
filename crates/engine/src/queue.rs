//! Shared work queue
//!
//! Mutex-guarded FIFO drained concurrently by workers. `try_dequeue` never waits: an empty
//! queue answers `None`, which is the signal workers use to stop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::task::Task;

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub enqueued: usize,
    pub dequeued: usize,
    pub remaining: usize,
}

/// Concurrency-safe FIFO of pending tasks
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<Task>>,
    enqueued: AtomicUsize,
    dequeued: AtomicUsize,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue pre-loaded with `tasks`, in order
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let queue = Self::new();
        for task in tasks {
            queue.enqueue(task);
        }
        queue
    }

    /// Insert at the tail
    pub fn enqueue(&self, task: Task) {
        self.items.lock().push_back(task);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove and return the head, or `None` if the queue is empty
    pub fn try_dequeue(&self) -> Option<Task> {
        let task = self.items.lock().pop_front()?;
        self.dequeued.fetch_add(1, Ordering::Relaxed);
        Some(task)
    }

    /// Advisory snapshot; may be stale by the time the caller looks at it
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            remaining: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::task::generate_tasks;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::with_tasks(generate_tasks(3));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue().map(|t| t.id), Some(1));
        assert_eq!(queue.try_dequeue().map(|t| t.id), Some(2));
        assert_eq!(queue.try_dequeue().map(|t| t.id), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_drain_is_idempotent() {
        let queue = WorkQueue::new();

        for _ in 0..100 {
            assert!(queue.try_dequeue().is_none());
        }

        let stats = queue.stats();
        assert_eq!(stats.dequeued, 0);
        assert_eq!(stats.remaining, 0);
    }

    #[test]
    fn test_stats_track_consumption() {
        let queue = WorkQueue::with_tasks(generate_tasks(5));
        queue.try_dequeue();
        queue.try_dequeue();

        assert_eq!(
            queue.stats(),
            QueueStats {
                enqueued: 5,
                dequeued: 2,
                remaining: 3,
            }
        );
    }

    #[test]
    fn test_concurrent_drain_consumes_each_task_once() {
        const TASKS: usize = 10_000;
        const DRAINERS: usize = 8;

        let queue = Arc::new(WorkQueue::with_tasks(generate_tasks(TASKS)));

        let handles: Vec<_> = (0..DRAINERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(task) = queue.try_dequeue() {
                        taken.push(task.id);
                    }
                    taken
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "task {} dequeued twice", id);
                total += 1;
            }
        }

        assert_eq!(total, TASKS);
        assert_eq!(seen.len(), TASKS);
        assert_eq!(
            queue.stats(),
            QueueStats {
                enqueued: TASKS,
                dequeued: TASKS,
                remaining: 0,
            }
        );
    }
}

//! Queue-draining worker
//!
//! A worker loops `fetch → process → emit` until the queue is empty or cancellation is
//! requested. Cancellation is only observed between tasks and inside the processor, never while a
//! record is being written.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;
use crate::sink::OutputSink;
use crate::task::{ProcessError, TaskProcessor, TaskResult};

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Starting,
    Running,
    /// Queue reported empty, or the worker was told to stop
    Drained,
    Finished,
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Queue reported empty
    Drained,
    /// Observed the cancellation token
    Cancelled,
    /// A panic escaped the loop
    Crashed,
    /// Forcibly stopped by the coordinator after the grace period
    Aborted,
}

/// Terminal report of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub exit: WorkerExit,
    /// Tasks taken off the queue
    pub dequeued: usize,
    /// Records appended to the sink
    pub written: usize,
    /// Tasks the processor rejected
    pub failed: usize,
    /// Records lost to sink errors
    pub write_errors: usize,
    /// Tasks taken but never finished: abandoned on cancellation, or in flight when the worker
    /// crashed or was aborted
    pub dropped: usize,
}

/// Live counters of one worker
///
/// Shared with whoever launched the worker, so the counts survive a panic or an abort of the
/// worker's future.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    dequeued: AtomicUsize,
    written: AtomicUsize,
    failed: AtomicUsize,
    write_errors: AtomicUsize,
    dropped: AtomicUsize,
}

impl WorkerCounters {
    /// Build a report from the current counts
    ///
    /// Tasks dequeued but not otherwise accounted for are reported as dropped, so that
    /// `dequeued == written + failed + write_errors + dropped` always holds.
    pub fn report(&self, worker_id: usize, exit: WorkerExit) -> WorkerReport {
        let dequeued = self.dequeued.load(Ordering::SeqCst);
        let written = self.written.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let write_errors = self.write_errors.load(Ordering::SeqCst);
        let dropped = self.dropped.load(Ordering::SeqCst);
        let unaccounted = dequeued.saturating_sub(written + failed + write_errors + dropped);

        WorkerReport {
            worker_id,
            exit,
            dequeued,
            written,
            failed,
            write_errors,
            dropped: dropped + unaccounted,
        }
    }
}

/// Format one output record
pub fn format_record(worker_id: usize, result: &TaskResult) -> String {
    format!("Worker {}: {}", worker_id, result)
}

/// One concurrent execution unit draining the shared queue
pub struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    sink: Arc<dyn OutputSink>,
    processor: Arc<dyn TaskProcessor>,
    cancel: CancellationToken,
    counters: Arc<WorkerCounters>,
    writes: TaskTracker,
    state: WorkerState,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<WorkQueue>,
        sink: Arc<dyn OutputSink>,
        processor: Arc<dyn TaskProcessor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            queue,
            sink,
            processor,
            cancel,
            counters: Arc::new(WorkerCounters::default()),
            writes: TaskTracker::new(),
            state: WorkerState::Starting,
        }
    }

    /// Run sink writes on `tracker`
    ///
    /// Writes are spawned so that aborting the worker never loses the count of a record that
    /// reached the sink. Waiting on the tracker settles every write still in flight.
    pub fn with_write_tracker(mut self, tracker: TaskTracker) -> Self {
        self.writes = tracker;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Handle to this worker's counters
    pub fn counters(&self) -> Arc<WorkerCounters> {
        Arc::clone(&self.counters)
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(worker_id = self.id, from = ?self.state, to = ?next, "Worker state change");
        self.state = next;
    }

    /// Append one record and count the outcome
    async fn emit(&self, task_id: u64, result: &TaskResult) {
        let worker_id = self.id;
        let record = format_record(worker_id, result);
        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);

        let write = self.writes.spawn(async move {
            match sink.append(&record).await {
                Ok(()) => {
                    counters.written.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    error!(worker_id, task_id, error = %e, "Error writing result");
                    counters.write_errors.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        if let Err(e) = write.await {
            error!(worker_id, task_id, error = %e, "Result write did not complete");
            self.counters.write_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Drain the queue until it is empty or cancellation is requested
    pub async fn run(mut self) -> WorkerReport {
        let mut exit = WorkerExit::Drained;
        info!(worker_id = self.id, "Worker {} started", self.id);
        self.transition(WorkerState::Running);

        loop {
            if self.cancel.is_cancelled() {
                exit = WorkerExit::Cancelled;
                break;
            }

            let Some(task) = self.queue.try_dequeue() else {
                break;
            };
            self.counters.dequeued.fetch_add(1, Ordering::SeqCst);

            let result = match self.processor.process(&task, &self.cancel).await {
                Ok(result) => result,
                Err(ProcessError::Cancelled(task_id)) => {
                    warn!(worker_id = self.id, task_id, "Task abandoned on cancellation");
                    self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                    exit = WorkerExit::Cancelled;
                    break;
                }
                Err(e) => {
                    warn!(
                        worker_id = self.id,
                        task_id = task.id,
                        error = %e,
                        "Worker {} error processing task {}",
                        self.id,
                        task.id
                    );
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            };

            self.emit(task.id, &result).await;
        }

        self.transition(WorkerState::Drained);
        self.transition(WorkerState::Finished);
        let report = self.counters.report(self.id, exit);
        info!(
            worker_id = self.id,
            exit = ?report.exit,
            written = report.written,
            "Worker {} finished",
            self.id
        );
        report
    }
}

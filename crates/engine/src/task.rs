//! Tasks and task processing
//!
//! A [`Task`] is an immutable unit of work. A [`TaskProcessor`] turns one into a [`TaskResult`],
//! possibly taking wall-clock time to do so.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Default simulated processing latency
pub const DEFAULT_TASK_DELAY: Duration = Duration::from_millis(100);

/// An immutable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Caller-assigned identifier
    pub id: u64,
    /// Opaque payload handed to the processor
    pub payload: String,
}

impl Task {
    /// Create a new task
    pub fn new(id: u64, payload: impl Into<String>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// Build tasks `1..=count` with payloads `data_item_<id>`
pub fn generate_tasks(count: usize) -> Vec<Task> {
    (1..=count as u64)
        .map(|id| Task::new(id, format!("data_item_{}", id)))
        .collect()
}

/// Output of processing a single task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task_id: u64,
    pub output: String,
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task {} processed: {}", self.task_id, self.output)
    }
}

/// Recoverable processing errors
///
/// None of these stop a worker; the task is dropped and the worker moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// Payload had nothing to transform
    #[error("task {0} has an empty payload")]
    EmptyPayload(u64),

    /// Processor-specific failure
    #[error("task {task_id} failed: {reason}")]
    Failed { task_id: u64, reason: String },

    /// Cancellation arrived while the task was being processed
    #[error("task {0} was cancelled during processing")]
    Cancelled(u64),
}

impl ProcessError {
    /// Create a processor-specific failure
    pub fn failed(task_id: u64, reason: impl Into<String>) -> Self {
        Self::Failed {
            task_id,
            reason: reason.into(),
        }
    }
}

/// Turns a task into a result
///
/// Implementations must be safe to call concurrently on distinct tasks and should return
/// [`ProcessError::Cancelled`] promptly once `cancel` fires.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, ProcessError>;
}

/// Upper-cases the payload after a simulated delay
#[derive(Debug, Clone)]
pub struct UppercaseProcessor {
    delay: Duration,
}

impl Default for UppercaseProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_DELAY)
    }
}

impl UppercaseProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl TaskProcessor for UppercaseProcessor {
    async fn process(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, ProcessError> {
        if task.payload.trim().is_empty() {
            return Err(ProcessError::EmptyPayload(task.id));
        }

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Err(ProcessError::Cancelled(task.id)),
            }
        }

        Ok(TaskResult {
            task_id: task.id,
            output: task.payload.to_uppercase(),
        })
    }
}

//! # Batch Execution Engine
//!
//! Distributes a fixed batch of tasks across a fixed pool of concurrent workers and serializes
//! every result into one shared output sink.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PoolCoordinator                         │
//! │  (loads the queue, launches workers, completion barrier)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkQueue                             │
//! │  (mutex-guarded FIFO, try_dequeue returns None when empty)  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!   [Worker 1]          [Worker 2]    ...    [Worker N]
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       OutputSink                             │
//! │  (own mutex, one complete record per append)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use batchrun_engine::prelude::*;
//!
//! let config = PoolConfig::new("results.txt").with_worker_count(4);
//! let sink = FileSink::create(&config.output_target).await?;
//! let coordinator = PoolCoordinator::new(
//!     config,
//!     Arc::new(UppercaseProcessor::default()),
//!     Arc::new(sink),
//! )?;
//!
//! let summary = coordinator.run().await?;
//! println!("{} records in {:?}", summary.records_written, summary.elapsed);
//! ```

pub mod pool;
pub mod queue;
pub mod sink;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::pool::{
        ConfigError, PoolConfig, PoolCoordinator, PoolError, PoolStatus, RunOutcome, RunSummary,
    };
    pub use crate::queue::{QueueStats, WorkQueue};
    pub use crate::sink::{FileSink, InMemorySink, OutputSink, SinkError};
    pub use crate::task::{
        generate_tasks, ProcessError, Task, TaskProcessor, TaskResult, UppercaseProcessor,
    };
    pub use crate::worker::{
        format_record, Worker, WorkerCounters, WorkerExit, WorkerReport,
    };
}

// Re-export key types at crate root
pub use pool::{
    ConfigError, PoolConfig, PoolCoordinator, PoolError, PoolStatus, RunOutcome, RunSummary,
};
pub use queue::{QueueStats, WorkQueue};
pub use sink::{FileSink, InMemorySink, OutputSink, SinkError};
pub use task::{generate_tasks, ProcessError, Task, TaskProcessor, TaskResult, UppercaseProcessor};
pub use worker::{Worker, WorkerCounters, WorkerExit, WorkerReport};

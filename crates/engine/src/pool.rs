//! Pool coordinator
//!
//! Loads the queue, launches the workers, and blocks on the completion barrier until every worker
//! has reported or the timeout forces a stop.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::queue::{QueueStats, WorkQueue};
use crate::sink::OutputSink;
use crate::task::{generate_tasks, Task, TaskProcessor, DEFAULT_TASK_DELAY};
use crate::worker::{Worker, WorkerCounters, WorkerExit, WorkerReport};

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of tasks generated for a run
    pub task_count: usize,

    /// Size of the worker pool
    pub worker_count: usize,

    /// Destination of the output sink
    pub output_target: PathBuf,

    /// Keep existing output instead of truncating it first
    pub append: bool,

    /// Maximum wait before a forced stop
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// How long cancelled workers get to wind down before they are aborted
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,

    /// Simulated per-task processing latency
    #[serde(with = "duration_millis")]
    pub task_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            task_count: 20,
            worker_count: 4,
            output_target: PathBuf::from("batchrun_output.txt"),
            append: false,
            timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(1),
            task_delay: DEFAULT_TASK_DELAY,
        }
    }
}

impl PoolConfig {
    /// Create a configuration writing to `output_target`
    pub fn new(output_target: impl Into<PathBuf>) -> Self {
        Self {
            output_target: output_target.into(),
            ..Default::default()
        }
    }

    pub fn with_task_count(mut self, count: usize) -> Self {
        self.task_count = count;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Set the overall run timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the grace period between cancellation and abort
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_task_delay(mut self, delay: Duration) -> Self {
        self.task_delay = delay;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than zero".into()));
        }
        if self.output_target.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output_target must not be empty".into()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid pool configuration: {0}")]
    Invalid(String),
}

/// Pool coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A coordinator drives exactly one run
    #[error("pool coordinator has already run")]
    AlreadyRun,
}

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Constructed, nothing loaded yet
    Idle,
    /// Workers are draining the queue
    Running,
    /// Timeout or cancellation hit; waiting for workers to wind down
    Stopping,
    /// Barrier resolved
    Stopped,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every worker drained the queue
    Completed,
    /// The timeout elapsed first
    TimedOut,
    /// Cancelled from outside (e.g. Ctrl-C)
    Cancelled,
}

/// Result of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub queue: QueueStats,
    pub records_written: usize,
    pub tasks_failed: usize,
    pub write_errors: usize,
    pub tasks_dropped: usize,
    /// One report per launched worker, ordered by worker id
    pub workers: Vec<WorkerReport>,
    #[serde(rename = "elapsed_ms", serialize_with = "duration_millis::serialize")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Whether every worker reached the end of the queue
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Owns the lifecycle of one run: load, launch, await, enforce timeout
///
/// # Example
///
/// ```ignore
/// let coordinator = PoolCoordinator::new(config, processor, sink)?;
///
/// // Hook external shutdown into the run
/// let cancel = coordinator.cancellation_token();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     cancel.cancel();
/// });
///
/// let summary = coordinator.run().await?;
/// ```
pub struct PoolCoordinator {
    config: PoolConfig,
    queue: Arc<WorkQueue>,
    sink: Arc<dyn OutputSink>,
    processor: Arc<dyn TaskProcessor>,
    cancel: CancellationToken,
    status: RwLock<PoolStatus>,
}

impl PoolCoordinator {
    /// Create a coordinator; the configuration is validated up front
    pub fn new(
        config: PoolConfig,
        processor: Arc<dyn TaskProcessor>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            config,
            queue: Arc::new(WorkQueue::new()),
            sink,
            processor,
            cancel: CancellationToken::new(),
            status: RwLock::new(PoolStatus::Idle),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn status(&self) -> PoolStatus {
        *self.status.read()
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a stop; the run goes through the same path as a timeout
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run `task_count` generated tasks
    pub async fn run(&self) -> Result<RunSummary, PoolError> {
        self.run_tasks(generate_tasks(self.config.task_count)).await
    }

    /// Run an explicit batch of tasks
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn run_tasks(&self, tasks: Vec<Task>) -> Result<RunSummary, PoolError> {
        {
            let mut status = self.status.write();
            if *status != PoolStatus::Idle {
                return Err(PoolError::AlreadyRun);
            }
            *status = PoolStatus::Running;
        }

        let run_id = Uuid::now_v7();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started = Instant::now();

        // Fully load before any worker exists
        info!(tasks = tasks.len(), "Loading tasks");
        for task in tasks {
            self.queue.enqueue(task);
        }

        info!(
            workers = self.config.worker_count,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Starting workers"
        );
        let writes = TaskTracker::new();
        let mut counters = BTreeMap::new();
        let mut workers = JoinSet::new();
        for worker_id in 1..=self.config.worker_count {
            let worker = Worker::new(
                worker_id,
                Arc::clone(&self.queue),
                Arc::clone(&self.sink),
                Arc::clone(&self.processor),
                self.cancel.clone(),
            )
            .with_write_tracker(writes.clone());
            let worker_counters = worker.counters();
            counters.insert(worker_id, Arc::clone(&worker_counters));

            workers.spawn(async move {
                match AssertUnwindSafe(worker.run()).catch_unwind().await {
                    Ok(report) => report,
                    Err(_) => {
                        error!(worker_id, "Worker {} encountered critical error", worker_id);
                        worker_counters.report(worker_id, WorkerExit::Crashed)
                    }
                }
            });
        }

        let mut reports = Vec::with_capacity(self.config.worker_count);
        let outcome = self.await_workers(&mut workers, &mut reports).await;
        if outcome != RunOutcome::Completed {
            *self.status.write() = PoolStatus::Stopping;
            self.force_stop(&mut workers, &mut reports).await;
        }

        // Writes spawned by aborted workers still land; settle them before counting
        writes.close();
        writes.wait().await;
        Self::report_aborted(&counters, &mut reports);
        *self.status.write() = PoolStatus::Stopped;

        let summary = self.summarize(run_id, outcome, reports, started.elapsed());
        info!(
            outcome = ?summary.outcome,
            records = summary.records_written,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "All tasks completed in {}ms. Check {}",
            summary.elapsed.as_millis(),
            self.config.output_target.display()
        );
        Ok(summary)
    }

    /// Completion barrier: wait for every worker, the timeout, or external cancellation
    async fn await_workers(
        &self,
        workers: &mut JoinSet<WorkerReport>,
        reports: &mut Vec<WorkerReport>,
    ) -> RunOutcome {
        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                joined = workers.join_next() => match joined {
                    Some(Ok(report)) => {
                        debug!(worker_id = report.worker_id, exit = ?report.exit, "Worker reported");
                        reports.push(report);
                    }
                    Some(Err(e)) => error!(error = %e, "Worker task failed to join"),
                    None => return RunOutcome::Completed,
                },
                _ = &mut deadline => {
                    warn!(
                        remaining_workers = workers.len(),
                        "Timeout reached, stopping workers"
                    );
                    return RunOutcome::TimedOut;
                }
                _ = self.cancel.cancelled() => {
                    warn!(remaining_workers = workers.len(), "Run cancelled, stopping workers");
                    return RunOutcome::Cancelled;
                }
            }
        }
    }

    /// Cancel, give workers `shutdown_grace` to notice, then abort the rest
    async fn force_stop(
        &self,
        workers: &mut JoinSet<WorkerReport>,
        reports: &mut Vec<WorkerReport>,
    ) {
        self.cancel.cancel();

        let graceful = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => error!(error = %e, "Worker task failed to join"),
                }
            }
        })
        .await;

        if graceful.is_err() {
            warn!(remaining_workers = workers.len(), "Grace period elapsed, aborting workers");
            workers.abort_all();
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(report) => reports.push(report),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!(error = %e, "Worker task failed to join"),
                }
            }
        }
    }

    /// Anything launched but unreported was aborted; its counts come from the shared counters
    fn report_aborted(
        counters: &BTreeMap<usize, Arc<WorkerCounters>>,
        reports: &mut Vec<WorkerReport>,
    ) {
        let reported: Vec<usize> = reports.iter().map(|r| r.worker_id).collect();
        for (&worker_id, worker_counters) in counters {
            if !reported.contains(&worker_id) {
                reports.push(worker_counters.report(worker_id, WorkerExit::Aborted));
            }
        }
    }

    fn summarize(
        &self,
        run_id: Uuid,
        outcome: RunOutcome,
        mut workers: Vec<WorkerReport>,
        elapsed: Duration,
    ) -> RunSummary {
        workers.sort_by_key(|r| r.worker_id);
        RunSummary {
            run_id,
            outcome,
            queue: self.queue.stats(),
            records_written: workers.iter().map(|r| r.written).sum(),
            tasks_failed: workers.iter().map(|r| r.failed).sum(),
            write_errors: workers.iter().map(|r| r.write_errors).sum(),
            tasks_dropped: workers.iter().map(|r| r.dropped).sum(),
            workers,
            elapsed,
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;
    use crate::task::UppercaseProcessor;

    fn coordinator(config: PoolConfig) -> (PoolCoordinator, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let processor = Arc::new(UppercaseProcessor::new(config.task_delay));
        let coordinator = PoolCoordinator::new(config, processor, sink.clone()).unwrap();
        (coordinator, sink)
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.task_count, 20);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.task_delay, Duration::from_millis(100));
        assert!(!config.append);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new("out.txt")
            .with_task_count(50)
            .with_worker_count(2)
            .with_timeout(Duration::from_millis(200))
            .with_shutdown_grace(Duration::from_millis(500))
            .with_task_delay(Duration::from_millis(10))
            .with_append(true);

        assert_eq!(config.output_target, PathBuf::from("out.txt"));
        assert_eq!(config.task_count, 50);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.timeout, Duration::from_millis(200));
        assert_eq!(config.shutdown_grace, Duration::from_millis(500));
        assert_eq!(config.task_delay, Duration::from_millis(10));
        assert!(config.append);
    }

    #[test]
    fn test_config_validation() {
        assert!(PoolConfig::default().with_worker_count(0).validate().is_err());
        assert!(PoolConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::new("").validate().is_err());
        // Zero tasks is a valid, empty run
        assert!(PoolConfig::default().with_task_count(0).validate().is_ok());
    }

    #[test]
    fn test_config_serde_uses_millis() {
        let config = PoolConfig::default().with_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 1500);

        let parsed: PoolConfig =
            serde_json::from_str(r#"{"worker_count": 8, "timeout": 250}"#).unwrap();
        assert_eq!(parsed.worker_count, 8);
        assert_eq!(parsed.timeout, Duration::from_millis(250));
        assert_eq!(parsed.task_count, 20);
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let result = PoolCoordinator::new(
            PoolConfig::default().with_worker_count(0),
            Arc::new(UppercaseProcessor::default()),
            Arc::new(InMemorySink::new()),
        );
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_completes() {
        let (coordinator, sink) = coordinator(
            PoolConfig::default()
                .with_task_count(10)
                .with_worker_count(3)
                .with_task_delay(Duration::ZERO),
        );
        assert_eq!(coordinator.status(), PoolStatus::Idle);

        let summary = coordinator.run().await.unwrap();

        assert_eq!(coordinator.status(), PoolStatus::Stopped);
        assert!(summary.is_complete());
        assert_eq!(summary.records_written, 10);
        assert_eq!(sink.len(), 10);
        assert_eq!(summary.queue.dequeued, 10);
        assert_eq!(summary.queue.remaining, 0);
        assert_eq!(
            summary.workers.iter().map(|r| r.worker_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(summary
            .workers
            .iter()
            .all(|r| r.exit == WorkerExit::Drained));
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let (coordinator, _sink) = coordinator(
            PoolConfig::default()
                .with_task_count(1)
                .with_task_delay(Duration::ZERO),
        );

        coordinator.run().await.unwrap();
        assert!(matches!(
            coordinator.run().await,
            Err(PoolError::AlreadyRun)
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_completes() {
        let (coordinator, sink) = coordinator(PoolConfig::default().with_task_count(0));

        let summary = coordinator.run().await.unwrap();

        assert!(summary.is_complete());
        assert_eq!(summary.workers.len(), 4);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_run() {
        let (coordinator, _sink) = coordinator(
            PoolConfig::default()
                .with_task_count(100)
                .with_worker_count(2)
                .with_task_delay(Duration::from_secs(30)),
        );
        coordinator.shutdown();

        let summary = tokio::time::timeout(Duration::from_secs(5), coordinator.run())
            .await
            .expect("run did not stop")
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.records_written, 0);
        assert_eq!(summary.workers.len(), 2);
        assert_eq!(
            summary.queue.enqueued,
            summary.queue.dequeued + summary.queue.remaining
        );
    }
}

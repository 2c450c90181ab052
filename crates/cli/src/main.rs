// Batchrun CLI
//
// Design Decision: Use clap derive with env fallbacks so every option can come from BATCHRUN_*.
// Design Decision: Diagnostics go to stderr through tracing; stdout carries only the summary.
// Design Decision: Ctrl-C cancels the run through the coordinator's token, same path as a timeout.

mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use batchrun_engine::{FileSink, PoolCoordinator, UppercaseProcessor};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "batchrun")]
#[command(about = "Batchrun - drain a batch of tasks across a worker pool into one output file")]
#[command(version)]
pub struct Cli {
    /// JSON pool configuration file; flags below override it
    #[arg(long, env = "BATCHRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of tasks to generate
    #[arg(long, short = 'n', env = "BATCHRUN_TASK_COUNT")]
    pub tasks: Option<usize>,

    /// Number of concurrent workers
    #[arg(long, short, env = "BATCHRUN_WORKER_COUNT")]
    pub workers: Option<usize>,

    /// Output file for result records
    #[arg(long, short, env = "BATCHRUN_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Max wait in milliseconds before forcing a stop
    #[arg(long, env = "BATCHRUN_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Milliseconds stopped workers get to wind down before they are aborted
    #[arg(long, env = "BATCHRUN_SHUTDOWN_GRACE_MS")]
    pub grace_ms: Option<u64>,

    /// Simulated processing delay per task, in milliseconds
    #[arg(long, env = "BATCHRUN_TASK_DELAY_MS")]
    pub delay_ms: Option<u64>,

    /// Append to the output file instead of truncating it
    #[arg(long)]
    pub append: bool,

    /// Summary format
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub summary: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,
}

impl Cli {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            task_count: self.tasks,
            worker_count: self.workers,
            output_target: self.output.clone(),
            timeout_ms: self.timeout_ms,
            grace_ms: self.grace_ms,
            task_delay_ms: self.delay_ms,
            append: self.append,
        }
    }
}

fn init_tracing(quiet: bool) {
    let default_filter = if quiet {
        "batchrun=warn,batchrun_engine=warn"
    } else {
        "batchrun=info,batchrun_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let config = config::resolve(cli.config.as_deref(), cli.overrides())?;
    let output_format = output::OutputFormat::from_str(&cli.summary);

    tracing::info!(
        tasks = config.task_count,
        workers = config.worker_count,
        output = %config.output_target.display(),
        "batchrun starting..."
    );

    let sink = if config.append {
        FileSink::new(&config.output_target)
    } else {
        FileSink::create(&config.output_target)
            .await
            .context("Failed to create output file")?
    };
    let processor = UppercaseProcessor::new(config.task_delay);
    let coordinator = PoolCoordinator::new(config, Arc::new(processor), Arc::new(sink))
        .context("Failed to create pool coordinator")?;

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    return;
                }
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });

    let summary = coordinator.run().await?;
    coordinator.shutdown();

    output::print_summary(output_format, &summary)?;
    Ok(())
}

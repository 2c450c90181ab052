// Configuration layering: defaults < config file < environment/flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use batchrun_engine::PoolConfig;

/// Overrides collected from the command line (clap fills these from env vars too)
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub task_count: Option<usize>,
    pub worker_count: Option<usize>,
    pub output_target: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub grace_ms: Option<u64>,
    pub task_delay_ms: Option<u64>,
    pub append: bool,
}

/// Load a JSON pool configuration; missing keys keep their defaults
pub fn load_file(path: &Path) -> anyhow::Result<PoolConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Build the effective configuration
pub fn resolve(config_file: Option<&Path>, overrides: Overrides) -> anyhow::Result<PoolConfig> {
    let mut config = match config_file {
        Some(path) => load_file(path)?,
        None => PoolConfig::default(),
    };

    if let Some(count) = overrides.task_count {
        config.task_count = count;
    }
    if let Some(count) = overrides.worker_count {
        config.worker_count = count;
    }
    if let Some(target) = overrides.output_target {
        config.output_target = target;
    }
    if let Some(ms) = overrides.timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = overrides.grace_ms {
        config.shutdown_grace = Duration::from_millis(ms);
    }
    if let Some(ms) = overrides.task_delay_ms {
        config.task_delay = Duration::from_millis(ms);
    }
    if overrides.append {
        config.append = true;
    }

    config.validate()?;
    Ok(config)
}

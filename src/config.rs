//! Pipeline configuration
//!
//! Configuration is plain data: built with defaults, loaded from YAML, or
//! overlaid from the `PS_*` environment variables a batch job exports.
//!
//! ```rust
//! use smd_builder::{ParallelMode, PipelineConfig};
//!
//! let config = PipelineConfig::from_yaml_str("mode: dynamic_task\nworkers: 8\n").unwrap();
//! assert_eq!(config.mode, ParallelMode::DynamicTask);
//! assert_eq!(config.batch_size, 100);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::{BuilderError, Result};

/// Concurrency strategy, fixed for a pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelMode {
    /// One task processes chunks in order.
    #[default]
    Serial,
    /// Fixed worker ranks pull chunks from a coordinator over channels.
    FixedRank,
    /// A task per chunk, with chained per-batch tasks.
    DynamicTask,
}

impl ParallelMode {
    /// Parse a `PS_PARALLEL` value.
    pub fn from_env_value(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mpi" => Ok(Self::FixedRank),
            "legion" => Ok(Self::DynamicTask),
            "none" | "" => Ok(Self::Serial),
            other => Err(BuilderError::config(format!(
                "PS_PARALLEL must be one of mpi, legion, none (got {other:?})"
            ))),
        }
    }
}

impl std::fmt::Display for ParallelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => f.write_str("serial"),
            Self::FixedRank => f.write_str("fixed_rank"),
            Self::DynamicTask => f.write_str("dynamic_task"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub mode: ParallelMode,
    /// Worker ranks in fixed-rank mode.
    pub workers: usize,
    /// L1Accept events per chunk.
    pub chunk_events: usize,
    /// Initial pull size of every batching loop.
    pub batch_size: usize,
    /// Stop after this many L1Accept events.
    pub max_events: Option<u64>,
    /// Chunks buffered between the reader and the workers.
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ParallelMode::Serial,
            workers: 4,
            chunk_events: 1000,
            batch_size: 100,
            max_events: None,
            queue_depth: 8,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| BuilderError::file_error(path.to_path_buf(), e))?;
        debug!("Loaded pipeline config from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Defaults overlaid with `PS_PARALLEL`, `PS_EB_NODES`, `PS_SMD_N_EVENTS`
    /// and `PS_MAX_EVENTS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup("PS_PARALLEL") {
            config.mode = ParallelMode::from_env_value(&value)?;
        }
        if let Some(value) = lookup("PS_EB_NODES") {
            config.workers = parse_var("PS_EB_NODES", &value)?;
        }
        if let Some(value) = lookup("PS_SMD_N_EVENTS") {
            config.chunk_events = parse_var("PS_SMD_N_EVENTS", &value)?;
        }
        if let Some(value) = lookup("PS_MAX_EVENTS") {
            let max: u64 = parse_var("PS_MAX_EVENTS", &value)?;
            // 0 means unlimited
            config.max_events = (max > 0).then_some(max);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("workers", self.workers),
            ("chunk_events", self.chunk_events),
            ("batch_size", self.batch_size),
            ("queue_depth", self.queue_depth),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(BuilderError::config(format!("{name} must be positive")));
            }
        }
        if self.max_events == Some(0) {
            return Err(BuilderError::config("max_events must be positive when set"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BuilderError::config(format!("{name} is not a valid number: {value:?}")))
}

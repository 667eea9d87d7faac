use std::{path::PathBuf, time::Duration};

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::{cache::get_cache_db_path, error::Result, types::MS_PER_DAY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Development,
    /// Debug-level envelopes never leave the device.
    Production,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Side-channel log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub build_mode: BuildMode,

    /// Local cache database. Defaults to the user cache directory.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    #[serde(default = "default_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,

    // Uploader
    /// Flush as soon as this many items are pending
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,

    /// Flush this long after the oldest unflushed item was enqueued
    #[serde(default = "default_batch_idle_ms")]
    pub batch_idle_ms: u64,

    /// Background flush cadence, independent of enqueue activity
    #[serde(default = "default_periodic_flush_secs")]
    pub periodic_flush_secs: u64,

    // Retention
    /// Delay between binding an actor and the first sweep
    #[serde(default = "default_sweep_grace_secs")]
    pub sweep_grace_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Render every emitted envelope to stderr
    #[serde(default = "default_console_echo")]
    pub console_echo: bool,

    // Remote store
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default)]
    pub remote_token: Option<String>,

    // Aggregation
    #[serde(default = "default_top_issues")]
    pub top_issues: usize,

    #[serde(default = "default_recent_errors")]
    pub recent_errors: usize,

    #[serde(default = "default_examples_per_issue")]
    pub examples_per_issue: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ring_buffer_capacity() -> usize {
    500
}

fn default_batch_max_size() -> usize {
    10
}

fn default_batch_idle_ms() -> u64 {
    5_000
}

fn default_periodic_flush_secs() -> u64 {
    60
}

fn default_sweep_grace_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_retention_days() -> u64 {
    30
}

fn default_console_echo() -> bool {
    true
}

fn default_top_issues() -> usize {
    10
}

fn default_recent_errors() -> usize {
    20
}

fn default_examples_per_issue() -> usize {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            build_mode: BuildMode::default(),
            cache_path: None,
            ring_buffer_capacity: default_ring_buffer_capacity(),
            batch_max_size: default_batch_max_size(),
            batch_idle_ms: default_batch_idle_ms(),
            periodic_flush_secs: default_periodic_flush_secs(),
            sweep_grace_secs: default_sweep_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_days: default_retention_days(),
            console_echo: default_console_echo(),
            remote_url: None,
            remote_token: None,
            top_issues: default_top_issues(),
            recent_errors: default_recent_errors(),
            examples_per_issue: default_examples_per_issue(),
        }
    }
}

impl PipelineConfig {
    /// Load from `BEACON_*` environment variables, e.g. `BEACON_BATCH_MAX_SIZE`.
    pub fn from_env() -> Result<Self> {
        Ok(Config::builder()
            .add_source(Environment::with_prefix("BEACON"))
            .build()?
            .try_deserialize()?)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(get_cache_db_path)
    }

    pub fn batch_idle(&self) -> Duration {
        Duration::from_millis(self.batch_idle_ms)
    }

    pub fn periodic_flush(&self) -> Duration {
        Duration::from_secs(self.periodic_flush_secs)
    }

    pub fn sweep_grace(&self) -> Duration {
        Duration::from_secs(self.sweep_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_days as i64 * MS_PER_DAY
    }
}

//! Worker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// What to do with a batch that keeps failing validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PoisonPolicy {
    /// Never acknowledge a rejected batch; it is redelivered every cycle.
    #[default]
    Retry,
    /// After `after_attempts` consecutive rejections of the same batch,
    /// record it in `rejected_batches` and commit past it.
    Quarantine { after_attempts: u32 },
}

fn validate_poison_policy(policy: &PoisonPolicy) -> Result<(), ValidationError> {
    match policy {
        PoisonPolicy::Quarantine { after_attempts: 0 } => {
            Err(ValidationError::new("after_attempts_must_be_positive"))
        }
        _ => Ok(()),
    }
}

/// Cycle controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CycleConfig {
    /// Maximum records per fetch
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 100000))]
    pub batch_size: usize,
    /// How long a fetch waits for records
    #[serde(default = "default_poll_timeout_ms")]
    #[validate(range(min = 1, max = 600000))]
    pub poll_timeout_ms: u64,
    /// Upper bound on each store write
    #[serde(default = "default_write_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub write_timeout_secs: u64,
    #[serde(default)]
    #[validate(custom(function = "validate_poison_policy"))]
    pub poison_policy: PoisonPolicy,
}

fn default_batch_size() -> usize {
    500
}

fn default_poll_timeout_ms() -> u64 {
    5000
}

fn default_write_timeout_secs() -> u64 {
    30
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
            write_timeout_secs: default_write_timeout_secs(),
            poison_policy: PoisonPolicy::default(),
        }
    }
}

impl CycleConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    #[serde(default = "default_cycle_interval_secs")]
    #[validate(range(min = 1))]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_quality_interval_secs")]
    #[validate(range(min = 1))]
    pub quality_interval_secs: u64,
    /// Trailing window the quality gate inspects
    #[serde(default = "default_quality_window_hours")]
    #[validate(range(min = 1, max = 8760))]
    pub quality_window_hours: u64,
    #[serde(default = "default_metrics_log_interval_secs")]
    #[validate(range(min = 1))]
    pub metrics_log_interval_secs: u64,
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_quality_interval_secs() -> u64 {
    3600
}

fn default_quality_window_hours() -> u64 {
    24
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            quality_interval_secs: default_quality_interval_secs(),
            quality_window_hours: default_quality_window_hours(),
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn quality_interval(&self) -> Duration {
        Duration::from_secs(self.quality_interval_secs)
    }

    pub fn quality_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.quality_window_hours as i64)
    }

    pub fn metrics_log_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_log_interval_secs)
    }
}

use std::time::Duration;

use diffserver_core::feather::{FeatherParams, DEFAULT_FEATHER_RADIUS};

/// Default number of remote tasks allowed to be outstanding at once.
pub const DEFAULT_MAX_INFLIGHT: usize = 30;

/// Default worker count for each pool.
pub const DEFAULT_WORKERS: usize = 8;

/// Default bound of each pool's queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default time a task may wait for its callback.
pub const DEFAULT_TASK_DEADLINE_SECS: u64 = 30 * 60;

/// Default period of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Tuning for the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Admission capacity.
    pub max_inflight: usize,
    /// Workers dispatching submissions.
    pub submit_workers: usize,
    /// Workers finishing callbacks (download, feather, save).
    pub callback_workers: usize,
    /// Bound of each pool's queue.
    pub queue_capacity: usize,
    /// `None` disables expiry.
    pub task_deadline: Option<Duration>,
    pub sweep_interval: Duration,
    /// Applied to every patch result before it is saved.
    pub feather: FeatherParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_inflight: DEFAULT_MAX_INFLIGHT,
            submit_workers: DEFAULT_WORKERS,
            callback_workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            task_deadline: Some(Duration::from_secs(DEFAULT_TASK_DEADLINE_SECS)),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            feather: FeatherParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable values fall back to their defaults. Counts
    /// are raised to at least 1.
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `PIPELINE_MAX_INFLIGHT`         | `30`    |
    /// | `PIPELINE_SUBMIT_WORKERS`       | `8`     |
    /// | `PIPELINE_CALLBACK_WORKERS`     | `8`     |
    /// | `PIPELINE_QUEUE_CAPACITY`       | `256`   |
    /// | `PIPELINE_TASK_DEADLINE_SECS`   | `1800` (`0` disables expiry) |
    /// | `PIPELINE_SWEEP_INTERVAL_SECS`  | `30`    |
    /// | `FEATHER_RADIUS`                | `8`     |
    /// | `FEATHER_SHRINK`                | `0`     |
    /// | `FEATHER_GAMMA`                 | unset   |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|v| v.trim().parse().ok())
        }

        let count = |key: &str, default: usize| -> usize {
            parsed(lookup(key)).unwrap_or(default).max(1)
        };

        let deadline_secs: u64 =
            parsed(lookup("PIPELINE_TASK_DEADLINE_SECS")).unwrap_or(DEFAULT_TASK_DEADLINE_SECS);
        let sweep_secs: u64 = parsed(lookup("PIPELINE_SWEEP_INTERVAL_SECS"))
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
            .max(1);

        Self {
            max_inflight: count("PIPELINE_MAX_INFLIGHT", DEFAULT_MAX_INFLIGHT),
            submit_workers: count("PIPELINE_SUBMIT_WORKERS", DEFAULT_WORKERS),
            callback_workers: count("PIPELINE_CALLBACK_WORKERS", DEFAULT_WORKERS),
            queue_capacity: count("PIPELINE_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            task_deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            sweep_interval: Duration::from_secs(sweep_secs),
            feather: FeatherParams {
                radius: parsed(lookup("FEATHER_RADIUS")).unwrap_or(DEFAULT_FEATHER_RADIUS),
                shrink: parsed(lookup("FEATHER_SHRINK")).unwrap_or(0),
                gamma: parsed::<f32>(lookup("FEATHER_GAMMA")).filter(|g| g.is_finite()),
            },
        }
    }
}

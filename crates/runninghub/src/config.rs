use std::time::Duration;

use crate::workflow::Workflows;

/// Default RunningHub endpoint.
pub const DEFAULT_API_BASE: &str = "https://www.runninghub.cn";

/// Default per-request timeout for uploads, task creation, and downloads.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connection settings for the RunningHub API.
#[derive(Debug, Clone)]
pub struct RunningHubConfig {
    /// Base URL, e.g. `https://www.runninghub.cn`.
    pub api_base: String,
    /// Account API key sent with every request.
    pub api_key: String,
    /// Workflow ids for whole-image and patch tasks.
    pub workflows: Workflows,
    /// URL RunningHub POSTs completion callbacks to.
    pub webhook_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// A required setting was absent or unparseable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

impl RunningHubConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                       | Default                     |
    /// |-------------------------------|-----------------------------|
    /// | `RUNNINGHUB_API_BASE`         | `https://www.runninghub.cn` |
    /// | `RUNNINGHUB_API_KEY`          | required                    |
    /// | `RUNNINGHUB_WORKFLOW_WHOLE`   | required                    |
    /// | `RUNNINGHUB_WORKFLOW_BATCH`   | required                    |
    /// | `RUNNINGHUB_WEBHOOK_URL`      | required                    |
    /// | `RUNNINGHUB_TIMEOUT_SECS`     | `60`                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let timeout_secs = match lookup("RUNNINGHUB_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "RUNNINGHUB_TIMEOUT_SECS",
                value: raw,
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_base: lookup("RUNNINGHUB_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.into())
                .trim_end_matches('/')
                .to_string(),
            api_key: required("RUNNINGHUB_API_KEY")?,
            workflows: Workflows {
                whole_image: required("RUNNINGHUB_WORKFLOW_WHOLE")?,
                batch: required("RUNNINGHUB_WORKFLOW_BATCH")?,
            },
            webhook_url: required("RUNNINGHUB_WEBHOOK_URL")?,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

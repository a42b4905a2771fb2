//! Engine configuration from YAML

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of days an execution stays retryable
pub const DEFAULT_RETRY_HORIZON_DAYS: i64 = 30;

/// Upper bound accepted for `retry_horizon_days`
pub const MAX_RETRY_HORIZON_DAYS: i64 = 36_500;

/// Top-level configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanConfig {
    /// Executions older than this many days cannot be retried
    #[serde(default = "default_retry_horizon_days")]
    pub retry_horizon_days: i64,

    /// SQLite database holding execution records
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_retry_horizon_days() -> i64 {
    DEFAULT_RETRY_HORIZON_DAYS
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            retry_horizon_days: DEFAULT_RETRY_HORIZON_DAYS,
            database_path: None,
        }
    }
}

impl ReplanConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ReplanConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_horizon_days <= 0 {
            anyhow::bail!(
                "retry_horizon_days must be positive, got {}",
                self.retry_horizon_days
            );
        }
        if self.retry_horizon_days > MAX_RETRY_HORIZON_DAYS {
            anyhow::bail!(
                "retry_horizon_days must be at most {}, got {}",
                MAX_RETRY_HORIZON_DAYS,
                self.retry_horizon_days
            );
        }

        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                anyhow::bail!("database_path must not be empty");
            }
        }

        Ok(())
    }

    /// Retry horizon as a duration, saturating for out-of-range values
    pub fn retry_horizon(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.retry_horizon_days).unwrap_or(chrono::Duration::MAX)
    }

    /// Database path, falling back to the user's local data directory
    pub fn resolved_database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("replan")
                .join("executions.db"),
        }
    }
}

//! Core configuration
//!
//! Persisted as pretty JSON. A missing file means defaults.

use crate::fiber::DEFAULT_STACK_SIZE;
use crate::random::Entropy;
use crate::scheduler::SchedulerSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode config for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Stack size for every clock domain context
    pub stack_size: usize,
    /// Master ticks a domain may run ahead before yielding
    pub slack_ticks: i64,
    /// Abort when a domain runs this many ticks ahead without yielding
    pub drift_limit: Option<i64>,
    /// Power-on seed; `None` derives one from the wall clock
    pub seed: Option<u64>,
    pub entropy: Entropy,
    pub run_ahead: bool,
    /// Written into snapshot headers
    pub description: String,
    /// Frames buffered between the core and the presentation worker
    pub presentation_depth: usize,
    pub rewind_enabled: bool,
    /// Rewind ring capacity in snapshots
    pub rewind_frames: usize,
    /// Frames between rewind snapshots
    pub rewind_interval: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            slack_ticks: 0,
            drift_limit: None,
            seed: None,
            entropy: Entropy::Low,
            run_ahead: false,
            description: String::new(),
            presentation_depth: 3,
            rewind_enabled: true,
            rewind_frames: 600,
            rewind_interval: 2,
        }
    }
}

impl CoreConfig {
    /// Load from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Encode {
            path: path.to_path_buf(),
            source,
        })?;

        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slack_ticks < 0 {
            return Err(ConfigError::Invalid("slack_ticks must not be negative".into()));
        }
        if matches!(self.drift_limit, Some(limit) if limit <= self.slack_ticks) {
            return Err(ConfigError::Invalid(
                "drift_limit must exceed slack_ticks".into(),
            ));
        }
        if self.presentation_depth == 0 {
            return Err(ConfigError::Invalid("presentation_depth must be at least 1".into()));
        }
        if self.rewind_interval == 0 {
            return Err(ConfigError::Invalid("rewind_interval must be at least 1".into()));
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            stack_size: self.stack_size,
            slack_ticks: self.slack_ticks,
            drift_limit: self.drift_limit,
        }
    }

    /// Configured seed, or one derived from the wall clock
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos() as u64)
                .unwrap_or(0)
        })
    }
}

/// `<config dir>/lockstep/config.json`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lockstep")
        .join("config.json")
}

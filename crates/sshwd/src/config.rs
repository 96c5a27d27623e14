//! Daemon tunables loaded from `server.toml`.
//!
//! ```toml
//! idle_timeout_secs = 600
//! reap_interval_ms = 1000
//! ```
//!
//! A missing file means defaults; unknown keys are rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::{RegistryConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_REAP_INTERVAL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Idle time before an unreferenced cached connection is closed.
    pub idle_timeout_secs: u64,

    /// Reaper tick.
    pub reap_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            reap_interval_ms: DEFAULT_REAP_INTERVAL.as_millis() as u64,
        }
    }
}

impl DaemonConfig {
    /// Loads and validates the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be positive".into()));
        }
        if self.reap_interval_ms == 0 {
            return Err(ConfigError::Invalid("reap_interval_ms must be positive".into()));
        }
        if self.reap_interval() >= self.idle_timeout() {
            return Err(ConfigError::Invalid(
                "reap_interval_ms must be shorter than idle_timeout_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            idle_timeout: self.idle_timeout(),
            reap_interval: self.reap_interval(),
        }
    }
}

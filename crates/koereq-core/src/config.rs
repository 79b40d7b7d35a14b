//! Sync configuration.
//!
//! # Example
//!
//! ```
//! use koereq_core::SyncConfig;
//!
//! let config = SyncConfig::from_json(r#"{"submit_timeout_ms": 5000}"#).unwrap();
//! assert_eq!(config.submit_timeout().as_millis(), 5000);
//! assert_eq!(config.periodic_interval().as_secs(), 60);
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Configuration for the sync engine and scheduler.
///
/// Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Upper bound for one remote submission (default: 15 s)
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    /// Polling fallback interval for pending records (default: 60 s)
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,

    /// Base URL of the remote request service, for the HTTP client
    #[serde(default)]
    pub remote_base_url: Option<String>,

    /// Bearer token sent with HTTP submissions
    #[serde(default)]
    pub auth_token: Option<String>,

    /// `host:port` probed by the TCP reachability monitor
    #[serde(default)]
    pub probe_address: Option<String>,

    /// Interval between reachability probes (default: 10 s)
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

fn default_submit_timeout_ms() -> u64 {
    15_000
}
fn default_periodic_interval_secs() -> u64 {
    60
}
fn default_probe_interval_secs() -> u64 {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: default_submit_timeout_ms(),
            periodic_interval_secs: default_periodic_interval_secs(),
            remote_base_url: None,
            auth_token: None,
            probe_address: None,
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.submit_timeout_ms == 0 {
            return Err(ConfigError::Zero("submit_timeout_ms"));
        }
        if self.periodic_interval_secs == 0 {
            return Err(ConfigError::Zero("periodic_interval_secs"));
        }
        if self.probe_interval_secs == 0 {
            return Err(ConfigError::Zero("probe_interval_secs"));
        }
        Ok(())
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Short timeouts for tests
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            submit_timeout_ms: 50,
            periodic_interval_secs: 1,
            probe_interval_secs: 1,
            ..Default::default()
        }
    }
}

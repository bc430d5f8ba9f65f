//! Server settings file read by `resumify-api --config <path>`.
//!
//! This is the fixed configuration file the deploy launcher points the service
//! at. Worker count lives here too but the launcher always overrides it with
//! `--workers`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("Failed to read server config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid server config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid server config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub workers: u16,
    pub timeout_secs: u64,
    pub graceful_shutdown_secs: u64,
    pub access_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            workers: 2,
            timeout_secs: 60,
            graceful_shutdown_secs: 30,
            access_log: true,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ServerConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServerConfig = toml::from_str(&raw).map_err(|source| ServerConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.workers == 0 {
            return Err(ServerConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ServerConfigError::Invalid("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Applies command-line and environment overrides on top of the file.
    pub fn with_overrides(mut self, workers: Option<u16>, port: Option<u16>) -> Self {
        if let Some(workers) = workers.filter(|w| *w > 0) {
            self.workers = workers;
        }
        if let Some(port) = port {
            self.bind.set_port(port);
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_secs)
    }
}

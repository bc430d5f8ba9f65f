//! Service launcher: the terminal deploy stage.
//!
//! Runs `<service-bin> --config <server-file> --workers <N>` with the resolved
//! settings in the child's environment and blocks until it exits. There is no
//! restart logic; supervision belongs to whatever runs the deploy tool.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::deploy::pipeline::{Stage, StageError};
use crate::environment::DeploymentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    NotStarted,
    Launching,
    Running { pid: Option<u32> },
    Terminated { code: Option<i32> },
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchState::NotStarted => f.write_str("not started"),
            LaunchState::Launching => f.write_str("launching"),
            LaunchState::Running { .. } => f.write_str("running"),
            LaunchState::Terminated { .. } => f.write_str("terminated"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service exited unsuccessfully (code {code:?})")]
    Exited { code: Option<i32> },

    #[error("launcher cannot move from {from} to {to}")]
    InvalidTransition { from: LaunchState, to: LaunchState },
}

pub struct Launcher {
    service_bin: PathBuf,
    server_config: PathBuf,
    work_dir: Option<PathBuf>,
    redis_url: Option<String>,
    state: Mutex<LaunchState>,
}

impl Launcher {
    pub fn new(service_bin: impl Into<PathBuf>, server_config: impl Into<PathBuf>) -> Self {
        Self {
            service_bin: service_bin.into(),
            server_config: server_config.into(),
            work_dir: None,
            redis_url: None,
            state: Mutex::new(LaunchState::NotStarted),
        }
    }

    /// Directory the service starts in; `server_config` resolves against it.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Cache endpoint exported as `REDIS_URL`, the same one the deploy
    /// tool checked.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn state(&self) -> LaunchState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, to: LaunchState) -> Result<(), LaunchError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let allowed = matches!(
            (*state, to),
            (LaunchState::NotStarted, LaunchState::Launching)
                | (LaunchState::Launching, LaunchState::Running { .. })
                | (LaunchState::Launching, LaunchState::Terminated { .. })
                | (LaunchState::Running { .. }, LaunchState::Terminated { .. })
        );
        if !allowed {
            return Err(LaunchError::InvalidTransition { from: *state, to });
        }
        *state = to;
        Ok(())
    }

    pub fn command(&self, config: &DeploymentConfig) -> Command {
        let mut command = Command::new(&self.service_bin);
        command
            .arg("--config")
            .arg(&self.server_config)
            .arg("--workers")
            .arg(config.workers.to_string())
            .envs(config.env_vars());
        if let Some(url) = &self.redis_url {
            command.env("REDIS_URL", url);
        }
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Spawns the service and waits for it to exit.
    pub async fn launch(&self, config: &DeploymentConfig) -> Result<(), LaunchError> {
        self.transition(LaunchState::Launching)?;
        info!(
            "Launching {} with {} workers ({} environment)",
            self.service_bin.display(),
            config.workers,
            config.environment
        );

        let mut child = match self.command(config).spawn() {
            Ok(child) => child,
            Err(source) => {
                self.transition(LaunchState::Terminated { code: None })?;
                return Err(LaunchError::Spawn {
                    program: self.service_bin.display().to_string(),
                    source,
                });
            }
        };

        let pid = child.id();
        self.transition(LaunchState::Running { pid })?;
        info!("Service running (pid {pid:?})");

        let status = child.wait().await;
        let code = status.as_ref().ok().and_then(|s| s.code());
        self.transition(LaunchState::Terminated { code })?;

        match status {
            Ok(status) if status.success() => {
                info!("Service exited cleanly");
                Ok(())
            }
            Ok(_) => {
                warn!("Service exited with code {code:?}");
                Err(LaunchError::Exited { code })
            }
            Err(source) => Err(LaunchError::Spawn {
                program: self.service_bin.display().to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl Stage for Launcher {
    fn name(&self) -> &'static str {
        "launch"
    }

    async fn run(&self, config: &DeploymentConfig) -> Result<(), StageError> {
        self.launch(config).await?;
        Ok(())
    }
}

//! Ordered deploy stages.
//!
//! Stages run one after another against the same `DeploymentConfig`. A stage
//! that fails with `FailurePolicy::Abort` stops the run and is named in the
//! error; `FailurePolicy::Degrade` logs a warning and moves on.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::CacheError;
use crate::deploy::command::CommandError;
use crate::deploy::launcher::LaunchError;
use crate::deploy::provision::ProvisionError;
use crate::environment::DeploymentConfig;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::StageFailed { stage, .. } => stage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Abort,
    Degrade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: &'static str,
    pub status: StageStatus,
}

/// One named step of the deploy procedure.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Abort
    }

    async fn run(&self, config: &DeploymentConfig) -> Result<(), StageError>;
}

#[async_trait]
impl<S: Stage + ?Sized> Stage for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn failure_policy(&self) -> FailurePolicy {
        (**self).failure_policy()
    }

    async fn run(&self, config: &DeploymentConfig) -> Result<(), StageError> {
        (**self).run(config).await
    }
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, config: &DeploymentConfig) -> Result<Vec<StageReport>, PipelineError> {
        let mut reports = Vec::with_capacity(self.stages.len());
        let total = self.stages.len();

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            info!("[{}/{}] {}", index + 1, total, name);

            let status = match stage.run(config).await {
                Ok(()) => StageStatus::Completed,
                Err(e) => match stage.failure_policy() {
                    FailurePolicy::Abort => {
                        return Err(PipelineError::StageFailed {
                            stage: name,
                            source: e,
                        })
                    }
                    FailurePolicy::Degrade => {
                        warn!("{name} failed, continuing in degraded mode: {e}");
                        StageStatus::Degraded(e.to_string())
                    }
                },
            };
            reports.push(StageReport {
                stage: name,
                status,
            });
        }

        Ok(reports)
    }
}

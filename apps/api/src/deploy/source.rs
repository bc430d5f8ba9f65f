use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::deploy::command::CommandSpec;
use crate::deploy::pipeline::{Stage, StageError};
use crate::environment::DeploymentConfig;

/// Pulls the latest code into the working tree before provisioning.
pub struct SourceSync {
    dir: PathBuf,
    command: CommandSpec,
}

impl SourceSync {
    pub fn git_pull(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            command: CommandSpec {
                program: "git".to_string(),
                args: vec!["pull".to_string()],
            },
        }
    }
}

#[async_trait]
impl Stage for SourceSync {
    fn name(&self) -> &'static str {
        "source-sync"
    }

    async fn run(&self, _config: &DeploymentConfig) -> Result<(), StageError> {
        info!("Pulling latest code in {}", self.dir.display());
        self.command.run(Some(&self.dir)).await?;
        Ok(())
    }
}

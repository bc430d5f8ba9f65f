use std::fmt;
use std::path::Path;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: ExitStatus },
}

/// A program plus arguments, parsed from a whitespace-separated command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Runs to completion with inherited stdio. Non-zero exit is an error.
    pub async fn run(&self, dir: Option<&Path>) -> Result<(), CommandError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        debug!("Running `{self}`");

        let status = command.status().await.map_err(|source| CommandError::Spawn {
            command: self.to_string(),
            source,
        })?;
        if !status.success() {
            return Err(CommandError::Failed {
                command: self.to_string(),
                status,
            });
        }
        Ok(())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

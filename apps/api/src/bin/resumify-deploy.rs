use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use resumify_api::deploy::command::CommandSpec;
use resumify_api::deploy::pipeline::StageStatus;
use resumify_api::deploy::provision::{
    ModelArtifact, DEFAULT_INSTALL_COMMAND, DEFAULT_MODEL_NAME, DEFAULT_MODEL_URL,
};
use resumify_api::deploy::{build_pipeline, DeployOptions};
use resumify_api::environment::DeploymentConfig;
use resumify_api::logging::init_cli_logging;

/// Provision and launch the Resumify API for a deployment environment.
#[derive(Debug, Parser)]
#[command(name = "resumify-deploy", version)]
struct Cli {
    /// production, staging or development. Anything else is treated as development.
    environment: Option<String>,

    /// Run `git pull` in the working directory first.
    #[arg(long)]
    pull: bool,

    /// Working directory for source sync, install, model storage and launch.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Installs the pinned dependency set. Empty skips the step.
    #[arg(long, env = "RESUMIFY_INSTALL_COMMAND", default_value = DEFAULT_INSTALL_COMMAND)]
    install_command: String,

    #[arg(long, env = "RESUMIFY_MODEL_NAME", default_value = DEFAULT_MODEL_NAME)]
    model_name: String,

    #[arg(long, env = "RESUMIFY_MODEL_URL", default_value = DEFAULT_MODEL_URL)]
    model_url: String,

    #[arg(long, env = "RESUMIFY_MODEL_DIR", default_value = "models")]
    model_dir: PathBuf,

    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379/0")]
    redis_url: String,

    #[arg(long, default_value_t = 2000)]
    probe_timeout_ms: u64,

    /// Service binary to launch.
    #[arg(long, default_value = "resumify-api")]
    service_bin: PathBuf,

    /// Server settings file handed to the service.
    #[arg(long, default_value = "server.toml")]
    server_config: PathBuf,
}

impl Cli {
    fn options(&self) -> DeployOptions {
        DeployOptions {
            pull: self.pull,
            work_dir: self.work_dir.clone(),
            install: CommandSpec::parse(&self.install_command),
            model: ModelArtifact {
                name: self.model_name.clone(),
                url: self.model_url.clone(),
                dir: self.model_dir.clone(),
            },
            redis_url: self.redis_url.clone(),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            service_bin: self.service_bin.clone(),
            server_config: self.server_config.clone(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_cli_logging();

    let config = DeploymentConfig::from_arg(cli.environment.as_deref());
    info!(
        "Deploying for {}: cache max memory {}, log level {}, {} workers",
        config.environment, config.cache_max_memory, config.log_level, config.workers
    );

    let (pipeline, _launcher) =
        build_pipeline(&cli.options()).context("Failed to initialise deploy stages")?;

    match pipeline.run(&config).await {
        Ok(reports) => {
            for report in reports {
                if let StageStatus::Degraded(reason) = report.status {
                    info!("{} finished degraded: {reason}", report.stage);
                }
            }
            Ok(())
        }
        Err(e) => {
            error!("Deploy aborted at stage '{}'", e.stage());
            Err(e.into())
        }
    }
}

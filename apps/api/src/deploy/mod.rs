//! Deploy procedure: resolve the label, optionally sync source, provision,
//! check the cache, then launch the service.
//!
//! The resolved `DeploymentConfig` is the only state shared between stages.
//! Install, model storage and launch all happen in `work_dir`, where source
//! sync pulled.

pub mod command;
pub mod launcher;
pub mod pipeline;
pub mod probe;
pub mod provision;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::deploy::command::CommandSpec;
use crate::deploy::launcher::Launcher;
use crate::deploy::pipeline::Pipeline;
use crate::deploy::probe::CacheProbe;
use crate::deploy::provision::{ModelArtifact, Provisioner};
use crate::deploy::source::SourceSync;

/// Everything the deploy tool needs besides the deployment label.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub pull: bool,
    pub work_dir: PathBuf,
    pub install: Option<CommandSpec>,
    pub model: ModelArtifact,
    pub redis_url: String,
    pub probe_timeout: Duration,
    pub service_bin: PathBuf,
    pub server_config: PathBuf,
}

/// Assembles the stages in their fixed order. The launcher is returned
/// alongside so callers can inspect its final state.
pub fn build_pipeline(opts: &DeployOptions) -> Result<(Pipeline, Arc<Launcher>), reqwest::Error> {
    let launcher = Arc::new(
        Launcher::new(&opts.service_bin, &opts.server_config)
            .with_work_dir(&opts.work_dir)
            .with_redis_url(&opts.redis_url),
    );
    let provisioner = Provisioner::new(
        opts.install.clone(),
        opts.model.clone().rooted_at(&opts.work_dir),
    )?
    .with_work_dir(&opts.work_dir);

    let mut pipeline = Pipeline::new();
    if opts.pull {
        pipeline = pipeline.stage(SourceSync::git_pull(&opts.work_dir));
    }
    let pipeline = pipeline
        .stage(provisioner)
        .stage(CacheProbe::new(opts.redis_url.clone(), opts.probe_timeout))
        .stage(launcher.clone());

    Ok((pipeline, launcher))
}

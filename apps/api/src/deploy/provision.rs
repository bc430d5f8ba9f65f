//! Dependency provisioning: pinned dependency install, then the NLP model
//! artifact. Both are fatal on failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::deploy::command::{CommandError, CommandSpec};
use crate::deploy::pipeline::{Stage, StageError};
use crate::environment::DeploymentConfig;

pub const DEFAULT_INSTALL_COMMAND: &str = "cargo fetch --locked";
pub const DEFAULT_MODEL_NAME: &str = "en_core_web_sm";
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/spacy/en_core_web_sm/resolve/main/en_core_web_sm-any-py3-none-any.whl";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("dependency install failed: {0}")]
    Install(#[from] CommandError),

    #[error("model download from {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("model download from {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("model artifact I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A downloadable model file, stored as `<dir>/<name>/<file name from url>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub name: String,
    pub url: String,
    pub dir: PathBuf,
}

impl ModelArtifact {
    /// Anchors a relative `dir` under `base`; absolute dirs are kept.
    pub fn rooted_at(mut self, base: &Path) -> Self {
        if self.dir.is_relative() {
            self.dir = base.join(&self.dir);
        }
        self
    }

    pub fn path(&self) -> PathBuf {
        let file_name = self
            .url
            .rsplit('/')
            .next()
            .map(|segment| segment.split(['?', '#']).next().unwrap_or(segment))
            .filter(|segment| !segment.is_empty())
            .unwrap_or(self.name.as_str());
        self.dir.join(&self.name).join(file_name)
    }

    /// Present means a non-empty file at `path()`.
    pub async fn is_present(&self) -> bool {
        tokio::fs::metadata(self.path())
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }
}

pub struct Provisioner {
    install: Option<CommandSpec>,
    model: ModelArtifact,
    work_dir: Option<PathBuf>,
    http: Client,
}

impl Provisioner {
    pub fn new(install: Option<CommandSpec>, model: ModelArtifact) -> Result<Self, reqwest::Error> {
        Ok(Self {
            install,
            model,
            work_dir: None,
            http: Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?,
        })
    }

    /// Directory the install command runs in.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub async fn install_dependencies(&self) -> Result<(), ProvisionError> {
        match &self.install {
            Some(command) => {
                info!("Installing pinned dependencies: {command}");
                command.run(self.work_dir.as_deref()).await?;
                info!("Dependencies installed");
            }
            None => warn!("No install command configured; skipping dependency install"),
        }
        Ok(())
    }

    pub async fn ensure_model(&self) -> Result<PathBuf, ProvisionError> {
        let path = self.model.path();
        if self.model.is_present().await {
            info!("Model {} already present at {}", self.model.name, path.display());
            return Ok(path);
        }

        info!("Downloading model {} from {}", self.model.name, self.model.url);
        let bytes = self.fetch().await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &bytes).await.map_err(io_error(&partial))?;
        tokio::fs::rename(&partial, &path).await.map_err(io_error(&path))?;

        info!("Model {} saved to {} ({} bytes)", self.model.name, path.display(), bytes.len());
        Ok(path)
    }

    async fn fetch(&self) -> Result<Vec<u8>, ProvisionError> {
        let download_err = |source| ProvisionError::Download {
            url: self.model.url.clone(),
            source,
        };
        let response = self
            .http
            .get(&self.model.url)
            .send()
            .await
            .map_err(download_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::Status {
                url: self.model.url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(download_err)?;
        Ok(bytes.to_vec())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProvisionError {
    let path = path.to_path_buf();
    move |source| ProvisionError::Io { path, source }
}

#[async_trait]
impl Stage for Provisioner {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&self, _config: &DeploymentConfig) -> Result<(), StageError> {
        self.install_dependencies().await?;
        self.ensure_model().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(dir: &Path, url: &str) -> ModelArtifact {
        ModelArtifact {
            name: DEFAULT_MODEL_NAME.to_string(),
            url: url.to_string(),
            dir: dir.to_path_buf(),
        }
    }

    async fn seed(model: &ModelArtifact) {
        let path = model.path();
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"wheel").await.unwrap();
    }

    #[test]
    fn test_path_uses_url_file_name() {
        let model = artifact(Path::new("models"), DEFAULT_MODEL_URL);
        assert_eq!(
            model.path(),
            PathBuf::from("models/en_core_web_sm/en_core_web_sm-any-py3-none-any.whl")
        );
    }

    #[test]
    fn test_path_ignores_query_and_falls_back_to_name() {
        let with_query = artifact(Path::new("m"), "https://host/files/model.bin?download=1");
        assert_eq!(with_query.path(), PathBuf::from("m/en_core_web_sm/model.bin"));

        let bare = artifact(Path::new("m"), "https://host/files/");
        assert_eq!(bare.path(), PathBuf::from("m/en_core_web_sm/en_core_web_sm"));
    }

    #[tokio::test]
    async fn test_present_model_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        // Unroutable URL: any download attempt would fail the test.
        let model = artifact(dir.path(), "http://127.0.0.1:1/model.whl");
        seed(&model).await;

        let provisioner = Provisioner::new(None, model.clone()).unwrap();
        assert_eq!(provisioner.ensure_model().await.unwrap(), model.path());
    }

    #[tokio::test]
    async fn test_empty_model_file_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let model = artifact(dir.path(), "http://127.0.0.1:1/model.whl");
        tokio::fs::create_dir_all(model.path().parent().unwrap()).await.unwrap();
        tokio::fs::write(model.path(), b"").await.unwrap();

        let provisioner = Provisioner::new(None, model.clone()).unwrap();
        let err = provisioner.ensure_model().await.unwrap_err();
        assert!(matches!(err, ProvisionError::Download { .. }));
        assert!(!model.path().with_extension("part").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let model = artifact(dir.path(), "http://127.0.0.1:1/model.whl");
        seed(&model).await;

        let provisioner = Provisioner::new(CommandSpec::parse("false"), model).unwrap();
        let result = provisioner
            .run(&DeploymentConfig::resolve("production"))
            .await;
        assert!(matches!(
            result,
            Err(StageError::Provision(ProvisionError::Install(_)))
        ));
    }

    #[test]
    fn test_relative_model_dir_is_rooted_at_work_dir() {
        let relative = artifact(Path::new("models"), DEFAULT_MODEL_URL);
        assert_eq!(
            relative.rooted_at(Path::new("/srv/resumify")).dir,
            PathBuf::from("/srv/resumify/models")
        );

        let absolute = artifact(Path::new("/opt/models"), DEFAULT_MODEL_URL);
        assert_eq!(
            absolute.rooted_at(Path::new("/srv/resumify")).dir,
            PathBuf::from("/opt/models")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let model = artifact(dir.path(), "http://127.0.0.1:1/model.whl");
        seed(&model).await;

        let provisioner = Provisioner::new(CommandSpec::parse("touch installed.marker"), model)
            .unwrap()
            .with_work_dir(dir.path());
        provisioner.install_dependencies().await.unwrap();
        assert!(dir.path().join("installed.marker").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_then_present_model_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let model = artifact(dir.path(), "http://127.0.0.1:1/model.whl");
        seed(&model).await;

        let provisioner = Provisioner::new(CommandSpec::parse("true"), model).unwrap();
        assert!(provisioner
            .run(&DeploymentConfig::resolve("staging"))
            .await
            .is_ok());
    }
}

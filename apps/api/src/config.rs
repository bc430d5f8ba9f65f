use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::environment::{DeploymentEnv, LogLevel};

pub const DEFAULT_SECRET_KEY: &str = "dev-secret-key-change-in-production";
const DEFAULT_MAX_UPLOAD_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_REDIS_EXPIRATION_SECS: u64 = 1800;

/// Service configuration loaded from environment variables.
/// Every variable has a default; malformed values abort startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: DeploymentEnv,
    pub secret_key: String,
    pub debug: bool,
    pub upload_folder: PathBuf,
    pub max_upload_size: usize,
    pub redis_url: String,
    pub redis_max_memory: String,
    pub redis_expiration_secs: u64,
    pub huggingface_api_token: Option<String>,
    pub openai_api_key: Option<String>,
    /// Empty means any origin (`CORS_ORIGINS=*`).
    pub cors_origins: Vec<String>,
    pub log_level: LogLevel,
    pub log_dir: PathBuf,
    /// Overrides the port of the server file's bind address when set.
    pub port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = var("APP_ENV")
            .map(|label| DeploymentEnv::from_label(label.trim()))
            .unwrap_or(DeploymentEnv::Production);

        let log_level = match var("LOG_LEVEL") {
            Some(raw) => LogLevel::parse(&raw)
                .with_context(|| format!("LOG_LEVEL '{raw}' is not a known log level"))?,
            None => LogLevel::Info,
        };

        Ok(Config {
            environment,
            secret_key: var("SECRET_KEY").unwrap_or_else(|| DEFAULT_SECRET_KEY.to_string()),
            debug: var("DEBUG").is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            upload_folder: var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp")),
            max_upload_size: parse_or("MAX_UPLOAD_SIZE", var("MAX_UPLOAD_SIZE"), DEFAULT_MAX_UPLOAD_SIZE)?,
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379/0".to_string()),
            redis_max_memory: var("REDIS_MAX_MEMORY").unwrap_or_else(|| "25mb".to_string()),
            redis_expiration_secs: parse_or(
                "REDIS_EXPIRATION",
                var("REDIS_EXPIRATION"),
                DEFAULT_REDIS_EXPIRATION_SECS,
            )?,
            huggingface_api_token: var("HUGGINGFACE_API_TOKEN"),
            openai_api_key: var("OPENAI_API_KEY"),
            cors_origins: parse_origins(var("CORS_ORIGINS").as_deref().unwrap_or("*")),
            log_level,
            log_dir: var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            port: var("PORT")
                .map(|p| {
                    p.trim()
                        .parse::<u16>()
                        .context("PORT must be a valid port number")
                })
                .transpose()?,
        })
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }

    /// `DEBUG=true` forces DEBUG verbosity regardless of `LOG_LEVEL`.
    pub fn effective_log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.redis_expiration_secs)
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has invalid value '{value}'")),
        None => Ok(default),
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    if raw.trim() == "*" {
        return Vec::new();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.environment, DeploymentEnv::Production);
        assert!(cfg.uses_default_secret());
        assert!(!cfg.debug);
        assert_eq!(cfg.max_upload_size, 16 * 1024 * 1024);
        assert_eq!(cfg.redis_url, "redis://localhost:6379/0");
        assert_eq!(cfg.redis_max_memory, "25mb");
        assert_eq!(cfg.redis_expiration_secs, 1800);
        assert!(cfg.cors_origins.is_empty());
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.log_dir, PathBuf::from("logs"));
        assert_eq!(cfg.port, None);
        assert!(cfg.openai_api_key.is_none());
    }

    #[test]
    fn test_values_exported_by_deploy_are_honoured() {
        let cfg = config_from(&[
            ("APP_ENV", "staging"),
            ("REDIS_MAX_MEMORY", "20mb"),
            ("LOG_LEVEL", "INFO"),
        ])
        .unwrap();
        assert_eq!(cfg.environment, DeploymentEnv::Staging);
        assert_eq!(cfg.redis_max_memory, "20mb");
        assert_eq!(cfg.log_level, LogLevel::Info);
    }

    #[test]
    fn test_unknown_app_env_is_development() {
        let cfg = config_from(&[("APP_ENV", "preview")]).unwrap();
        assert_eq!(cfg.environment, DeploymentEnv::Development);
    }

    #[test]
    fn test_debug_flag_forces_debug_level() {
        let cfg = config_from(&[("LOG_LEVEL", "ERROR"), ("DEBUG", "true")]).unwrap();
        assert_eq!(cfg.effective_log_level(), LogLevel::Debug);

        let cfg = config_from(&[("LOG_LEVEL", "ERROR")]).unwrap();
        assert_eq!(cfg.effective_log_level(), LogLevel::Error);
    }

    #[test]
    fn test_cache_ttl_from_redis_expiration() {
        assert_eq!(config_from(&[]).unwrap().cache_ttl(), Duration::from_secs(1800));
        assert_eq!(
            config_from(&[("REDIS_EXPIRATION", "60")]).unwrap().cache_ttl(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_debug_flag_case_insensitive() {
        assert!(config_from(&[("DEBUG", "True")]).unwrap().debug);
        assert!(!config_from(&[("DEBUG", "yes")]).unwrap().debug);
    }

    #[test]
    fn test_cors_origin_list() {
        let cfg = config_from(&[("CORS_ORIGINS", "https://a.example, https://b.example,")]).unwrap();
        assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_malformed_numbers_are_errors() {
        assert!(config_from(&[("MAX_UPLOAD_SIZE", "16MB")]).is_err());
        assert!(config_from(&[("REDIS_EXPIRATION", "-1")]).is_err());
        assert!(config_from(&[("PORT", "99999")]).is_err());
    }

    #[test]
    fn test_unknown_log_level_is_error() {
        let err = config_from(&[("LOG_LEVEL", "LOUD")]).unwrap_err();
        assert!(err.to_string().contains("LOG_LEVEL"));
    }

    #[test]
    fn test_port_override() {
        assert_eq!(config_from(&[("PORT", "5000")]).unwrap().port, Some(5000));
    }
}

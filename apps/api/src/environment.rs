//! Deployment environment resolution.
//!
//! A deployment label selects exactly one settings branch. The label is matched
//! exactly; anything unrecognized (including the empty string) lands on the
//! development branch so an unknown target never receives production limits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Label used when the deploy tool is invoked without an argument.
pub const DEFAULT_LABEL: &str = "production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEnv {
    Production,
    Staging,
    Development,
}

impl DeploymentEnv {
    /// Exact, case-sensitive match. Unknown labels fall through to development.
    pub fn from_label(label: &str) -> Self {
        match label {
            "production" => DeploymentEnv::Production,
            "staging" => DeploymentEnv::Staging,
            _ => DeploymentEnv::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentEnv::Production => "production",
            DeploymentEnv::Staging => "staging",
            DeploymentEnv::Development => "development",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, DeploymentEnv::Production)
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log verbosity exported to the service as `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Parses the names the service accepts in `LOG_LEVEL`, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ERROR" | "CRITICAL" => Some(LogLevel::Error),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache memory ceiling in megabytes. Renders as `"25mb"`, the form Redis
/// accepts for `CONFIG SET maxmemory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimit(u32);

impl MemoryLimit {
    pub const fn megabytes(mb: u32) -> Self {
        Self(mb)
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mb", self.0)
    }
}

/// Settings derived from the deployment label. Built once, then passed by
/// reference to every deploy stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentConfig {
    pub environment: DeploymentEnv,
    pub cache_max_memory: MemoryLimit,
    pub log_level: LogLevel,
    pub workers: u16,
}

impl DeploymentConfig {
    pub fn resolve(label: &str) -> Self {
        Self::for_env(DeploymentEnv::from_label(label))
    }

    /// Resolves the optional positional argument, substituting the default label.
    pub fn from_arg(arg: Option<&str>) -> Self {
        Self::resolve(arg.unwrap_or(DEFAULT_LABEL))
    }

    pub fn for_env(environment: DeploymentEnv) -> Self {
        let (cache_max_memory, log_level) = match environment {
            DeploymentEnv::Production => (MemoryLimit::megabytes(25), LogLevel::Error),
            DeploymentEnv::Staging => (MemoryLimit::megabytes(20), LogLevel::Info),
            DeploymentEnv::Development => (MemoryLimit::megabytes(10), LogLevel::Debug),
        };
        Self {
            environment,
            cache_max_memory,
            log_level,
            workers: worker_count(environment),
        }
    }

    /// Variables exported into the launched service's environment.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("APP_ENV", self.environment.as_str().to_string()),
            ("REDIS_MAX_MEMORY", self.cache_max_memory.to_string()),
            ("LOG_LEVEL", self.log_level.as_str().to_string()),
        ]
    }
}

pub fn worker_count(environment: DeploymentEnv) -> u16 {
    match environment {
        DeploymentEnv::Production => 4,
        _ => 2,
    }
}

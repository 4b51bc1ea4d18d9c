//! Service configuration defaults and helpers.
//!
//! Holds the environment variable names read by the service host, the run
//! mode, the logger section shared by every driver config file and the YAML
//! loading helpers used by [`crate::ServiceContext`].

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default location of the service config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "etc/baetyl/conf.yml";

/// Default host library path.
pub const DEFAULT_HOST_PATH_LIB: &str = "/var/lib/baetyl";

/// Environment variable names.
pub mod env_vars {
    pub const HOST_PATH_LIB: &str = "BAETYL_HOST_PATH_LIB";
    pub const RUN_MODE: &str = "BAETYL_RUN_MODE";
    pub const CONF_FILE: &str = "BAETYL_CONF_FILE";
    pub const LOG_JSON: &str = "BAETYL_LOG_JSON";
    pub const SERVICE_NAME: &str = "BAETYL_SERVICE_NAME";

    /// Whether JSON logging is forced through the environment.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// How the edge node runs its services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Plain processes on the host.
    Native,
    /// Containers scheduled by Kubernetes.
    #[default]
    Kube,
}

impl RunMode {
    /// Parse a run mode; anything unknown falls back to `kube`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" => RunMode::Native,
            "kube" | "" => RunMode::Kube,
            other => {
                tracing::warn!(run_mode = %other, "Unknown run mode, falling back to kube");
                RunMode::Kube
            }
        }
    }

    /// Read the run mode from `BAETYL_RUN_MODE`.
    pub fn from_env() -> Self {
        std::env::var(env_vars::RUN_MODE)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Native => "native",
            RunMode::Kube => "kube",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host library path from `BAETYL_HOST_PATH_LIB`.
pub fn host_path_lib() -> PathBuf {
    std::env::var(env_vars::HOST_PATH_LIB)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_PATH_LIB))
}

/// Service config file from `BAETYL_CONF_FILE`.
pub fn config_file() -> PathBuf {
    std::env::var(env_vars::CONF_FILE)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// The `logger` section of a service config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Filter directive, e.g. `info` or `baetyl_dm=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Deserialize YAML text; an empty document is treated as an empty mapping.
pub fn from_yaml_str<T: DeserializeOwned>(content: &str) -> Result<T> {
    if content.trim().is_empty() {
        return Ok(serde_yaml::from_str("{}")?);
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Read and deserialize a YAML file.
pub fn load_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ConfigNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    from_yaml_str(&content)
        .map_err(|e| crate::config_err!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    struct Sample {
        #[serde(default)]
        logger: LoggerConfig,
    }

    #[test]
    fn test_run_mode_parse() {
        assert_eq!(RunMode::parse("native"), RunMode::Native);
        assert_eq!(RunMode::parse("NATIVE"), RunMode::Native);
        assert_eq!(RunMode::parse("kube"), RunMode::Kube);
        assert_eq!(RunMode::parse(""), RunMode::Kube);
        assert_eq!(RunMode::parse("docker"), RunMode::Kube);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let sample: Sample = from_yaml_str("").unwrap();
        assert_eq!(sample.logger, LoggerConfig::default());
    }

    #[test]
    fn test_logger_section() {
        let sample: Sample = from_yaml_str("logger:\n  level: debug\n  format: json\n").unwrap();
        assert_eq!(sample.logger.level, "debug");
        assert_eq!(sample.logger.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_yaml_file::<Sample>(&dir.path().join("conf.yml")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yml");
        std::fs::write(&path, "logger: [unclosed").unwrap();
        let err = load_yaml_file::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("conf.yml")));
    }
}

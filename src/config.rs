//! Configuration file management.
//!
//! ```toml
//! [worker]
//! executable = "blender"
//! version_flag = "--version"
//!
//! [flags]
//! frame = "-f"
//! start = "-s"
//! end = "-e"
//! output = "-o"
//! format = "-F"
//! animation = "-a"
//!
//! [supervisor]
//! stop_grace_ms = 2000
//! flood_limit = 50
//! flood_window_ms = 1000
//! poll_interval_ms = 100
//! history_size = 32
//! max_suffix = 9999
//!
//! [logging]
//! level = "info"
//! file = "rendflow.log"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::grammar::FlagGrammar;
use crate::core::supervisor::SupervisorSettings;

pub const CONFIG_ENV: &str = "RENDFLOW_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "rendflow.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub flags: FlagGrammar,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Program used by the `render` shorthand and by version probes.
    pub executable: String,
    pub version_flag: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: "blender".to_string(),
            version_flag: "--version".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub stop_grace_ms: u64,
    pub flood_limit: u32,
    pub flood_window_ms: u64,
    pub poll_interval_ms: u64,
    pub history_size: usize,
    pub max_suffix: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: 2000,
            flood_limit: 50,
            flood_window_ms: 1000,
            poll_interval_ms: 100,
            history_size: 32,
            max_suffix: 9999,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            grammar: self.flags.clone(),
            version_flag: self.worker.version_flag.clone(),
            stop_grace: Duration::from_millis(self.supervisor.stop_grace_ms),
            flood_limit: self.supervisor.flood_limit,
            flood_window: Duration::from_millis(self.supervisor.flood_window_ms),
            poll_interval: Duration::from_millis(self.supervisor.poll_interval_ms.max(1)),
            history_size: self.supervisor.history_size,
            max_suffix: self.supervisor.max_suffix,
        }
    }
}

/// `--config` wins, then `RENDFLOW_CONFIG`, then `rendflow.toml` in the
/// working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

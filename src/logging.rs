use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Where log output may go for the current front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Headless commands own stderr.
    Stderr,
    /// The dashboard owns the terminal; only a configured file may receive logs.
    FileOnly,
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global subscriber. Returns false when nothing was installed,
/// either because the target allows no sink or a subscriber already exists.
pub fn init(config: &LoggingConfig, target: LogTarget) -> std::io::Result<bool> {
    if let Some(path) = &config.file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let installed = tracing_subscriber::registry()
            .with(filter(config))
            .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
            .try_init()
            .is_ok();
        return Ok(installed);
    }

    match target {
        LogTarget::FileOnly => Ok(false),
        LogTarget::Stderr => Ok(tracing_subscriber::registry()
            .with(filter(config))
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .is_ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_without_file_installs_nothing() {
        let config = LoggingConfig::default();
        assert!(!init(&config, LogTarget::FileOnly).unwrap());
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            file: Some("/nonexistent/dir/rendflow.log".into()),
        };
        assert!(init(&config, LogTarget::Stderr).is_err());
    }
}

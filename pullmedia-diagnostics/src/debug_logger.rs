//! Structured debug logging setup

use pullmedia_core::{MediaError, MediaResult};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Filter used when neither the caller nor `RUST_LOG` provides one
pub const DEFAULT_FILTER: &str = "info";

/// Options for the global subscriber
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set
    pub filter: String,
    /// Include thread names (writer and device threads are named)
    pub with_thread_names: bool,
    /// Include the event target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            with_thread_names: true,
            with_target: false,
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration for the pipeline crates
    pub fn debug() -> Self {
        Self {
            filter: "pullmedia=debug,pullmedia_core=debug,pullmedia_media=debug".to_string(),
            with_target: true,
            ..Self::default()
        }
    }
}

/// Debug logger for structured logging
#[derive(Debug, Default)]
pub struct DebugLogger {
    config: LoggingConfig,
}

impl DebugLogger {
    /// Create new debug logger
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// Install the global subscriber
    ///
    /// Returns `Ok(false)` when a subscriber was already installed.
    pub fn init_logging(&self) -> MediaResult<bool> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.filter).map_err(|e| {
                MediaError::InvalidConfiguration {
                    message: format!("invalid log filter {:?}: {}", self.config.filter, e),
                }
            })?,
        };
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(self.config.with_thread_names)
            .with_target(self.config.with_target)
            .try_init()
            .is_ok();
        if installed {
            debug!(filter = %self.config.filter, "logging initialized");
        }
        Ok(installed)
    }
}

/// Install a fmt subscriber filtered by `filter`
pub fn init_logging(filter: &str) -> MediaResult<bool> {
    DebugLogger::new(LoggingConfig {
        filter: filter.to_string(),
        ..LoggingConfig::default()
    })
    .init_logging()
}

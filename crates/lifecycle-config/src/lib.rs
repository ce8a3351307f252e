//! Shared configuration for the lifecycle host.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then an
//! optional configuration file (`--config-path` or
//! `LIFECYCLE_HOST_CONFIG_PATH`), then `LIFECYCLE_HOST_*` environment
//! variables, then command-line flags. The host needs two externally supplied
//! values, the handler script path and the per-call timeout, plus the logging
//! knobs consumed by its telemetry layer.

mod defaults;
mod logging;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use self::defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_TIMEOUT_SECS, default_log_filter, default_log_filter_string,
    default_log_format, default_timeout, default_timeout_secs,
};
pub use self::logging::{LogFormat, LogFormatParseError};

/// Resolved host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "LIFECYCLE_HOST")]
pub struct Config {
    /// Path to the handler script implementing the lifecycle entry points.
    pub handler_path: Option<Utf8PathBuf>,
    /// Wall-clock deadline applied to every lifecycle call, in seconds.
    #[ortho_config(default = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// `tracing` filter expression for the diagnostic log.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the diagnostic log.
    #[ortho_config(default = LogFormat::default())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Handler script path, when one was configured.
    #[must_use]
    pub fn handler_path(&self) -> Option<&Utf8Path> {
        self.handler_path.as_deref()
    }

    /// Configured per-call deadline in seconds.
    #[must_use]
    pub const fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Configured per-call deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

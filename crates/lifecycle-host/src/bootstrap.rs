//! Host bootstrap and top-level run loop.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::{error, info};

use lifecycle_config::Config;

use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::executor::TimeoutExecutor;
use crate::loader::ScriptLoader;
use crate::protocol::ProtocolWriter;
use crate::telemetry::{self, TelemetryError};

/// Tracing target for bootstrap.
const BOOTSTRAP_TARGET: &str = "lifecycle_host::bootstrap";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the host configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any configuration layer is invalid.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`], reading the process arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors that prevent the host from starting.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// No handler script was configured.
    #[error("no handler script configured; pass --handler-path or set LIFECYCLE_HOST_HANDLER_PATH")]
    MissingHandlerPath,
    /// The configured timeout would expire every call immediately.
    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,
}

/// Validated settings the host runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    handler_path: PathBuf,
    timeout: Duration,
}

impl HostSettings {
    /// Validates a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::MissingHandlerPath`] when no handler is
    /// configured and [`BootstrapError::ZeroTimeout`] for a zero timeout.
    pub fn from_config(config: &Config) -> Result<Self, BootstrapError> {
        let handler_path = config
            .handler_path()
            .ok_or(BootstrapError::MissingHandlerPath)?;
        if config.timeout_secs() == 0 {
            return Err(BootstrapError::ZeroTimeout);
        }
        Ok(Self {
            handler_path: handler_path.as_std_path().to_path_buf(),
            timeout: config.timeout(),
        })
    }

    /// Handler script path.
    #[must_use]
    pub fn handler_path(&self) -> &std::path::Path {
        &self.handler_path
    }

    /// Deadline applied to each lifecycle call.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Loads configuration, installs telemetry and validates the settings.
///
/// # Errors
///
/// Returns a [`BootstrapError`] describing the first step that failed.
pub fn bootstrap_with(loader: &dyn ConfigLoader) -> Result<HostSettings, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    let settings = HostSettings::from_config(&config)?;
    info!(
        target: BOOTSTRAP_TARGET,
        handler = %settings.handler_path.display(),
        timeout = ?settings.timeout,
        "host configured"
    );
    Ok(settings)
}

/// Serves lifecycle events from `input` until it is exhausted.
///
/// # Errors
///
/// Returns the [`DispatchError`] that halted the loop.
pub fn serve(
    settings: &HostSettings,
    input: impl BufRead,
    output: impl Write + Send + 'static,
    diagnostics: impl Write,
) -> Result<(), DispatchError> {
    let mut dispatcher = Dispatcher::new(
        ScriptLoader::new(settings.handler_path.clone()),
        TimeoutExecutor::new(settings.timeout),
        ProtocolWriter::new(output),
        diagnostics,
    );
    dispatcher.run(input)
}

/// Bootstraps the host and serves events, mapping the outcome to an exit code.
///
/// Bootstrap and fatal dispatch errors are written to `diagnostics`.
pub fn run<D>(
    loader: &dyn ConfigLoader,
    input: impl BufRead,
    output: impl Write + Send + 'static,
    mut diagnostics: D,
) -> ExitCode
where
    D: Write,
{
    let settings = match bootstrap_with(loader) {
        Ok(settings) => settings,
        Err(bootstrap_error) => {
            drop(writeln!(diagnostics, "{bootstrap_error}"));
            return ExitCode::FAILURE;
        }
    };

    match serve(&settings, input, output, &mut diagnostics) {
        Ok(()) => ExitCode::SUCCESS,
        Err(dispatch_error) => {
            error!(target: BOOTSTRAP_TARGET, error = %dispatch_error, "dispatch halted");
            drop(writeln!(diagnostics, "{dispatch_error}"));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use camino::Utf8PathBuf;
    use rstest::rstest;

    use super::*;
    use crate::tests::{SharedBuffer, fixture_path};

    fn config_for(handler: Option<&str>, timeout_secs: u64) -> Config {
        Config {
            handler_path: handler.map(Utf8PathBuf::from),
            timeout_secs,
            ..Config::default()
        }
    }

    #[test]
    fn settings_require_a_handler_path() {
        let error = HostSettings::from_config(&config_for(None, 60)).expect_err("should fail");
        assert!(matches!(error, BootstrapError::MissingHandlerPath));
    }

    #[test]
    fn settings_reject_a_zero_timeout() {
        let error = HostSettings::from_config(&config_for(Some("handler.rhai"), 0))
            .expect_err("should fail");
        assert!(matches!(error, BootstrapError::ZeroTimeout));
    }

    #[test]
    fn settings_carry_path_and_deadline() {
        let settings =
            HostSettings::from_config(&config_for(Some("handlers/main.rhai"), 30)).expect("valid");
        assert_eq!(settings.handler_path(), std::path::Path::new("handlers/main.rhai"));
        assert_eq!(settings.timeout(), Duration::from_secs(30));
    }

    #[rstest]
    #[case::end_of_input("", ExitCode::SUCCESS)]
    #[case::malformed_line("oops\n", ExitCode::FAILURE)]
    fn run_maps_outcomes_to_exit_codes(#[case] input: &str, #[case] expected: ExitCode) {
        let handler = fixture_path("accumulator.rhai");
        let loader = StaticConfigLoader::new(config_for(handler.to_str(), 5));
        let diagnostics = SharedBuffer::default();

        let code = run(
            &loader,
            Cursor::new(input.to_owned()),
            SharedBuffer::default(),
            diagnostics.clone(),
        );

        assert_eq!(code, expected);
        if expected == ExitCode::FAILURE {
            assert!(diagnostics.contents().contains("Invalid input format: oops"));
        }
    }

    #[test]
    fn run_reports_bootstrap_failures() {
        let diagnostics = SharedBuffer::default();
        let code = run(
            &StaticConfigLoader::new(config_for(None, 60)),
            Cursor::new(String::new()),
            SharedBuffer::default(),
            diagnostics.clone(),
        );

        assert_eq!(code, ExitCode::FAILURE);
        assert!(diagnostics.contents().contains("no handler script configured"));
    }
}

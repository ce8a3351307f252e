use std::time::Duration;

/// Default per-call deadline applied to lifecycle entry points, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default log filter expression used by the host binary.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Default per-call deadline in seconds.
#[must_use]
pub const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Default per-call deadline as a [`Duration`].
#[must_use]
pub const fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

/// Default log filter expression used by the host binary.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the host binary.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::default()
}

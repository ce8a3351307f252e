//! Process-based host for lifecycle event handlers.
//!
//! The host reads line-delimited JSON lifecycle events (`OnCreate`,
//! `OnReceive`, `OnDestroy`) from stdin and routes each one to a handler
//! script that implements any subset of the matching entry points
//! (`on_create(data)`, `on_receive(data)`, `on_destroy()`). Every event is
//! answered on stdout with exactly one response line, preceded by any console
//! output the handler printed while serving it. Diagnostics and logs go to
//! stderr.
//!
//! Handlers are [Rhai](https://rhai.rs) scripts loaded lazily on the first
//! lifecycle event. Each call runs under a wall-clock deadline on its own
//! thread; a call that overruns is answered with an error and abandoned, not
//! killed.
//!
//! # Example
//!
//! ```no_run
//! use std::io;
//!
//! use lifecycle_host::SystemConfigLoader;
//!
//! let code = lifecycle_host::run(
//!     &SystemConfigLoader,
//!     io::stdin().lock(),
//!     io::stdout(),
//!     io::stderr(),
//! );
//! # drop(code);
//! ```

mod bootstrap;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod interceptor;
pub mod loader;
pub mod protocol;
mod telemetry;
pub mod traceback;

pub use bootstrap::{
    BootstrapError, ConfigLoader, HostSettings, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with, run, serve,
};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, LifecycleError, LoadError};
pub use executor::{CallFailure, ExecutionOutcome, TimeoutExecutor};
pub use loader::{Capabilities, HandlerLoader, LifecycleHandler, ScriptHandler, ScriptLoader};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;

//! Binary entry point for the lifecycle host.
//!
//! stdout must stay unlocked here: captured handler output is written to it
//! from call threads.

use std::io;
use std::process::ExitCode;

use lifecycle_host::SystemConfigLoader;

fn main() -> ExitCode {
    lifecycle_host::run(
        &SystemConfigLoader,
        io::stdin().lock(),
        io::stdout(),
        io::stderr(),
    )
}

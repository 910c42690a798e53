//! Command modules for the shoal CLI
//!
//! Each command module implements a single top-level command:
//! - `serve` - Serve the driver over HTTP or stdio
//! - `run` - One-shot analysis
//! - `call` - Generic client (`call` and `services`)
//! - `wait` - Batch readiness check
//!
//! Handlers take their `Args` struct from `cli.rs` and return the text to
//! print on stdout.

pub mod call;
pub mod run;
pub mod serve;
pub mod wait;

pub use call::{run_call, run_services};
pub use run::run_run;
pub use serve::run_serve;
pub use wait::run_wait;

use tokio::runtime::Runtime;

/// Runtime for one command invocation
pub(crate) fn runtime() -> crate::Result<Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

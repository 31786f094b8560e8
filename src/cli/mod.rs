//! Command Line Interface (CLI) layer for SARGRAPH.
//!
//! Argument parsing (`args`), error types (`errors`), template parameter
//! sources (`params`), graph completion (`wiring`) and the orchestration
//! logic (`runner`) that hands the finished graph to the library's
//! `Scheduler`.
pub mod args;
pub mod errors;
pub mod params;
pub mod runner;
pub mod wiring;

use std::error::Error as _;

pub use args::CliArgs;
pub use errors::AppError;
pub use runner::run;

/// Prints `err` to stderr; `-e` adds the chain of underlying causes.
pub fn report(err: &AppError, full_chain: bool) {
    eprintln!("Error: {err}");
    if let AppError::Usage { usage, .. } = err {
        eprintln!("\n{usage}");
    }
    if full_chain {
        let mut source = err.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
    }
}

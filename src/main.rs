//! SARGRAPH CLI entrypoint.
//!
//! Parses arguments, runs a graph file or a single operator through the
//! `cli` module, and maps the outcome to the process exit status.
//! For programmatic use, prefer the library (`sargraph::core::Scheduler`).

use std::process::ExitCode;

use clap::Parser;

mod cli;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    let full_chain = args.errors;
    match cli::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            cli::report(&err, full_chain);
            ExitCode::FAILURE
        }
    }
}

//! Minidock CLI entry point.

use clap::Parser;

use minidock_cli::commands::{dispatch, Cli, FATAL_EXIT_CODE};

fn main() {
    let cli = Cli::parse();

    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("Error: {e}");
            std::process::exit(FATAL_EXIT_CODE);
        }
    }
}

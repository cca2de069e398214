//! shedlock command line entry point.
//!
//! Parses arguments, runs the command and turns errors into exit codes.

use std::process::ExitCode;

use clap::Parser;
use shedlock::cli::Cli;
use shedlock::{exit_code, run};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_code(&err)
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

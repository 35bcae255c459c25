use clap::Parser;
use sigfuse::cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    match cli::dispatch(cli::Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Logging may not be up yet when config loading fails.
            eprintln!("sigfuse: {err:#}");
            ExitCode::FAILURE
        }
    }
}

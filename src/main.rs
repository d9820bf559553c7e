use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tidywatch::cli::{Cli, run};
use tidywatch::output::OutputFormatter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            OutputFormatter::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes diagnostics on stderr. User-facing records are already
/// printed by the console, so their mirror target is off unless asked for.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,tidywatch::records=off"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

//! stackforge CLI: delivery-pipeline stacks as code.

use clap::Parser;
use stackforge::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Diagnostics filter, e.g. `STACKFORGE_LOG=stackforge=debug`.
const LOG_ENV: &str = "STACKFORGE_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = stackforge::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

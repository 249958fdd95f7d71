//! mongotab binary entry point

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use mongotab::cli::{self, CliArgs};
use mongotab::error::Result;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = CliArgs::parse();
    initialize_logging(&args);
    cli::run(args).await
}

/// Logging level from verbosity flags, overridable with `RUST_LOG`.
fn initialize_logging(args: &CliArgs) {
    let level = if args.very_verbose {
        Level::TRACE
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::WARN
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

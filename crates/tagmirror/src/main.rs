//! tagmirror CLI - keep registry mirrors in sync with their sources
//!
//! This is the main entry point for the tagmirror command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for rustls 0.23+)
    // This must be done before any TLS operations
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet, cli.log_format);

    match cli.command {
        Commands::Check(args) => commands::check::run(args, cli.config.as_deref()),
        Commands::Match(args) => commands::select::run(args),
        Commands::Plan(args) => commands::plan::run(args, cli.config.as_deref()).await,
        Commands::Sync(args) => commands::sync::run(args, cli.config.as_deref()).await,
        Commands::Run(args) => commands::run::run(args, cli.config.as_deref()).await,
        Commands::Status(args) => commands::status::run(args, cli.config.as_deref()).await,
    }
}

/// Initialize tracing with appropriate verbosity
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(verbose: u8, quiet: bool, format: LogFormat) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

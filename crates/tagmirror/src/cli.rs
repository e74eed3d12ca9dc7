//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// tagmirror - mirror selected image tags between registries
#[derive(Parser, Debug)]
#[command(name = "tagmirror")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to tagmirror.yaml config file
    #[arg(short, long, global = true, env = "TAGMIRROR_CONFIG")]
    pub config: Option<Utf8PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and every policy in it
    Check(CheckArgs),

    /// Show which tags a pattern selects
    Match(MatchArgs),

    /// Show what a sync would copy, without copying
    Plan(PlanArgs),

    /// Run one reconciliation pass per policy
    Sync(SyncArgs),

    /// Keep every policy converged until interrupted
    Run(RunArgs),

    /// Show the last recorded status of each policy
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct MatchArgs {
    /// Prefixed pattern, e.g. "glob: 8*", "regex: ^8\.[0-9]+$", "semver: >=8, <9"
    pub pattern: String,

    /// Candidate tags
    #[arg(required = true)]
    pub tags: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Only this policy
    #[arg(short, long)]
    pub policy: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only this policy
    #[arg(short, long)]
    pub policy: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the configured resync interval (seconds, 0 disables)
    #[arg(long)]
    pub resync_interval: Option<u64>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only this policy
    #[arg(short, long)]
    pub policy: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

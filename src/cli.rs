use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "driftguard")]
#[command(version)]
#[command(about = "Detect and reconcile configuration drift across a fleet", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to driftguard.toml in the config directory)
    #[arg(long, global = true, env = "DRIFTGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read the managed records from every host
    Collect(CollectArgs),

    /// Classify desired vs actual records per host
    Diff(DiffArgs),

    /// Show the additions apply would make, without touching hosts
    Plan(PlanArgs),

    /// Back up and patch every host with missing records
    Apply(ApplyArgs),

    /// Summarize drift across the fleet
    Report(ReportArgs),

    /// List or inspect desired sets
    #[command(subcommand)]
    Sets(SetsCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared argument groups
// ============================================================================

/// Desired set source selection
#[derive(Args, Clone, Default)]
pub struct DesiredArgs {
    /// Desired set name (defaults to desired.default_set from config)
    #[arg(short, long)]
    pub set: Option<String>,

    /// Load the desired set from this file first
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Remote base URL; fetches {remote}/{set}.json
    #[arg(long)]
    pub remote: Option<String>,

    /// Ignore the configured remote base
    #[arg(long, conflicts_with = "remote")]
    pub offline: bool,
}

/// Host selection and fan-out limits
#[derive(Args, Clone, Default)]
pub struct FleetArgs {
    /// Only these hosts (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// Maximum hosts processed at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop starting new hosts after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Export and display options
#[derive(Args, Clone, Default)]
pub struct OutputArgs {
    /// Write results to this file (.json or .csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Show secret payload values unmasked
    #[arg(long)]
    pub show_secrets: bool,
}

// ============================================================================
// Subcommand arguments
// ============================================================================

#[derive(Args)]
pub struct CollectArgs {
    #[command(flatten)]
    pub fleet: FleetArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Print every collected record
    #[arg(long)]
    pub records: bool,
}

#[derive(Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub desired: DesiredArgs,

    #[command(flatten)]
    pub fleet: FleetArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Include unchanged records
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Args, Clone, Default)]
pub struct PlanArgs {
    #[command(flatten)]
    pub desired: DesiredArgs,

    #[command(flatten)]
    pub fleet: FleetArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Skip the projected store diff
    #[arg(long)]
    pub no_diff: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub desired: DesiredArgs,

    #[command(flatten)]
    pub fleet: FleetArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Dry run - show what would be done
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub desired: DesiredArgs,

    #[command(flatten)]
    pub fleet: FleetArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Subcommand)]
pub enum SetsCommand {
    /// List built-in sets and configured defaults
    List,

    /// Resolve a set and print its records
    Show {
        #[command(flatten)]
        desired: DesiredArgs,

        /// Show secret payload values unmasked
        #[arg(long)]
        show_secrets: bool,
    },
}

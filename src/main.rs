mod cli;
mod commands;
mod config;
mod export;
mod paths;
mod progress;
mod ssh;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::RunStatus;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit status when any host ended in error
const EXIT_HOST_ERRORS: u8 = 1;

/// Exit status for pre-flight failures (config, desired set, export)
const EXIT_FAILURE: u8 = 2;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
    /// Explicit config file from `--config`
    pub config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        quiet: cli.quiet,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Collect(args) => commands::collect::run(&ctx, args),
        Command::Diff(args) => commands::diff::run(&ctx, args),
        Command::Plan(args) => commands::plan::run(&ctx, args),
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Report(args) => commands::report::run(&ctx, args),
        Command::Sets(cmd) => commands::sets::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "driftguard", &mut io::stdout());
            Ok(RunStatus::Clean)
        }
    };

    match result {
        Ok(RunStatus::Clean) => ExitCode::SUCCESS,
        Ok(RunStatus::HostErrors) => ExitCode::from(EXIT_HOST_ERRORS),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

use anyhow::Result;
use colored::Colorize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::RunStatus;
use crate::Context;
use crate::cli::{DesiredArgs, SetsCommand};
use crate::config::AppConfig;
use crate::ui;

pub fn run(ctx: &Context, command: SetsCommand) -> Result<RunStatus> {
    let config = AppConfig::load(ctx.config.as_deref())?;
    match command {
        SetsCommand::List => list(&config)?,
        SetsCommand::Show {
            desired,
            show_secrets,
        } => show(&config, &desired, show_secrets)?,
    }
    Ok(RunStatus::Clean)
}

fn list(config: &AppConfig) -> Result<()> {
    let schema = Arc::new(config.record_schema()?);
    let provider = super::provider(config, &schema)?;
    let default = config.desired.default_set.as_deref();

    ui::header("Desired Sets");
    ui::section("Built-in");
    for name in provider.builtin_names() {
        let marker = if default == Some(name) {
            " (default)".green().to_string()
        } else {
            String::new()
        };
        println!("  {} {name}{marker}", "•".cyan());
    }

    let cache_dir = config.cache_dir()?;
    let cached = cached_sets(&cache_dir);
    ui::section("Cached");
    ui::kv("Directory", &cache_dir.display().to_string());
    if cached.is_empty() {
        ui::dim("(empty)");
    }
    for name in cached {
        println!("  {} {name}", "•".cyan());
    }

    if let Some(base) = &config.desired.remote_base {
        ui::section("Remote");
        ui::kv("Base", base);
    }
    if let Some(name) = default
        && !provider.builtin_names().contains(&name)
    {
        ui::kv("Default", name);
    }

    Ok(())
}

fn show(config: &AppConfig, args: &DesiredArgs, reveal: bool) -> Result<()> {
    let schema = Arc::new(config.record_schema()?);
    let desired = super::resolve_desired(config, &schema, args)?;

    ui::header(&format!("Desired set: {}", desired.name));
    if !desired.description.is_empty() {
        ui::dim(&desired.description);
    }
    super::print_desired(&desired);
    println!();
    ui::print_records(&desired.records, &schema, reveal);
    Ok(())
}

/// Names of sets previously fetched into the cache
fn cached_sets(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    names
}

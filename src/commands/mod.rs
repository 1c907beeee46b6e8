//! Subcommand implementations
//!
//! Every fleet command follows the same shape: load config, resolve the
//! desired set and hosts (pre-flight; failures abort before any host is
//! touched), fan out, render, optionally export.

pub mod apply;
pub mod collect;
pub mod diff;
pub mod plan;
pub mod report;
pub mod sets;

use anyhow::{Context as AnyhowContext, Result, bail};
use reconcile::{
    DesiredSet, DesiredSetProvider, DriftReport, DriftReporter, FleetOptions, FleetOrchestrator,
    HostRef, HostReconciliation, HostResult, LocalTransport, PatchApplier, ProviderOptions,
    ReconcileMode, RecordSchema, SectionPath, StateLoader, Transport,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::cli::{DesiredArgs, FleetArgs};
use crate::config::{AppConfig, TransportKind};
use crate::export;
use crate::paths;
use crate::progress::HostProgress;
use crate::ssh::SshTransport;
use crate::ui;

/// How a command finished, for the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    /// At least one host ended in `Error`
    HostErrors,
}

impl RunStatus {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a HostResult>) -> Self {
        if results.into_iter().any(HostResult::is_error) {
            Self::HostErrors
        } else {
            Self::Clean
        }
    }
}

/// Everything a fleet command needs, built before any host is contacted
pub struct Session {
    pub config: AppConfig,
    pub schema: Arc<RecordSchema>,
    pub section: SectionPath,
    pub hosts: Vec<HostRef>,
    transport: Arc<dyn Transport>,
    orchestrator: FleetOrchestrator,
}

impl Session {
    pub fn open(ctx: &Context, fleet: &FleetArgs) -> Result<Self> {
        let config = AppConfig::load(ctx.config.as_deref())?;
        let schema = Arc::new(config.record_schema()?);
        let section = config.section_path()?;

        let hosts = config.host_refs(&fleet.hosts)?;
        if hosts.is_empty() {
            let location = config
                .source
                .as_ref()
                .map_or_else(|| "the config file".to_string(), |p| p.display().to_string());
            bail!("No hosts resolved (add [[hosts]] entries to {location})");
        }

        let concurrency = fleet.jobs.unwrap_or(config.fleet.concurrency);
        if concurrency == 0 {
            bail!("--jobs must be at least 1");
        }
        let timeout = fleet
            .timeout
            .or(config.fleet.timeout_secs)
            .map(Duration::from_secs);

        let transport: Arc<dyn Transport> = match config.fleet.transport {
            TransportKind::Local => match &config.fleet.local_root {
                Some(root) => Arc::new(LocalTransport::with_root(paths::expand(root))),
                None => Arc::new(LocalTransport::new()),
            },
            TransportKind::Ssh => Arc::new(SshTransport::from_config(&config)),
        };

        log::info!(
            "{} host(s), concurrency {concurrency}, transport {:?}",
            hosts.len(),
            config.fleet.transport
        );

        Ok(Self {
            orchestrator: FleetOrchestrator::new(FleetOptions {
                concurrency,
                timeout,
            }),
            config,
            schema,
            section,
            hosts,
            transport,
        })
    }

    pub fn loader(&self) -> StateLoader {
        StateLoader::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.schema),
            self.section.clone(),
        )
    }

    pub fn applier(&self) -> PatchApplier {
        PatchApplier::new(Arc::clone(&self.transport), self.section.clone())
    }

    pub fn orchestrator(&self) -> &FleetOrchestrator {
        &self.orchestrator
    }

    pub fn reporter(&self, reveal_secrets: bool) -> DriftReporter {
        DriftReporter::new(Arc::clone(&self.schema), reveal_secrets)
    }

    pub fn resolve_desired(&self, args: &DesiredArgs) -> Result<DesiredSet> {
        resolve_desired(&self.config, &self.schema, args)
    }

    /// Fan `mode` out over every host with a progress bar
    pub fn reconcile(
        &self,
        ctx: &Context,
        desired: &DesiredSet,
        mode: ReconcileMode,
    ) -> Result<Vec<HostReconciliation>> {
        let label = match mode {
            ReconcileMode::Diff => "Diffing",
            ReconcileMode::Preview => "Planning",
            ReconcileMode::Apply => "Applying",
        };
        let progress = HostProgress::new(label, ctx.quiet);
        let results = self.orchestrator.reconcile(
            &self.hosts,
            &desired.records,
            &self.loader(),
            &self.applier(),
            mode,
            &progress,
        )?;
        Ok(results)
    }
}

pub fn provider(config: &AppConfig, schema: &Arc<RecordSchema>) -> Result<DesiredSetProvider> {
    Ok(DesiredSetProvider::new(
        Arc::clone(schema),
        ProviderOptions {
            cache_dir: Some(config.cache_dir()?),
            timeout: config.fetch_timeout(),
        },
    ))
}

/// Resolve the desired set once for the whole run
pub fn resolve_desired(
    config: &AppConfig,
    schema: &Arc<RecordSchema>,
    args: &DesiredArgs,
) -> Result<DesiredSet> {
    let Some(name) = args.set.as_deref().or(config.desired.default_set.as_deref()) else {
        bail!("No desired set given (use --set or desired.default_set)");
    };

    let remote = if args.offline {
        None
    } else {
        args.remote
            .as_deref()
            .or(config.desired.remote_base.as_deref())
    };

    provider(config, schema)?
        .resolve(name, args.file.as_deref(), remote)
        .with_context(|| format!("Could not resolve desired set '{name}'"))
}

pub fn print_desired(desired: &DesiredSet) {
    ui::kv("Desired set", &desired.name);
    ui::kv("Source", &desired.provenance.to_string());
    ui::kv("Records", &desired.records.len().to_string());
}

/// Write `report` when `-o` was given
pub fn export_report(path: Option<&Path>, report: &DriftReport) -> Result<()> {
    if let Some(path) = path {
        export::write_report(path, report)?;
        ui::success(&format!("Wrote {}", path.display()));
    }
    Ok(())
}

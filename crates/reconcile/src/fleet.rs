//! Fleet fan-out
//!
//! Runs one host operation per host on a bounded rayon pool. A host's failure
//! becomes that host's [`HostResult`]; it never cancels or affects siblings.
//! Results are sorted by host before they are returned, so completion order
//! is never observable.

use crate::applier::{ApplyState, HostRun, PatchApplier, Preview};
use crate::diff::{DiffResult, diff};
use crate::error::{Error, ErrorCategory, Result};
use crate::loader::StateLoader;
use crate::planner::{PatchPlan, plan};
use crate::record::RecordSet;
use crate::transport::HostRef;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default number of hosts processed at once
pub const DEFAULT_CONCURRENCY: usize = 8;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Warning,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one host operation
#[derive(Debug, Clone, Serialize)]
pub struct HostResult {
    pub host: String,
    pub store: PathBuf,
    pub outcome: Outcome,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Records added by an apply
    pub applied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl HostResult {
    pub fn success(host: &HostRef, message: impl Into<String>) -> Self {
        Self {
            host: host.name.clone(),
            store: host.store.clone(),
            outcome: Outcome::Success,
            message: message.into(),
            timestamp: Utc::now(),
            applied: 0,
            category: None,
            backup: None,
        }
    }

    /// Result for a failed host. A host that was never started is a warning.
    pub fn from_error(host: &HostRef, error: &Error) -> Self {
        let outcome = match error {
            Error::Cancelled => Outcome::Warning,
            _ => Outcome::Error,
        };
        let backup = match error {
            Error::Write { backup, .. } => backup.clone(),
            _ => None,
        };
        Self {
            host: host.name.clone(),
            store: host.store.clone(),
            outcome,
            message: error.to_string(),
            timestamp: Utc::now(),
            applied: 0,
            category: Some(error.category()),
            backup,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome == Outcome::Error
    }
}

// ============================================================================
// Options, cancellation and progress
// ============================================================================

/// Shared flag that stops new hosts from being started
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// Maximum hosts in flight at once
    pub concurrency: usize,
    /// Overall budget; hosts not started before it elapses are skipped
    pub timeout: Option<Duration>,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: None,
        }
    }
}

/// Progress callback for fan-out operations
///
/// Called from worker threads; implementations must be thread-safe.
pub trait FleetProgress: Sync {
    /// Called once before any host starts
    fn on_start(&self, _hosts: usize) {}

    /// Called when a host's operation finishes, in completion order
    fn on_host_complete(&self, _host: &HostRef, _outcome: Outcome) {}

    /// Called after every host has finished
    fn on_finish(&self) {}
}

/// Progress sink that ignores all updates
pub struct NoProgress;

impl FleetProgress for NoProgress {}

// ============================================================================
// Reconciliation records
// ============================================================================

/// How far a reconciliation goes on each host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Classify only
    Diff,
    /// Classify, plan and project the patched store
    Preview,
    /// Classify, plan, back up and persist
    Apply,
}

/// Everything a reconciliation produced for one host
#[derive(Debug, Clone)]
pub struct HostReconciliation {
    pub host: HostRef,
    pub diff: Option<DiffResult>,
    pub plan: Option<PatchPlan>,
    pub preview: Option<Preview>,
    pub result: HostResult,
}

/// Records collected from one host
#[derive(Debug, Clone)]
pub struct HostCollection {
    pub host: HostRef,
    pub records: Option<RecordSet>,
    pub result: HostResult,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Fans host operations out with bounded concurrency
#[derive(Debug, Clone, Default)]
pub struct FleetOrchestrator {
    options: FleetOptions,
    cancel: CancelToken,
}

impl FleetOrchestrator {
    pub fn new(options: FleetOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Share an externally owned cancel token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn concurrency(&self) -> usize {
        self.options.concurrency.max(1)
    }

    /// Run `op` once per host and return the outputs sorted by host.
    ///
    /// Hosts that have not started when the token is cancelled or the timeout
    /// elapses yield [`Error::Cancelled`]. Hosts already running finish.
    pub fn run<T, F>(
        &self,
        hosts: &[HostRef],
        progress: &dyn FleetProgress,
        op: F,
    ) -> Result<Vec<(HostRef, Result<T>)>>
    where
        T: Send,
        F: Fn(&HostRef) -> Result<T> + Sync,
    {
        let deadline = self.options.timeout.map(|t| Instant::now() + t);
        let results: Arc<Mutex<Vec<(HostRef, Result<T>)>>> = Arc::new(Mutex::new(Vec::new()));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency())
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;

        progress.on_start(hosts.len());
        pool.install(|| {
            hosts.par_iter().for_each(|host| {
                let expired = deadline.is_some_and(|d| Instant::now() >= d);
                let result = if expired || self.cancel.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    op(host)
                };

                let outcome = match &result {
                    Ok(_) => Outcome::Success,
                    Err(Error::Cancelled) => Outcome::Warning,
                    Err(e) => {
                        log::warn!("{}: {e}", host.name);
                        Outcome::Error
                    }
                };
                progress.on_host_complete(host, outcome);

                push_result(&results, (host.clone(), result));
            });
        });
        progress.on_finish();

        let mut collected = into_results(results)?;
        collected.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(collected)
    }

    /// Load every host's actual record set
    pub fn collect(
        &self,
        hosts: &[HostRef],
        loader: &StateLoader,
        progress: &dyn FleetProgress,
    ) -> Result<Vec<HostCollection>> {
        let outputs = self.run(hosts, progress, |host| loader.load(host))?;

        Ok(outputs
            .into_iter()
            .map(|(host, result)| match result {
                Ok(records) => HostCollection {
                    result: HostResult::success(
                        &host,
                        format!("{} record(s)", records.len()),
                    ),
                    records: Some(records),
                    host,
                },
                Err(e) => HostCollection {
                    result: HostResult::from_error(&host, &e),
                    records: None,
                    host,
                },
            })
            .collect())
    }

    /// Diff, plan and (depending on `mode`) apply `desired` on every host.
    ///
    /// Hosts with an empty plan are still visited and reported.
    pub fn reconcile(
        &self,
        hosts: &[HostRef],
        desired: &RecordSet,
        loader: &StateLoader,
        applier: &PatchApplier,
        mode: ReconcileMode,
        progress: &dyn FleetProgress,
    ) -> Result<Vec<HostReconciliation>> {
        let outputs = self.run(hosts, progress, |host| {
            reconcile_host(host, desired, loader, applier, mode)
        })?;

        Ok(outputs
            .into_iter()
            .map(|(host, result)| match result {
                Ok(reconciliation) => reconciliation,
                Err(e) => HostReconciliation {
                    result: HostResult::from_error(&host, &e),
                    host,
                    diff: None,
                    plan: None,
                    preview: None,
                },
            })
            .collect())
    }
}

/// One host's pipeline. Errors before a diff exists propagate; later errors
/// are folded into the result so the diff is still reported.
fn reconcile_host(
    host: &HostRef,
    desired: &RecordSet,
    loader: &StateLoader,
    applier: &PatchApplier,
    mode: ReconcileMode,
) -> Result<HostReconciliation> {
    let snapshot = loader.snapshot(host)?;
    let mut run = HostRun::loaded(host);

    let result = diff(desired, &snapshot.records);
    run.advance(ApplyState::Diffed)?;
    let plan = plan(result.clone());
    run.advance(ApplyState::Planned)?;

    let unreconciled = plan.unreconciled().count();
    let mut preview = None;

    let host_result = match mode {
        ReconcileMode::Diff => {
            let counts = result.counts();
            HostResult::success(
                host,
                format!(
                    "{} added, {} removed, {} changed, {} unchanged",
                    counts.added, counts.removed, counts.changed, counts.unchanged
                ),
            )
        }
        ReconcileMode::Preview => match applier.preview(&snapshot, &plan) {
            Ok(projected) => {
                preview = Some(projected);
                HostResult::success(
                    host,
                    with_review(format!("would add {}", plural(plan.len())), unreconciled),
                )
            }
            Err(e) => HostResult::from_error(host, &e),
        },
        ReconcileMode::Apply => match applier.apply(&snapshot, &plan, &mut run) {
            Ok(outcome) => {
                let message = if outcome.applied == 0 {
                    "already up to date".to_string()
                } else {
                    format!("added {}", plural(outcome.applied))
                };
                let mut host_result =
                    HostResult::success(host, with_review(message, unreconciled));
                host_result.applied = outcome.applied;
                host_result.backup = outcome.backup.map(|b| b.destination);
                host_result
            }
            Err(e) => {
                log::warn!("{}: apply failed in state {}: {e}", host.name, run.state());
                HostResult::from_error(host, &e)
            }
        },
    };

    Ok(HostReconciliation {
        host: host.clone(),
        diff: Some(result),
        plan: Some(plan),
        preview,
        result: host_result,
    })
}

fn plural(count: usize) -> String {
    if count == 1 {
        "1 record".to_string()
    } else {
        format!("{count} records")
    }
}

fn with_review(message: String, unreconciled: usize) -> String {
    if unreconciled == 0 {
        message
    } else {
        format!("{message}; {unreconciled} removed/changed left for review")
    }
}

fn push_result<T>(results: &Arc<Mutex<Vec<T>>>, result: T) {
    match results.lock() {
        Ok(mut locked) => locked.push(result),
        Err(poisoned) => poisoned.into_inner().push(result),
    }
}

fn into_results<T>(results: Arc<Mutex<Vec<T>>>) -> Result<Vec<T>> {
    let mutex = Arc::try_unwrap(results)
        .map_err(|_| Error::Pool("result collector still shared".to_string()))?;

    match mutex.into_inner() {
        Ok(collected) => Ok(collected),
        Err(poisoned) => Ok(poisoned.into_inner()),
    }
}

//! # Reconcile
//!
//! Desired-state drift detection and additive reconciliation for a
//! configuration store replicated across many hosts.
//!
//! ## Core Concepts
//!
//! - **Record**: an identity key (matched case-insensitively) plus payload fields
//! - **RecordSet**: records keyed by identity, never two with the same key
//! - **DiffResult**: every identity of both sides classified as added, removed,
//!   unchanged or changed
//! - **PatchPlan**: one `Add` per added record; removed and changed records are
//!   reported, never corrected
//! - **PatchApplier**: backup, append, persist, per host
//! - **FleetOrchestrator**: bounded fan-out with per-host results
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     DesiredSetProvider, FleetOrchestrator, HostRef, LocalTransport, NoProgress,
//!     PatchApplier, ProviderOptions, ReconcileMode, RecordSchema, SectionPath, StateLoader,
//! };
//! use std::sync::Arc;
//!
//! let schema = Arc::new(RecordSchema::safe_controls());
//! let section = SectionPath::parse("configuration.SafeControls")?;
//! let transport = Arc::new(LocalTransport::new());
//!
//! let desired = DesiredSetProvider::new(Arc::clone(&schema), ProviderOptions::default())
//!     .resolve("baseline", None, None)?;
//!
//! let loader = StateLoader::new(transport.clone(), schema, section.clone());
//! let applier = PatchApplier::new(transport, section);
//! let hosts = vec![HostRef::new("web01", "/srv/web01/store.json")];
//!
//! let results = FleetOrchestrator::default().reconcile(
//!     &hosts,
//!     &desired.records,
//!     &loader,
//!     &applier,
//!     ReconcileMode::Apply,
//!     &NoProgress,
//! )?;
//! ```
//!
//! ## Transports
//!
//! Hosts are reached through the [`Transport`] trait. [`LocalTransport`]
//! works on the local filesystem; other transports (SSH and the like) are
//! supplied by the caller.

pub mod applier;
pub mod desired;
pub mod diff;
pub mod error;
pub mod fleet;
pub mod loader;
pub mod planner;
pub mod record;
pub mod report;
pub mod store;
pub mod transport;

// Re-export main types at crate root
pub use applier::{
    ApplyOutcome, ApplyState, BackedUp, BackupArtifact, HostRun, PatchApplier, Preview,
    WriteIntent,
};
pub use desired::{DesiredSet, DesiredSetProvider, Provenance, ProviderOptions};
pub use diff::{Classification, DiffCounts, DiffEntry, DiffResult, diff};
pub use error::{Error, ErrorCategory, Result};
pub use fleet::{
    CancelToken, DEFAULT_CONCURRENCY, FleetOptions, FleetOrchestrator, FleetProgress,
    HostCollection, HostReconciliation, HostResult, NoProgress, Outcome, ReconcileMode,
};
pub use loader::{HostSnapshot, StateLoader};
pub use planner::{PatchOperation, PatchPlan, plan};
pub use record::{
    FieldRole, FieldSpec, IdentityKey, Record, RecordSchema, RecordSet, Validation, WILDCARD,
    mask_secret,
};
pub use report::{ClassificationCount, DriftReport, DriftReporter, ExportRow, ReportInput};
pub use store::{SectionPath, StoreDocument, StoreFormat};
pub use transport::{HostRef, LocalTransport, Transport, backup_path};

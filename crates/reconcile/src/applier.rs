//! Patch application for a single host
//!
//! Per host the run moves through
//! `Loaded -> Diffed -> Planned -> BackupPending -> BackedUp -> Applying -> Applied`,
//! or to `Failed` from any step after `Planned`. An empty plan stops at
//! `Planned` and still reports success.
//!
//! Mutation is gated by a typestate: a [`WriteIntent`] can only be turned into
//! a [`BackedUp`] guard by writing a backup and verifying its digest against
//! the snapshot the plan was computed from, and only a [`BackedUp`] guard can
//! persist. Nothing removes a backup, on success or on failure.

use crate::error::{Error, Result};
use crate::loader::HostSnapshot;
use crate::planner::PatchPlan;
use crate::store::{SectionPath, StoreDocument};
use crate::transport::{HostRef, Transport, backup_path};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-host apply state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyState {
    Loaded,
    Diffed,
    Planned,
    BackupPending,
    BackedUp,
    Applying,
    Applied,
    Failed,
}

impl ApplyState {
    /// Whether `next` may follow this state
    pub fn can_transition_to(self, next: ApplyState) -> bool {
        use ApplyState::{
            Applied, Applying, BackedUp, BackupPending, Diffed, Failed, Loaded, Planned,
        };
        matches!(
            (self, next),
            (Loaded, Diffed)
                | (Diffed, Planned)
                | (Planned, BackupPending)
                | (BackupPending, BackedUp)
                | (BackedUp, Applying)
                | (Applying, Applied)
                | (BackupPending | BackedUp | Applying, Failed)
        )
    }
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Tracks one host's progress through the apply states
#[derive(Debug, Clone)]
pub struct HostRun {
    host: String,
    state: ApplyState,
}

impl HostRun {
    /// A run starts once the actual state has been loaded
    pub fn loaded(host: &HostRef) -> Self {
        Self {
            host: host.name.clone(),
            state: ApplyState::Loaded,
        }
    }

    pub fn state(&self) -> ApplyState {
        self.state
    }

    pub fn advance(&mut self, next: ApplyState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        log::debug!("{}: {} -> {}", self.host, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Mark the run failed if the current state allows it
    pub fn fail(&mut self) {
        if self.state.can_transition_to(ApplyState::Failed) {
            log::debug!("{}: {} -> Failed", self.host, self.state);
            self.state = ApplyState::Failed;
        }
    }
}

/// A verified pre-change copy of a store. Never removed automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub created_at: DateTime<Utc>,
    /// blake3 digest of the backed-up bytes (hex)
    pub digest: String,
}

/// Permission to mutate one host, not yet backed up
pub struct WriteIntent<'a> {
    transport: &'a dyn Transport,
    snapshot: &'a HostSnapshot,
}

impl<'a> WriteIntent<'a> {
    pub fn acquire(transport: &'a dyn Transport, snapshot: &'a HostSnapshot) -> Self {
        Self {
            transport,
            snapshot,
        }
    }

    /// Copy the store verbatim and verify the copy before allowing writes
    pub fn backup(self, at: DateTime<Utc>) -> Result<BackedUp<'a>> {
        let host = &self.snapshot.host;
        let destination = backup_path(&host.store, at);

        self.transport
            .copy_store(host, &destination)
            .map_err(|e| write_error(host, format!("backup failed: {e}"), None))?;

        let copied = self
            .transport
            .read_file(host, &destination)
            .map_err(|e| write_error(host, format!("backup unreadable: {e}"), None))?;
        let digest = blake3::hash(&copied);

        if digest != self.snapshot.digest {
            return Err(write_error(
                host,
                "backup does not match the loaded store (changed since it was read?)".into(),
                Some(destination),
            ));
        }

        log::info!("{}: backed up store to {}", host.name, destination.display());

        Ok(BackedUp {
            transport: self.transport,
            host,
            artifact: BackupArtifact {
                source: host.store.clone(),
                destination,
                created_at: at,
                digest: digest.to_hex().to_string(),
            },
        })
    }
}

/// Proof that a verified backup exists; the only way to persist
pub struct BackedUp<'a> {
    transport: &'a dyn Transport,
    host: &'a HostRef,
    artifact: BackupArtifact,
}

impl BackedUp<'_> {
    pub fn artifact(&self) -> &BackupArtifact {
        &self.artifact
    }

    /// Replace the store with the patched document, all-or-nothing
    pub fn persist(&self, contents: &[u8]) -> Result<()> {
        self.transport.replace_store(self.host, contents).map_err(|e| {
            write_error(
                self.host,
                e.to_string(),
                Some(self.artifact.destination.clone()),
            )
        })
    }

    pub fn into_artifact(self) -> BackupArtifact {
        self.artifact
    }
}

fn write_error(host: &HostRef, message: String, backup: Option<PathBuf>) -> Error {
    Error::Write {
        host: host.name.clone(),
        message,
        backup,
    }
}

/// Result of applying a plan to one host
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub host: String,
    pub applied: usize,
    pub backup: Option<BackupArtifact>,
    pub state: ApplyState,
}

/// Dry-run projection of an apply
#[derive(Debug, Clone)]
pub struct Preview {
    pub host: String,
    pub operations: usize,
    pub projected: StoreDocument,
    pub before: String,
    pub after: String,
}

/// Executes patch plans against host stores
#[derive(Clone)]
pub struct PatchApplier {
    transport: Arc<dyn Transport>,
    section: SectionPath,
}

impl PatchApplier {
    pub fn new(transport: Arc<dyn Transport>, section: SectionPath) -> Self {
        Self { transport, section }
    }

    /// Apply `plan` to the host the snapshot was read from.
    ///
    /// `run` must be in `Planned`. An empty plan is a successful no-op.
    pub fn apply(
        &self,
        snapshot: &HostSnapshot,
        plan: &PatchPlan,
        run: &mut HostRun,
    ) -> Result<ApplyOutcome> {
        if run.state() != ApplyState::Planned {
            return Err(Error::InvalidTransition {
                from: run.state().to_string(),
                to: ApplyState::BackupPending.to_string(),
            });
        }

        if plan.is_empty() {
            log::debug!("{}: nothing to apply", snapshot.host.name);
            return Ok(ApplyOutcome {
                host: snapshot.host.name.clone(),
                applied: 0,
                backup: None,
                state: run.state(),
            });
        }

        let result = self.apply_planned(snapshot, plan, run);
        if result.is_err() {
            run.fail();
        }
        result
    }

    fn apply_planned(
        &self,
        snapshot: &HostSnapshot,
        plan: &PatchPlan,
        run: &mut HostRun,
    ) -> Result<ApplyOutcome> {
        run.advance(ApplyState::BackupPending)?;
        let guard = WriteIntent::acquire(self.transport.as_ref(), snapshot).backup(Utc::now())?;
        run.advance(ApplyState::BackedUp)?;

        run.advance(ApplyState::Applying)?;
        let kept = |e: Error| {
            write_error(
                &snapshot.host,
                e.to_string(),
                Some(guard.artifact().destination.clone()),
            )
        };
        let mut document = snapshot.document.clone();
        document
            .append(&self.section, &plan.records_to_add())
            .map_err(kept)?;
        let contents = document.to_bytes().map_err(kept)?;
        guard.persist(&contents)?;
        run.advance(ApplyState::Applied)?;

        log::info!(
            "{}: added {} record(s)",
            snapshot.host.name,
            plan.operations().len()
        );

        Ok(ApplyOutcome {
            host: snapshot.host.name.clone(),
            applied: plan.len(),
            backup: Some(guard.into_artifact()),
            state: run.state(),
        })
    }

    /// Project the post-apply store without backing up or writing anything
    pub fn preview(&self, snapshot: &HostSnapshot, plan: &PatchPlan) -> Result<Preview> {
        let mut projected = snapshot.document.clone();
        if !plan.is_empty() {
            projected.append(&self.section, &plan.records_to_add())?;
        }

        let before = String::from_utf8_lossy(&snapshot.document.to_bytes()?).into_owned();
        let after = String::from_utf8_lossy(&projected.to_bytes()?).into_owned();

        Ok(Preview {
            host: snapshot.host.name.clone(),
            operations: plan.len(),
            projected,
            before,
            after,
        })
    }
}

//! Error types for reconciliation.
//!
//! Errors are categorized so callers can tell a fatal pre-flight failure
//! (abort the run before any host is touched) from a per-host failure that is
//! captured as that host's result while the rest of the fleet continues.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing file, host, section or desired set.
    NotFound,
    /// Malformed structured input.
    Parse,
    /// Host unreachable or authentication failure.
    Transport,
    /// Duplicate identity key while building a record set.
    Conflict,
    /// Persisting a patch failed after the backup succeeded.
    Write,
    /// Record does not match the configured field schema.
    Schema,
    /// Operation was not started because the run was cancelled.
    Cancelled,
    /// Programming or environment error.
    Other,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "Not found",
            Self::Parse => "Malformed input",
            Self::Transport => "Host unreachable",
            Self::Conflict => "Duplicate identity",
            Self::Write => "Write failed",
            Self::Schema => "Schema violation",
            Self::Cancelled => "Cancelled",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::NotFound => "Check the store path, section path and desired set name",
            Self::Parse => "Fix the syntax of the structured file",
            Self::Transport => "Check connectivity and credentials for the host",
            Self::Conflict => "Remove the duplicated entry so every identity is unique",
            Self::Write => "Restore from the backup written next to the store if needed",
            Self::Schema => "Align the record fields with the configured schema",
            Self::Cancelled => "Re-run to reconcile the remaining hosts",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while loading, diffing or applying records.
#[derive(Debug, Error)]
pub enum Error {
    /// A file, host, section or named set could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// What was being looked up
        what: String,
    },

    /// Structured input could not be parsed.
    #[error("parse error in {source_name}: {message}")]
    Parse {
        /// File, URL or host the input came from
        source_name: String,
        /// Parser message
        message: String,
    },

    /// The host could not be reached or refused the session.
    #[error("transport error on {host}: {message}")]
    Transport {
        /// Host identifier
        host: String,
        /// Underlying failure
        message: String,
    },

    /// Two records share the same identity key.
    #[error("duplicate identity {identity} in {set}")]
    Conflict {
        /// Name of the set being built
        set: String,
        /// Display form of the duplicated identity
        identity: String,
    },

    /// Persisting the patched store failed. The backup stays in place.
    #[error("write failed on {host}: {message}{}", backup_hint(.backup.as_ref()))]
    Write {
        /// Host identifier
        host: String,
        /// Underlying failure
        message: String,
        /// Backup left behind as the recovery path
        backup: Option<PathBuf>,
    },

    /// A record does not conform to the field schema.
    #[error("schema violation in {set}: {message}")]
    Schema {
        /// Name of the set being validated
        set: String,
        /// What was wrong
        message: String,
    },

    /// The applier was driven through an invalid state transition.
    #[error("invalid apply transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// The operation was not started because the run was cancelled.
    #[error("cancelled before start")]
    Cancelled,

    /// The worker pool could not be created.
    #[error("worker pool error: {0}")]
    Pool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn backup_hint(backup: Option<&PathBuf>) -> String {
    backup
        .map(|b| format!(" (backup kept at {})", b.display()))
        .unwrap_or_default()
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Parse { .. } | Error::Json(_) => ErrorCategory::Parse,
            Error::Transport { .. } => ErrorCategory::Transport,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Write { .. } => ErrorCategory::Write,
            Error::Schema { .. } => ErrorCategory::Schema,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::InvalidTransition { .. } | Error::Pool(_) | Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    /// Shorthand for a [`Error::Parse`].
    pub fn parse(source_name: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Parse {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a [`Error::Transport`].
    pub fn transport(host: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Transport {
            host: host.into(),
            message: message.to_string(),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(404) => Error::not_found("remote desired set (HTTP 404)"),
            ureq::Error::StatusCode(code) => Error::transport("remote", format!("HTTP {code}")),
            other => Error::transport("remote", other),
        }
    }
}

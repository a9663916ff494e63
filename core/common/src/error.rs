//! Common error types for geovault.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Exit code for a successful command.
pub const EXIT_OK: i32 = 0;
/// Exit code for failures without a dedicated code.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when the remote diverged from the expected state.
pub const EXIT_CONFLICT: i32 = 2;
/// Exit code when some assets failed to transfer.
pub const EXIT_PARTIAL_FAILURE: i32 = 3;
/// Exit code for a corrupt manifest.
pub const EXIT_CORRUPT: i32 = 4;
/// Exit code when local edits block a pull.
pub const EXIT_UNCOMMITTED: i32 = 5;

/// One asset that failed during a transfer phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFailure {
    /// Asset name as recorded in the manifest.
    pub name: String,
    /// Remote key of the bytes, relative to the collection. Unique where
    /// names repeat across versions.
    pub href: String,
    /// Underlying cause, rendered as text.
    pub cause: String,
}

/// Per-asset outcome of an aborted APPLY phase.
///
/// The manifest is never written when this is produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    /// Hrefs that were transferred before the abort.
    pub succeeded: Vec<String>,
    /// Assets that failed, with their causes.
    pub failed: Vec<AssetFailure>,
}

impl PartialFailure {
    /// Names of the failed assets.
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }

    /// Hrefs of the failed assets.
    pub fn failed_hrefs(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.href.as_str()).collect()
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "; {} ({}): {}", failure.name, failure.href, failure.cause)?;
        }
        Ok(())
    }
}

/// Top-level error type for geovault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Manifest does not parse or violates its ordering invariants.
    #[error("Corrupt manifest at {path}: {reason}")]
    CorruptManifest { path: String, reason: String },

    /// Remote `current_version` differs from the expected remote state.
    #[error(
        "Conflict: expected remote version {}, found {}",
        display_version(.expected),
        display_version(.actual)
    )]
    Conflict {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// A storage interface call failed.
    #[error("Network error: {0}")]
    Network(String),

    /// One or more assets failed during APPLY.
    #[error("Partial failure: {0}")]
    PartialFailure(PartialFailure),

    /// Pull requested while local assets differ from the recorded version.
    #[error("Uncommitted local changes: {}", .assets.join(", "))]
    UncommittedChanges { assets: Vec<String> },

    /// Storage backend misbehaved in a way that is not a transport failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed or out-of-order version identifier.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

fn display_version(version: &Option<String>) -> &str {
    version.as_deref().unwrap_or("<none>")
}

impl Error {
    /// Process exit code a command should terminate with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Conflict { .. } => EXIT_CONFLICT,
            Error::PartialFailure(_) => EXIT_PARTIAL_FAILURE,
            Error::CorruptManifest { .. } => EXIT_CORRUPT,
            Error::UncommittedChanges { .. } => EXIT_UNCOMMITTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    ///
    /// Nothing in the core retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }

    /// Whether this is a missing-object error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Convenience constructor for corrupt-manifest errors.
    pub fn corrupt(path: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::CorruptManifest {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

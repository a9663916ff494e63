//! Drift between the remote state a replica expects and the actual remote.

use serde::{Deserialize, Serialize};
use std::fmt;

use geovault_common::{Error, Result, VersionId};

/// Classification of a drift comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Remote `current_version` is the one this replica last observed.
    InSync,
    /// Neither side has seen a remote manifest yet (first push).
    RemoteMissing,
    /// This replica holds no history and never observed the remote (fresh
    /// clone); whatever the remote holds may be adopted.
    Untracked,
    /// Remote moved (or vanished) since this replica last observed it.
    Diverged,
}

impl DriftStatus {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DriftStatus::Diverged)
    }
}

/// Expected versus actual remote `current_version`.
///
/// Produced fresh for every attempt; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub expected: Option<VersionId>,
    pub actual: Option<VersionId>,
    /// Whether a remote manifest document exists at all.
    pub remote_exists: bool,
    pub status: DriftStatus,
}

impl DriftReport {
    /// Compare the replica's expectation with what the remote reports.
    ///
    /// `local_is_empty` marks a replica with no versions at all.
    pub fn detect(
        expected: Option<VersionId>,
        actual: Option<VersionId>,
        remote_exists: bool,
        local_is_empty: bool,
    ) -> Self {
        let status = match (expected, actual) {
            (None, None) if !remote_exists => DriftStatus::RemoteMissing,
            (None, _) if local_is_empty => DriftStatus::Untracked,
            (e, a) if e == a => DriftStatus::InSync,
            _ => DriftStatus::Diverged,
        };

        Self {
            expected,
            actual,
            remote_exists,
            status,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status.is_conflict()
    }

    /// The conflict error for this report.
    pub fn to_error(&self) -> Error {
        Error::Conflict {
            expected: self.expected.map(|v| v.to_string()),
            actual: self.actual.map(|v| v.to_string()),
        }
    }

    /// Gate an operation on this report.
    ///
    /// Returns whether a conflict was overridden.
    ///
    /// # Errors
    /// - `Conflict` when diverged and `force` is not set
    pub fn check(&self, force: bool) -> Result<bool> {
        if !self.is_conflict() {
            return Ok(false);
        }
        if !force {
            return Err(self.to_error());
        }
        tracing::warn!(
            "Overriding conflict: expected remote {}, found {}",
            fmt_version(&self.expected),
            fmt_version(&self.actual)
        );
        Ok(true)
    }
}

fn fmt_version(version: &Option<VersionId>) -> String {
    version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.status {
            DriftStatus::InSync => "in sync",
            DriftStatus::RemoteMissing => "remote empty",
            DriftStatus::Untracked => "untracked",
            DriftStatus::Diverged => "diverged",
        };
        write!(
            f,
            "{} (expected {}, remote {})",
            label,
            fmt_version(&self.expected),
            fmt_version(&self.actual)
        )
    }
}

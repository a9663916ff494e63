//! Plans and reports returned by coordinator operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use geovault_common::VersionId;
use geovault_staleness::Staleness;

use crate::drift::DriftReport;

/// Flags accepted by every mutating operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Compute and report the plan without performing it.
    pub dry_run: bool,
    /// Proceed despite a detected conflict or uncommitted local changes.
    pub force: bool,
}

impl SyncOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            force: false,
        }
    }

    pub fn force() -> Self {
        Self {
            dry_run: false,
            force: true,
        }
    }
}

/// Coordinator operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Push,
    Pull,
    Sync,
    Rollback,
    Prune,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Push => "push",
            Operation::Pull => "pull",
            Operation::Sync => "sync",
            Operation::Rollback => "rollback",
            Operation::Prune => "prune",
        };
        f.write_str(name)
    }
}

/// One planned asset transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub name: String,
    pub href: String,
    pub checksum: String,
    pub size_bytes: u64,
}

/// Manifest writes a plan will perform in COMMIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestUpdate {
    pub remote: bool,
    pub local: bool,
    /// `current_version` after the update.
    pub current_version: Option<VersionId>,
}

impl ManifestUpdate {
    pub fn is_empty(&self) -> bool {
        !self.remote && !self.local
    }
}

/// Everything an operation intends to do after DIFF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub drift: DriftReport,
    pub uploads: Vec<Transfer>,
    pub downloads: Vec<Transfer>,
    /// Remote hrefs to delete after COMMIT.
    pub deletes: Vec<String>,
    pub manifest_update: Option<ManifestUpdate>,
}

impl SyncPlan {
    pub fn new(drift: DriftReport) -> Self {
        Self {
            drift,
            uploads: Vec::new(),
            downloads: Vec::new(),
            deletes: Vec::new(),
            manifest_update: None,
        }
    }

    /// True when nothing would be transferred or written.
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
            && self.downloads.is_empty()
            && self.deletes.is_empty()
            && self.manifest_update.map_or(true, |u| u.is_empty())
    }

    pub fn transfer_count(&self) -> usize {
        self.uploads.len() + self.downloads.len()
    }
}

/// Result of a mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub operation: Operation,
    pub plan: SyncPlan,
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    pub deleted: Vec<String>,
    /// Asset bytes moved in either direction.
    pub bytes_transferred: u64,
    /// A conflict or uncommitted-changes check was overridden with `force`.
    pub override_used: bool,
    pub dry_run: bool,
    pub manifest_written: bool,
}

impl SyncReport {
    pub fn new(operation: Operation, plan: SyncPlan, opts: SyncOptions) -> Self {
        Self {
            operation,
            plan,
            uploaded: Vec::new(),
            downloaded: Vec::new(),
            deleted: Vec::new(),
            bytes_transferred: 0,
            override_used: false,
            dry_run: opts.dry_run,
            manifest_written: false,
        }
    }

    /// Assets actually moved in either direction.
    pub fn transfer_count(&self) -> usize {
        self.uploaded.len() + self.downloaded.len()
    }

    /// Combine a pull report with the push report that followed it.
    pub fn combine(pull: SyncReport, push: SyncReport) -> Self {
        let mut plan = SyncPlan::new(pull.plan.drift);
        plan.downloads = pull.plan.downloads;
        plan.uploads = push.plan.uploads;
        plan.manifest_update = match (pull.plan.manifest_update, push.plan.manifest_update) {
            (None, None) => None,
            (Some(u), None) | (None, Some(u)) => Some(u),
            (Some(a), Some(b)) => Some(ManifestUpdate {
                remote: a.remote || b.remote,
                local: a.local || b.local,
                current_version: b.current_version,
            }),
        };

        Self {
            operation: Operation::Sync,
            plan,
            uploaded: push.uploaded,
            downloaded: pull.downloaded,
            deleted: Vec::new(),
            bytes_transferred: pull.bytes_transferred + push.bytes_transferred,
            override_used: pull.override_used || push.override_used,
            dry_run: pull.dry_run,
            manifest_written: pull.manifest_written || push.manifest_written,
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        writeln!(f, "{}{}: {}", prefix, self.operation, self.plan.drift)?;
        if self.dry_run {
            for t in &self.plan.uploads {
                writeln!(f, "  would upload {} ({} bytes)", t.href, t.size_bytes)?;
            }
            for t in &self.plan.downloads {
                writeln!(f, "  would download {} -> {}", t.href, t.name)?;
            }
            for href in &self.plan.deletes {
                writeln!(f, "  would delete {}", href)?;
            }
        } else {
            for name in &self.uploaded {
                writeln!(f, "  uploaded {}", name)?;
            }
            for name in &self.downloaded {
                writeln!(f, "  downloaded {}", name)?;
            }
            for href in &self.deleted {
                writeln!(f, "  deleted {}", href)?;
            }
            if self.bytes_transferred > 0 {
                writeln!(f, "  {} bytes transferred", self.bytes_transferred)?;
            }
        }
        if let Some(update) = self.plan.manifest_update.filter(|u| !u.is_empty()) {
            let verb = if self.manifest_written || self.dry_run {
                "manifest"
            } else {
                "manifest (not written)"
            };
            writeln!(
                f,
                "  {} -> {}",
                verb,
                update
                    .current_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<empty>".to_string())
            )?;
        }
        if self.override_used {
            writeln!(f, "  (forced)")?;
        }
        Ok(())
    }
}

/// Read-only view of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub drift: DriftReport,
    pub local_version: Option<VersionId>,
    pub remote_version: Option<VersionId>,
    /// Working-file state of each asset in the local current version.
    pub assets: BTreeMap<String, Staleness>,
    /// Hrefs a push would upload.
    pub pending_uploads: Vec<String>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self
            .local_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<none>".to_string());
        writeln!(f, "local {}; {}", local, self.drift)?;
        for (name, state) in &self.assets {
            writeln!(f, "  {:<32} {}", name, state)?;
        }
        if !self.pending_uploads.is_empty() {
            writeln!(f, "  {} asset(s) not yet pushed", self.pending_uploads.len())?;
        }
        Ok(())
    }
}

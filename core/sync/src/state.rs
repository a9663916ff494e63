//! Per-asset transfer tracking for one APPLY phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use geovault_common::{AssetFailure, Error, PartialFailure, Result};

/// Transfer status of a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Planned, not yet attempted.
    Pending,
    /// Bytes moved and verified.
    Transferred,
    /// Transfer failed.
    Failed,
}

/// Tracking record for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEntry {
    /// Asset name in the manifest.
    pub name: String,
    /// Remote key relative to the collection.
    pub href: String,
    pub status: TransferStatus,
    /// Bytes moved, once transferred.
    pub bytes: u64,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TransferEntry {
    pub fn new(name: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            href: href.into(),
            status: TransferStatus::Pending,
            bytes: 0,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_transferred(&mut self, bytes: u64) {
        self.status = TransferStatus::Transferred;
        self.bytes = bytes;
        self.finished_at = Some(Utc::now());
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TransferStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// Outcome log of the transfers in one APPLY phase, keyed by href.
///
/// Several versions may reference the same bytes under one href; each href
/// is transferred once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferLog {
    entries: BTreeMap<String, TransferEntry>,
}

impl TransferLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a planned transfer.
    pub fn plan(&mut self, name: &str, href: &str) {
        self.entries
            .insert(href.to_string(), TransferEntry::new(name, href));
    }

    pub fn get(&self, href: &str) -> Option<&TransferEntry> {
        self.entries.get(href)
    }

    /// Record an outcome, registering the entry if it was not planned.
    pub fn record(&mut self, name: &str, href: &str, outcome: &Result<u64>) {
        let entry = self
            .entries
            .entry(href.to_string())
            .or_insert_with(|| TransferEntry::new(name, href));
        match outcome {
            Ok(bytes) => entry.mark_transferred(*bytes),
            Err(e) => entry.mark_failed(e.to_string()),
        }
    }

    /// Hrefs moved and verified, in href order.
    pub fn transferred(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.status == TransferStatus::Transferred)
            .map(|e| e.href.clone())
            .collect()
    }

    /// Total bytes moved.
    pub fn bytes_transferred(&self) -> u64 {
        self.entries.values().map(|e| e.bytes).sum()
    }

    /// Failure payload, if any transfer failed.
    ///
    /// Pending entries count as failed: they were never confirmed.
    pub fn partial_failure(&self) -> Option<PartialFailure> {
        let failed: Vec<AssetFailure> = self
            .entries
            .values()
            .filter(|e| matches!(e.status, TransferStatus::Failed | TransferStatus::Pending))
            .map(|e| AssetFailure {
                name: e.name.clone(),
                href: e.href.clone(),
                cause: e
                    .error
                    .clone()
                    .unwrap_or_else(|| "transfer not completed".to_string()),
            })
            .collect();

        if failed.is_empty() {
            return None;
        }

        Some(PartialFailure {
            succeeded: self.transferred(),
            failed,
        })
    }

    /// `Ok` when every transfer completed, otherwise the partial failure.
    pub fn into_result(self) -> Result<Self> {
        match self.partial_failure() {
            Some(failure) => Err(Error::PartialFailure(failure)),
            None => Ok(self),
        }
    }
}

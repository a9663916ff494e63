//! Tiered staleness checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use geovault_common::Result;
use geovault_manifest::{checksum_file, Asset, SchemaFingerprint, Version};
use geovault_schema::{diff, fingerprint, is_breaking};

use crate::extractor::Extractor;

/// How thoroughly to check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessMode {
    /// mtime gate, then structural summary, then schema diff.
    #[default]
    Tiered,
    /// Always hash the full content.
    FullHash,
}

/// Outcome of checking one working file against its recorded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    /// Unchanged since publish.
    Fresh,
    /// Rewritten, but extent and count (or content hash) are the same.
    TouchedUnchanged,
    /// Content changed; schema unchanged or changed additively.
    ContentChangedCompatible,
    /// Content changed with a breaking schema change.
    ContentChangedBreaking,
    /// The working file does not exist.
    Missing,
}

impl Staleness {
    /// Whether the working file no longer matches the recorded asset.
    pub fn is_changed(&self) -> bool {
        matches!(
            self,
            Staleness::ContentChangedCompatible
                | Staleness::ContentChangedBreaking
                | Staleness::Missing
        )
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Staleness::Fresh => "fresh",
            Staleness::TouchedUnchanged => "touched",
            Staleness::ContentChangedCompatible => "changed",
            Staleness::ContentChangedBreaking => "changed (breaking)",
            Staleness::Missing => "missing",
        };
        f.write_str(label)
    }
}

/// Modification time of a file, if the platform reports one.
pub async fn modified_time(path: &Path) -> Result<Option<DateTime<Utc>>> {
    let meta = fs::metadata(path).await?;
    Ok(meta.modified().ok().map(DateTime::<Utc>::from))
}

/// Decides whether a working file differs from its published asset.
///
/// Tiers, cheapest first:
///
/// 0. modification time equals the recorded `source_mtime`: `Fresh`, no
///    further I/O.
/// 1. the extractor's structural summary (extent, count) equals the recorded
///    one: `TouchedUnchanged`.
/// 2. the extractor's schema is fingerprinted and diffed against the
///    version's schema: `ContentChangedCompatible` or
///    `ContentChangedBreaking`.
///
/// Edits that leave extent, count and schema untouched (attribute values
/// only) are reported as unchanged in tiered mode. Use
/// [`StalenessMode::FullHash`] when that matters.
///
/// Without an extractor, tiers 1 and 2 are replaced by a content hash
/// comparison.
pub struct StalenessDetector {
    extractor: Option<Arc<dyn Extractor>>,
    mode: StalenessMode,
}

impl StalenessDetector {
    pub fn new(extractor: Option<Arc<dyn Extractor>>, mode: StalenessMode) -> Self {
        Self { extractor, mode }
    }

    pub fn mode(&self) -> StalenessMode {
        self.mode
    }

    /// Check `file` against `asset`, recorded under a version with `schema`.
    ///
    /// # Errors
    /// - I/O failures other than the file being absent
    /// - Extractor failures
    pub async fn check(
        &self,
        asset: &Asset,
        schema: &SchemaFingerprint,
        file: &Path,
    ) -> Result<Staleness> {
        let mtime = match fs::metadata(file).await {
            Ok(meta) => meta.modified().ok().map(DateTime::<Utc>::from),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Staleness::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        if self.mode == StalenessMode::FullHash {
            if checksum_file(file).await? == asset.checksum {
                return Ok(Staleness::Fresh);
            }
            debug!("{}: checksum differs", file.display());
            return self.classify(schema, file).await;
        }

        // Tier 0
        if mtime.is_some() && mtime == asset.source_mtime {
            return Ok(Staleness::Fresh);
        }

        let Some(extractor) = &self.extractor else {
            let same = checksum_file(file).await? == asset.checksum;
            debug!("{}: mtime moved, checksum same={}", file.display(), same);
            return Ok(if same {
                Staleness::TouchedUnchanged
            } else {
                Staleness::ContentChangedCompatible
            });
        };

        // Tier 1
        if let Some(recorded) = &asset.summary {
            let current = extractor.summary(file).await?;
            if &current == recorded {
                debug!("{}: touched, summary unchanged", file.display());
                return Ok(Staleness::TouchedUnchanged);
            }
        }

        // Tier 2
        self.classify(schema, file).await
    }

    async fn classify(&self, schema: &SchemaFingerprint, file: &Path) -> Result<Staleness> {
        let Some(extractor) = &self.extractor else {
            return Ok(Staleness::ContentChangedCompatible);
        };

        let current = fingerprint(&extractor.metadata(file).await?);
        let changes = diff(schema, &current);
        debug!("{}: {} schema change(s)", file.display(), changes.len());

        Ok(if is_breaking(&changes) {
            Staleness::ContentChangedBreaking
        } else {
            Staleness::ContentChangedCompatible
        })
    }

    /// Check every asset of `version` against `<dir>/<name>`.
    pub async fn check_version(
        &self,
        version: &Version,
        dir: &Path,
    ) -> Result<BTreeMap<String, Staleness>> {
        let mut results = BTreeMap::new();
        for (name, asset) in &version.assets {
            let state = self.check(asset, &version.schema, &dir.join(name)).await?;
            results.insert(name.clone(), state);
        }
        Ok(results)
    }
}

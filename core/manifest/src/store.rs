//! Version manifest store: load, validate, append, prune, rollback, save.
//!
//! `append`, `prune` and `rollback` are pure: they take a manifest value and
//! return a new one. Only `save` and `init` write to disk, and they do so
//! with a write-to-temp-then-rename so a reader never observes a partial
//! document.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use geovault_common::{Error, Result, VersionId};

use crate::model::{changed_names, Manifest, Version};

/// File name of a collection's manifest.
pub const MANIFEST_FILENAME: &str = "versions.json";

/// Path of the manifest inside a collection directory.
pub fn manifest_path(collection_dir: &Path) -> PathBuf {
    collection_dir.join(MANIFEST_FILENAME)
}

/// Result of marking old versions as pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Versions newly flagged as pruned, oldest first.
    pub pruned: Vec<VersionId>,
    /// Asset hrefs no retained version references any more. Their bytes may
    /// be deleted by the caller.
    pub removable: Vec<String>,
}

impl PruneOutcome {
    pub fn is_empty(&self) -> bool {
        self.pruned.is_empty()
    }
}

/// Check the structural invariants of a manifest.
///
/// Returns the first violation as text.
pub fn validate(manifest: &Manifest) -> std::result::Result<(), String> {
    let major = manifest.spec_version.split('.').next().unwrap_or_default();
    if major != "1" {
        return Err(format!(
            "unsupported spec_version '{}'",
            manifest.spec_version
        ));
    }

    for pair in manifest.versions.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(format!(
                "version {} follows {}; versions must increase strictly",
                pair[1].version, pair[0].version
            ));
        }
    }

    for entry in &manifest.versions {
        for (field, target) in [
            ("rollback_to", entry.rollback_to),
            ("rollback_from", entry.rollback_from),
        ] {
            if let Some(target) = target {
                if target >= entry.version || manifest.version(&target).is_none() {
                    return Err(format!(
                        "version {} has {} {} which is not an earlier version",
                        entry.version, field, target
                    ));
                }
            }
        }
    }

    let highest_live = manifest.live_versions().map(|v| v.version).max();
    match (manifest.current_version, highest_live) {
        (None, None) if manifest.versions.is_empty() => Ok(()),
        (None, _) => Err("current_version is missing".to_string()),
        (Some(current), _) if manifest.version(&current).is_none() => Err(format!(
            "current_version {} is absent from the version list",
            current
        )),
        (Some(current), Some(highest)) if current == highest => Ok(()),
        (Some(current), Some(highest)) => Err(format!(
            "current_version {} is not the highest live version {}",
            current, highest
        )),
        (Some(current), None) => Err(format!(
            "current_version {} points at a pruned version",
            current
        )),
    }
}

/// Parse and validate a manifest document.
///
/// `origin` names the document in error messages (a path or remote key).
pub fn parse(bytes: &[u8], origin: &str) -> Result<Manifest> {
    let manifest: Manifest =
        serde_json::from_slice(bytes).map_err(|e| Error::corrupt(origin, e.to_string()))?;
    validate(&manifest).map_err(|reason| Error::corrupt(origin, reason))?;
    Ok(manifest)
}

/// Serialize a manifest after checking its invariants.
pub fn serialize(manifest: &Manifest) -> Result<Vec<u8>> {
    validate(manifest).map_err(|reason| {
        Error::InvalidInput(format!("refusing to serialize invalid manifest: {}", reason))
    })?;
    let mut json = manifest
        .to_json()
        .map_err(|e| Error::Serialization(e.to_string()))?;
    json.push('\n');
    Ok(json.into_bytes())
}

/// Load a manifest from disk.
///
/// # Errors
/// - `NotFound` if there is no document at `path`
/// - `CorruptManifest` if it does not parse or violates ordering invariants
pub async fn load(path: &Path) -> Result<Manifest> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!(
                "No manifest at {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let manifest = parse(&bytes, &path.display().to_string())?;
    debug!(
        "Loaded manifest {} ({} versions)",
        path.display(),
        manifest.versions.len()
    );
    Ok(manifest)
}

/// Write a manifest atomically: temp file in the same directory, fsync,
/// rename over the target.
pub async fn save(path: &Path, manifest: &Manifest) -> Result<()> {
    let bytes = serialize(manifest)?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| MANIFEST_FILENAME.to_string());
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let write = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    };

    if let Err(e) = write.await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    debug!("Saved manifest {}", path.display());
    Ok(())
}

/// Create an empty manifest in `collection_dir`.
///
/// # Errors
/// - `InvalidInput` if a manifest already exists there
pub async fn init(collection_dir: &Path) -> Result<Manifest> {
    let path = manifest_path(collection_dir);
    if fs::try_exists(&path).await? {
        return Err(Error::InvalidInput(format!(
            "Manifest already exists at {}",
            path.display()
        )));
    }
    let manifest = Manifest::new();
    save(&path, &manifest).await?;
    info!("Initialized collection manifest at {}", path.display());
    Ok(manifest)
}

/// Append a version, returning the new manifest.
///
/// # Errors
/// - `InvalidVersion` if the version is not strictly greater than every
///   existing version
/// - `InvalidInput` if the entry is already flagged as pruned
pub fn append(manifest: &Manifest, version: Version) -> Result<Manifest> {
    if let Some(max) = manifest.max_version() {
        if version.version <= max {
            return Err(Error::InvalidVersion(format!(
                "{} is not greater than the latest version {}",
                version.version, max
            )));
        }
    }
    if version.pruned {
        return Err(Error::InvalidInput(
            "cannot append a version that is already pruned".to_string(),
        ));
    }

    let mut next = manifest.clone();
    next.current_version = Some(version.version);
    next.versions.push(version);

    validate(&next).map_err(Error::InvalidInput)?;
    Ok(next)
}

/// Flag all but the newest `keep_count` live versions as pruned.
///
/// Version metadata is never removed. The outcome lists the hrefs whose
/// bytes no retained version needs.
///
/// # Errors
/// - `InvalidInput` if `keep_count` is zero
pub fn prune(manifest: &Manifest, keep_count: usize) -> Result<(Manifest, PruneOutcome)> {
    if keep_count == 0 {
        return Err(Error::InvalidInput(
            "keep_count must be at least 1".to_string(),
        ));
    }

    let mut live: Vec<VersionId> = manifest.live_versions().map(|v| v.version).collect();
    live.sort();
    let cut = live.len().saturating_sub(keep_count);
    let doomed: BTreeSet<VersionId> = live[..cut].iter().copied().collect();

    let mut next = manifest.clone();
    for entry in next.versions.iter_mut() {
        if doomed.contains(&entry.version) {
            entry.pruned = true;
        }
    }

    let retained: BTreeSet<&str> = next.live_versions().flat_map(|v| v.hrefs()).collect();
    let removable: BTreeSet<String> = manifest
        .versions
        .iter()
        .filter(|v| doomed.contains(&v.version))
        .flat_map(|v| v.hrefs())
        .filter(|href| !retained.contains(href))
        .map(str::to_string)
        .collect();

    Ok((
        next,
        PruneOutcome {
            pruned: doomed.into_iter().collect(),
            removable: removable.into_iter().collect(),
        },
    ))
}

/// Append a version that restores an earlier version's assets and schema.
///
/// The new version is the current version with a minor bump; it carries
/// `rollback_from`/`rollback_to` provenance and is never flagged breaking.
///
/// # Errors
/// - `NotFound` if `target` is not in the manifest
/// - `InvalidInput` if `target` is pruned or already current, or the
///   manifest is empty
pub fn rollback(
    manifest: &Manifest,
    target: &VersionId,
    message: Option<String>,
    now: DateTime<Utc>,
) -> Result<Manifest> {
    let current = manifest
        .current()
        .ok_or_else(|| Error::InvalidInput("cannot roll back an empty manifest".to_string()))?;
    let restored = manifest
        .version(target)
        .ok_or_else(|| Error::NotFound(format!("version {} is not in the manifest", target)))?;

    if restored.pruned {
        return Err(Error::InvalidInput(format!(
            "version {} is pruned; its content is gone",
            target
        )));
    }
    if &current.version == target {
        return Err(Error::InvalidInput(format!(
            "version {} is already current",
            target
        )));
    }

    let entry = Version {
        version: current.version.bump_minor()?,
        created: now,
        breaking: false,
        message: message.unwrap_or_else(|| format!("Rollback to {}", target)),
        schema: restored.schema.clone(),
        assets: restored.assets.clone(),
        changes: changed_names(Some(&current.assets), &restored.assets),
        pruned: false,
        rollback_from: Some(current.version),
        rollback_to: Some(*target),
    };

    append(manifest, entry)
}

//! Building a new version from the working files of a collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::fs;

use geovault_common::{Error, Result, VersionId};
use geovault_manifest::{
    changed_names, checksum_file, Asset, Manifest, StructuralSummary, Version,
};
use geovault_schema::{diff, fingerprint, is_breaking, summarize, ExtractedMetadata, FieldChange};
use geovault_staleness::{modified_time, Extractor};

use crate::staging::working_path;

/// One working file to include in a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInput {
    /// Relative path of the working file inside the collection directory.
    pub name: String,
    /// Pre-conversion source, recorded for provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Structural summary; taken from the extractor when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<StructuralSummary>,
}

impl AssetInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_path: None,
            summary: None,
        }
    }
}

/// Input to a publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Version message; generated from the changes when blank.
    pub message: String,
    pub assets: Vec<AssetInput>,
    /// Extractor output describing the collection's structure.
    pub metadata: ExtractedMetadata,
}

/// A version ready to append, with the schema changes that shaped it.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub version: Version,
    pub schema_changes: Vec<FieldChange>,
}

/// Remote key for an asset in `version`.
///
/// Unchanged content keeps the previous version's key so it is uploaded once.
pub fn assign_href(
    previous: Option<&Version>,
    version: &VersionId,
    name: &str,
    checksum: &str,
) -> String {
    previous
        .and_then(|p| p.assets.get(name))
        .filter(|prev| prev.checksum == checksum)
        .map(|prev| prev.href.clone())
        .unwrap_or_else(|| format!("{}/{}", version, name))
}

/// Describe the working files and decide the next version.
///
/// # Errors
/// - `InvalidInput` for an empty or duplicated asset list, or when nothing
///   changed since the current version
/// - `Io` when a working file cannot be read
pub async fn build_version(
    manifest: &Manifest,
    collection_dir: &Path,
    request: &PublishRequest,
    extractor: Option<&dyn Extractor>,
    now: DateTime<Utc>,
) -> Result<PublishOutcome> {
    if request.assets.is_empty() {
        return Err(Error::InvalidInput("no assets to publish".to_string()));
    }
    let mut seen = BTreeSet::new();
    for input in &request.assets {
        if !seen.insert(input.name.as_str()) {
            return Err(Error::InvalidInput(format!(
                "asset {} listed twice",
                input.name
            )));
        }
    }

    // Placeholder hrefs are assigned once the version number is known.
    let mut assets = BTreeMap::new();
    for input in &request.assets {
        let path = working_path(collection_dir, &input.name)?;
        let size_bytes = fs::metadata(&path).await?.len();
        let checksum = checksum_file(&path).await?;
        let summary = match (&input.summary, extractor) {
            (Some(summary), _) => Some(summary.clone()),
            (None, Some(extractor)) => Some(extractor.summary(&path).await?),
            (None, None) => None,
        };

        assets.insert(
            input.name.clone(),
            Asset {
                checksum,
                size_bytes,
                href: String::new(),
                source_path: input.source_path.clone(),
                source_mtime: modified_time(&path).await?,
                summary,
            },
        );
    }

    let schema = fingerprint(&request.metadata);
    let previous = manifest.current();
    let schema_changes = previous
        .map(|p| diff(&p.schema, &schema))
        .unwrap_or_default();
    let changes = changed_names(previous.map(|p| &p.assets), &assets);

    if previous.is_some() && changes.is_empty() && schema_changes.is_empty() {
        return Err(Error::InvalidInput("nothing to publish".to_string()));
    }

    let breaking = is_breaking(&schema_changes);
    let version = match manifest.max_version() {
        None => VersionId::initial(),
        Some(max) => max.next(breaking)?,
    };

    for (name, asset) in assets.iter_mut() {
        asset.href = assign_href(previous, &version, name, &asset.checksum);
    }

    let message = if request.message.trim().is_empty() {
        let lines = summarize(&schema_changes);
        if lines.is_empty() {
            format!("Publish {}", version)
        } else {
            lines.join("; ")
        }
    } else {
        request.message.trim().to_string()
    };

    Ok(PublishOutcome {
        version: Version {
            version,
            created: now,
            breaking,
            message,
            schema,
            assets,
            changes,
            pruned: false,
            rollback_from: None,
            rollback_to: None,
        },
        schema_changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geovault_manifest::{append, FormatKind};
    use geovault_schema::ExtractedField;
    use tempfile::TempDir;

    fn metadata(columns: &[(&str, &str)]) -> ExtractedMetadata {
        let mut meta = ExtractedMetadata::empty(FormatKind::Tabular);
        meta.fields = columns
            .iter()
            .map(|(name, ty)| ExtractedField {
                name: name.to_string(),
                data_type: ty.to_string(),
                nullable: true,
                geometry_kind: None,
                crs: None,
            })
            .collect();
        meta
    }

    fn request(names: &[&str], columns: &[(&str, &str)]) -> PublishRequest {
        PublishRequest {
            message: String::new(),
            assets: names.iter().map(|n| AssetInput::new(*n)).collect(),
            metadata: metadata(columns),
        }
    }

    #[tokio::test]
    async fn test_first_publish_is_initial() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.parquet"), b"aaa").unwrap();
        std::fs::write(temp.path().join("b.parquet"), b"bbbb").unwrap();

        let outcome = build_version(
            &Manifest::new(),
            temp.path(),
            &request(&["a.parquet", "b.parquet"], &[("id", "int64")]),
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        let v = outcome.version;
        assert_eq!(v.version, VersionId::initial());
        assert!(!v.breaking);
        assert_eq!(v.changes, vec!["a.parquet", "b.parquet"]);
        assert_eq!(v.assets["a.parquet"].href, "1.0.0/a.parquet");
        assert_eq!(v.assets["b.parquet"].size_bytes, 4);
        assert!(v.assets["a.parquet"].source_mtime.is_some());
        assert_eq!(v.message, "Publish 1.0.0");
    }

    #[tokio::test]
    async fn test_unchanged_assets_keep_href_and_breaking_bumps_major() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.parquet"), b"aaa").unwrap();
        std::fs::write(temp.path().join("b.parquet"), b"bbb").unwrap();

        let first = build_version(
            &Manifest::new(),
            temp.path(),
            &request(&["a.parquet", "b.parquet"], &[("id", "int64"), ("name", "text")]),
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        let manifest = append(&Manifest::new(), first.version).unwrap();

        std::fs::write(temp.path().join("b.parquet"), b"BBB").unwrap();
        let second = build_version(
            &manifest,
            temp.path(),
            &request(&["a.parquet", "b.parquet"], &[("id", "int64")]),
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        let v = second.version;
        assert_eq!(v.version.to_string(), "2.0.0");
        assert!(v.breaking);
        assert_eq!(v.changes, vec!["b.parquet"]);
        assert_eq!(v.assets["a.parquet"].href, "1.0.0/a.parquet");
        assert_eq!(v.assets["b.parquet"].href, "2.0.0/b.parquet");
        assert_eq!(v.message, "! name: removed");
    }

    #[tokio::test]
    async fn test_nothing_to_publish() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.parquet"), b"aaa").unwrap();
        let req = request(&["a.parquet"], &[("id", "int64")]);

        let first = build_version(&Manifest::new(), temp.path(), &req, None, Utc::now())
            .await
            .unwrap();
        let manifest = append(&Manifest::new(), first.version).unwrap();

        let err = build_version(&manifest, temp.path(), &req, None, Utc::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nothing to publish"));
    }

    #[tokio::test]
    async fn test_rejects_duplicates_and_missing_files() {
        let temp = TempDir::new().unwrap();
        let dup = request(&["a", "a"], &[]);
        assert!(matches!(
            build_version(&Manifest::new(), temp.path(), &dup, None, Utc::now())
                .await
                .unwrap_err(),
            Error::InvalidInput(_)
        ));

        let missing = request(&["absent.tif"], &[]);
        assert!(matches!(
            build_version(&Manifest::new(), temp.path(), &missing, None, Utc::now())
                .await
                .unwrap_err(),
            Error::Io(_)
        ));
    }
}

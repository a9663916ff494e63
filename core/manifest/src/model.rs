//! Version manifest data model.
//!
//! The serialized shape is the on-disk `versions.json` document:
//!
//! ```text
//! { spec_version, current_version,
//!   versions: [ { version, created, breaking, message,
//!                 schema: { type, fingerprint: {...} },
//!                 assets: { "<name>": { checksum, size_bytes, href, ... } },
//!                 changes: [names], pruned?, rollback_from?, rollback_to? } ] }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use geovault_common::VersionId;

use crate::float;

/// Manifest document format version written by this crate.
pub const SPEC_VERSION: &str = "1.0";

fn is_false(b: &bool) -> bool {
    !*b
}

/// Broad shape of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    /// Feature/row data with named columns, optionally with geometry.
    Tabular,
    /// Raster data made of bands.
    Gridded,
}

/// Descriptor of one tabular column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFingerprint {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
}

/// Descriptor of one raster band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandFingerprint {
    pub name: String,
    pub data_type: String,
    #[serde(default, with = "float::option", skip_serializing_if = "Option::is_none")]
    pub nodata: Option<f64>,
}

impl PartialEq for BandFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && float::same_option(self.nodata, other.nodata)
    }
}

/// Per-field and per-band descriptors of a fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaLayout {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnFingerprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bands: Vec<BandFingerprint>,
    /// Dataset-level coordinate reference (gridded data).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    /// Pixel size `[x, y]` (gridded data).
    #[serde(default, with = "float::option_array", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<[f64; 2]>,
}

impl PartialEq for SchemaLayout {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.bands == other.bands
            && self.crs == other.crs
            && float::same_array(&self.resolution, &other.resolution)
    }
}

/// Structural summary of a dataset, sufficient to detect breaking change.
///
/// Serialized as `{ "type": ..., "fingerprint": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaFingerprint {
    #[serde(rename = "type")]
    pub kind: FormatKind,
    #[serde(rename = "fingerprint")]
    pub layout: SchemaLayout,
}

impl SchemaFingerprint {
    /// An empty fingerprint of the given kind.
    pub fn empty(kind: FormatKind) -> Self {
        Self {
            kind,
            layout: SchemaLayout::default(),
        }
    }
}

/// Cheap structural statistics recorded at publish time.
///
/// Compared by the staleness detector's header-only tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralSummary {
    /// Spatial extent `[min_x, min_y, max_x, max_y]`.
    #[serde(default, with = "float::option_array", skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// Temporal extent `[start, end]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<[DateTime<Utc>; 2]>,
    /// Feature/row count, or band count for gridded data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl PartialEq for StructuralSummary {
    fn eq(&self, other: &Self) -> bool {
        float::same_array(&self.bbox, &other.bbox)
            && self.temporal == other.temporal
            && self.count == other.count
    }
}

/// One tracked file within a version. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Content checksum, `blake2b:<hex>`.
    pub checksum: String,
    pub size_bytes: u64,
    /// Remote key of the bytes, relative to the collection prefix.
    pub href: String,
    /// Pre-conversion source file, if the asset was converted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Modification time of the source (or the asset itself) at publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mtime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<StructuralSummary>,
}

/// One published state of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version: VersionId,
    pub created: DateTime<Utc>,
    pub breaking: bool,
    pub message: String,
    pub schema: SchemaFingerprint,
    pub assets: BTreeMap<String, Asset>,
    /// Asset names that changed relative to the previous version.
    pub changes: Vec<String>,
    /// Content deleted, metadata retained.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pruned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_to: Option<VersionId>,
}

impl Version {
    /// Whether the immutable part of two entries is identical.
    ///
    /// The `pruned` flag is deliberately excluded: pruning is the one
    /// permitted change to an appended entry.
    pub fn same_content(&self, other: &Version) -> bool {
        self.version == other.version
            && self.created == other.created
            && self.breaking == other.breaking
            && self.message == other.message
            && self.schema == other.schema
            && self.assets == other.assets
            && self.changes == other.changes
            && self.rollback_from == other.rollback_from
            && self.rollback_to == other.rollback_to
    }

    /// Remote keys (relative hrefs) this version references.
    pub fn hrefs(&self) -> impl Iterator<Item = &str> {
        self.assets.values().map(|a| a.href.as_str())
    }
}

/// Names whose checksum differs between two asset maps, plus names present
/// on only one side. Sorted.
pub fn changed_names(
    previous: Option<&BTreeMap<String, Asset>>,
    current: &BTreeMap<String, Asset>,
) -> Vec<String> {
    let empty = BTreeMap::new();
    let previous = previous.unwrap_or(&empty);

    let mut names: BTreeSet<String> = BTreeSet::new();
    for (name, asset) in current {
        match previous.get(name) {
            Some(prev) if prev.checksum == asset.checksum => {}
            _ => {
                names.insert(name.clone());
            }
        }
    }
    for name in previous.keys() {
        if !current.contains_key(name) {
            names.insert(name.clone());
        }
    }
    names.into_iter().collect()
}

/// Append-only version history of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub spec_version: String,
    pub current_version: Option<VersionId>,
    /// Remote `current_version` last observed by a successful push or pull.
    ///
    /// Local bookkeeping only; stripped from the copy written remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_remote: Option<VersionId>,
    pub versions: Vec<Version>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            current_version: None,
            expected_remote: None,
            versions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Look up a version entry.
    pub fn version(&self, id: &VersionId) -> Option<&Version> {
        self.versions.iter().find(|v| &v.version == id)
    }

    /// The entry `current_version` points at.
    pub fn current(&self) -> Option<&Version> {
        self.current_version.as_ref().and_then(|id| self.version(id))
    }

    /// Highest version identifier, pruned or not.
    pub fn max_version(&self) -> Option<VersionId> {
        self.versions.iter().map(|v| v.version).max()
    }

    /// Versions whose content is still retained, oldest first.
    pub fn live_versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter().filter(|v| !v.pruned)
    }

    /// Whether every entry of `self` appears, unchanged and in order, at the
    /// start of `other`.
    pub fn is_history_prefix_of(&self, other: &Manifest) -> bool {
        self.versions.len() <= other.versions.len()
            && self
                .versions
                .iter()
                .zip(&other.versions)
                .all(|(a, b)| a.same_content(b))
    }

    /// The copy of this manifest that is published remotely.
    pub fn for_remote(&self) -> Manifest {
        Manifest {
            expected_remote: None,
            ..self.clone()
        }
    }

    /// Most recent version whose content has been pruned.
    pub fn latest_pruned(&self) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.pruned)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON without validating invariants.
    ///
    /// Use [`crate::store::parse`] for documents read from disk or a remote.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

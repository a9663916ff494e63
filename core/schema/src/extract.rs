//! Extractor output and its conversion into a schema fingerprint.

use serde::{Deserialize, Serialize};

use geovault_manifest::float;
use geovault_manifest::{
    BandFingerprint, ColumnFingerprint, FormatKind, SchemaFingerprint, SchemaLayout,
};

/// One column as reported by an external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
}

fn default_nullable() -> bool {
    true
}

/// One raster band as reported by an external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedBand {
    /// Band description; unnamed bands are numbered from 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub data_type: String,
    #[serde(default, with = "float::option", skip_serializing_if = "Option::is_none")]
    pub nodata: Option<f64>,
}

/// Structural metadata of a dataset, as produced by an external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub kind: FormatKind,
    #[serde(default)]
    pub fields: Vec<ExtractedField>,
    #[serde(default)]
    pub bands: Vec<ExtractedBand>,
    /// Dataset-level coordinate reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    /// Dataset-level geometry kind, applied to geometry columns that lack one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_kind: Option<String>,
    #[serde(default, with = "float::option_array", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<[f64; 2]>,
}

impl ExtractedMetadata {
    /// Metadata with no fields or bands.
    pub fn empty(kind: FormatKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            bands: Vec::new(),
            crs: None,
            geometry_kind: None,
            resolution: None,
        }
    }
}

/// Canonical spelling of a type name: trimmed and lower-case.
pub fn normalize_type(data_type: &str) -> String {
    data_type.trim().to_ascii_lowercase()
}

fn normalize_crs(crs: &Option<String>) -> Option<String> {
    crs.as_deref()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
}

fn normalize_geometry(kind: &Option<String>) -> Option<String> {
    kind.as_deref()
        .map(|k| k.trim().to_ascii_lowercase())
        .filter(|k| !k.is_empty())
}

fn is_geometry_type(data_type: &str) -> bool {
    matches!(data_type, "geometry" | "geography" | "wkb")
}

/// Build the fingerprint for extracted metadata.
///
/// Deterministic: equal inputs always produce equal fingerprints. Column
/// order follows the extractor; tabular data ignores `bands` and gridded
/// data ignores `fields`.
pub fn fingerprint(metadata: &ExtractedMetadata) -> SchemaFingerprint {
    let dataset_crs = normalize_crs(&metadata.crs);
    let dataset_geometry = normalize_geometry(&metadata.geometry_kind);

    let layout = match metadata.kind {
        FormatKind::Tabular => SchemaLayout {
            columns: metadata
                .fields
                .iter()
                .map(|field| {
                    let data_type = normalize_type(&field.data_type);
                    let spatial =
                        is_geometry_type(&data_type) || field.geometry_kind.is_some();
                    ColumnFingerprint {
                        name: field.name.trim().to_string(),
                        nullable: field.nullable,
                        geometry_kind: normalize_geometry(&field.geometry_kind)
                            .or_else(|| spatial.then(|| dataset_geometry.clone()).flatten()),
                        crs: normalize_crs(&field.crs)
                            .or_else(|| spatial.then(|| dataset_crs.clone()).flatten()),
                        data_type,
                    }
                })
                .collect(),
            ..SchemaLayout::default()
        },
        FormatKind::Gridded => SchemaLayout {
            bands: metadata
                .bands
                .iter()
                .enumerate()
                .map(|(i, band)| BandFingerprint {
                    name: band
                        .name
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("band_{}", i + 1)),
                    data_type: normalize_type(&band.data_type),
                    nodata: band.nodata,
                })
                .collect(),
            crs: dataset_crs,
            resolution: metadata.resolution,
            ..SchemaLayout::default()
        },
    };

    SchemaFingerprint {
        kind: metadata.kind,
        layout,
    }
}

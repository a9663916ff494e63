//! Field-level comparison of two schema fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;

use geovault_manifest::{
    float, BandFingerprint, ColumnFingerprint, FormatKind, SchemaFingerprint, SchemaLayout,
};

/// Field name used for dataset-level changes (kind, gridded CRS, resolution).
pub const DATASET_FIELD: &str = "<dataset>";

/// What changed about one field or band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    /// Field now carries the name; `from` is the name it replaced.
    Renamed { from: String },
    TypeChanged { from: String, to: String },
    NullabilityChanged { from: bool, to: bool },
    GeometryKindChanged { from: Option<String>, to: Option<String> },
    CrsChanged { from: Option<String>, to: Option<String> },
    NodataChanged { from: Option<f64>, to: Option<f64> },
    ResolutionChanged { from: Option<[f64; 2]>, to: Option<[f64; 2]> },
    KindChanged { from: FormatKind, to: FormatKind },
}

impl ChangeKind {
    /// Classification of this change alone.
    pub fn is_breaking(&self) -> bool {
        match self {
            ChangeKind::Added => false,
            ChangeKind::NullabilityChanged { to, .. } => !*to,
            _ => true,
        }
    }
}

/// One difference between two fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl FieldChange {
    fn new(field: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }

    pub fn is_breaking(&self) -> bool {
        self.kind.is_breaking()
    }
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn opt_pair(value: &Option<[f64; 2]>) -> String {
    value
        .map(|[x, y]| format!("{}x{}", x, y))
        .unwrap_or_else(|| "none".to_string())
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.is_breaking() { "!" } else { "+" };
        write!(f, "{} {}: ", marker, self.field)?;
        match &self.kind {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Renamed { from } => write!(f, "renamed from {}", from),
            ChangeKind::TypeChanged { from, to } => write!(f, "type {} -> {}", from, to),
            ChangeKind::NullabilityChanged { to, .. } => {
                if *to {
                    write!(f, "now nullable")
                } else {
                    write!(f, "now non-nullable")
                }
            }
            ChangeKind::GeometryKindChanged { from, to } => {
                write!(f, "geometry {} -> {}", opt(from), opt(to))
            }
            ChangeKind::CrsChanged { from, to } => write!(f, "crs {} -> {}", opt(from), opt(to)),
            ChangeKind::NodataChanged { from, to } => {
                write!(f, "nodata {} -> {}", opt(from), opt(to))
            }
            ChangeKind::ResolutionChanged { from, to } => {
                write!(f, "resolution {} -> {}", opt_pair(from), opt_pair(to))
            }
            ChangeKind::KindChanged { from, to } => write!(f, "kind {:?} -> {:?}", from, to),
        }
    }
}

/// Whether any change in the list is breaking.
pub fn is_breaking(changes: &[FieldChange]) -> bool {
    changes.iter().any(FieldChange::is_breaking)
}

/// One human-readable line per change.
pub fn summarize(changes: &[FieldChange]) -> Vec<String> {
    changes.iter().map(|c| c.to_string()).collect()
}

/// No-data values compare so that NaN equals NaN.
fn nodata_eq(a: Option<f64>, b: Option<f64>) -> bool {
    float::same_option(a, b)
}

/// Compare two fingerprints.
///
/// Fields and bands are matched by name. A change of format kind is
/// reported alone, since nothing below it is comparable.
///
/// Renames are inferred, not recorded: each removed field is paired with
/// the first unpaired added field whose type signature (type, nullability,
/// geometry kind, CRS for columns; type and no-data for bands) is identical.
/// Two fields swapped by name, or a rename combined with a type change,
/// still appear as separate removals and additions. Either way the result
/// is breaking.
pub fn diff(old: &SchemaFingerprint, new: &SchemaFingerprint) -> Vec<FieldChange> {
    if old.kind != new.kind {
        return vec![FieldChange::new(
            DATASET_FIELD,
            ChangeKind::KindChanged {
                from: old.kind,
                to: new.kind,
            },
        )];
    }

    let mut changes = Vec::new();
    diff_columns(&old.layout.columns, &new.layout.columns, &mut changes);
    diff_bands(&old.layout.bands, &new.layout.bands, &mut changes);
    diff_dataset(&old.layout, &new.layout, &mut changes);

    if !changes.is_empty() {
        tracing::debug!("Schema diff found {} change(s)", changes.len());
    }
    changes
}

fn column_signature_eq(a: &ColumnFingerprint, b: &ColumnFingerprint) -> bool {
    a.data_type == b.data_type
        && a.nullable == b.nullable
        && a.geometry_kind == b.geometry_kind
        && a.crs == b.crs
}

fn band_signature_eq(a: &BandFingerprint, b: &BandFingerprint) -> bool {
    a.data_type == b.data_type && nodata_eq(a.nodata, b.nodata)
}

/// Pair removed entries with added ones, emitting renames, removals and
/// additions in a stable order.
fn pair_renames<'a, T>(
    removed: Vec<&'a T>,
    added: Vec<&'a T>,
    name: impl Fn(&T) -> &str,
    same_signature: impl Fn(&T, &T) -> bool,
    changes: &mut Vec<FieldChange>,
) {
    let mut taken = vec![false; added.len()];

    for gone in removed {
        let partner = added
            .iter()
            .enumerate()
            .find(|(i, candidate)| !taken[*i] && same_signature(gone, **candidate))
            .map(|(i, _)| i);

        match partner {
            Some(i) => {
                taken[i] = true;
                changes.push(FieldChange::new(
                    name(added[i]),
                    ChangeKind::Renamed {
                        from: name(gone).to_string(),
                    },
                ));
            }
            None => changes.push(FieldChange::new(name(gone), ChangeKind::Removed)),
        }
    }

    for (i, fresh) in added.into_iter().enumerate() {
        if !taken[i] {
            changes.push(FieldChange::new(name(fresh), ChangeKind::Added));
        }
    }
}

fn diff_columns(old: &[ColumnFingerprint], new: &[ColumnFingerprint], changes: &mut Vec<FieldChange>) {
    let find = |cols: &'_ [ColumnFingerprint], name: &str| -> Option<usize> {
        cols.iter().position(|c| c.name == name)
    };

    let mut removed = Vec::new();
    for before in old {
        let Some(idx) = find(new, &before.name) else {
            removed.push(before);
            continue;
        };
        let after = &new[idx];
        let field = before.name.as_str();

        if before.data_type != after.data_type {
            changes.push(FieldChange::new(
                field,
                ChangeKind::TypeChanged {
                    from: before.data_type.clone(),
                    to: after.data_type.clone(),
                },
            ));
        }
        if before.nullable != after.nullable {
            changes.push(FieldChange::new(
                field,
                ChangeKind::NullabilityChanged {
                    from: before.nullable,
                    to: after.nullable,
                },
            ));
        }
        if before.geometry_kind != after.geometry_kind {
            changes.push(FieldChange::new(
                field,
                ChangeKind::GeometryKindChanged {
                    from: before.geometry_kind.clone(),
                    to: after.geometry_kind.clone(),
                },
            ));
        }
        if before.crs != after.crs {
            changes.push(FieldChange::new(
                field,
                ChangeKind::CrsChanged {
                    from: before.crs.clone(),
                    to: after.crs.clone(),
                },
            ));
        }
    }

    let added: Vec<&ColumnFingerprint> = new
        .iter()
        .filter(|c| find(old, &c.name).is_none())
        .collect();

    pair_renames(removed, added, |c| c.name.as_str(), column_signature_eq, changes);
}

fn diff_bands(old: &[BandFingerprint], new: &[BandFingerprint], changes: &mut Vec<FieldChange>) {
    let find = |bands: &'_ [BandFingerprint], name: &str| -> Option<usize> {
        bands.iter().position(|b| b.name == name)
    };

    let mut removed = Vec::new();
    for before in old {
        let Some(idx) = find(new, &before.name) else {
            removed.push(before);
            continue;
        };
        let after = &new[idx];

        if before.data_type != after.data_type {
            changes.push(FieldChange::new(
                &before.name,
                ChangeKind::TypeChanged {
                    from: before.data_type.clone(),
                    to: after.data_type.clone(),
                },
            ));
        }
        if !nodata_eq(before.nodata, after.nodata) {
            changes.push(FieldChange::new(
                &before.name,
                ChangeKind::NodataChanged {
                    from: before.nodata,
                    to: after.nodata,
                },
            ));
        }
    }

    let added: Vec<&BandFingerprint> = new
        .iter()
        .filter(|b| find(old, &b.name).is_none())
        .collect();

    pair_renames(removed, added, |b| b.name.as_str(), band_signature_eq, changes);
}

fn diff_dataset(old: &SchemaLayout, new: &SchemaLayout, changes: &mut Vec<FieldChange>) {
    if old.crs != new.crs {
        changes.push(FieldChange::new(
            DATASET_FIELD,
            ChangeKind::CrsChanged {
                from: old.crs.clone(),
                to: new.crs.clone(),
            },
        ));
    }
    if !float::same_array(&old.resolution, &new.resolution) {
        changes.push(FieldChange::new(
            DATASET_FIELD,
            ChangeKind::ResolutionChanged {
                from: old.resolution,
                to: new.resolution,
            },
        ));
    }
}

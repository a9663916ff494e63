//! Schema fingerprints and breaking-change classification.
//!
//! [`fingerprint`] turns an extractor's structural output into the
//! [`SchemaFingerprint`] stored with each version. [`diff`] compares two
//! fingerprints field by field, and [`is_breaking`] applies the
//! compatibility table:
//!
//! | Change | Breaking |
//! |---|---|
//! | field/band added | no |
//! | field/band removed | yes |
//! | type changed | yes |
//! | nullable to non-nullable | yes |
//! | non-nullable to nullable | no |
//! | geometry kind changed | yes |
//! | coordinate reference changed | yes |
//! | no-data or resolution changed | yes |
//! | renamed | yes |
//! | tabular/gridded kind changed | yes |
//!
//! Rename detection is a heuristic. See [`diff`].

pub mod diff;
pub mod extract;

pub use diff::{diff, is_breaking, summarize, ChangeKind, FieldChange, DATASET_FIELD};
pub use extract::{fingerprint, normalize_type, ExtractedBand, ExtractedField, ExtractedMetadata};

pub use geovault_manifest::{FormatKind, SchemaFingerprint};

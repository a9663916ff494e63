//! Version manifest for geovault collections.
//!
//! A collection's `versions.json` records every published state: asset
//! checksums and remote keys, a schema fingerprint, and provenance for
//! rollbacks. Entries are append-only; the only permitted mutation of an
//! existing entry is setting its `pruned` flag.

pub mod checksum;
pub mod float;
pub mod model;
pub mod store;

pub use checksum::{checksum_bytes, checksum_file, CHECKSUM_PREFIX};
pub use model::{
    changed_names, Asset, BandFingerprint, ColumnFingerprint, FormatKind, Manifest,
    SchemaFingerprint, SchemaLayout, StructuralSummary, Version, SPEC_VERSION,
};
pub use store::{
    append, init, load, manifest_path, parse, prune, rollback, save, serialize, validate,
    PruneOutcome, MANIFEST_FILENAME,
};

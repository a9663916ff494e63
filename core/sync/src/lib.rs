//! Geovault sync coordinator.
//!
//! Keeps a collection directory and its remote copy in step:
//! - push, pull and sync with optimistic conflict detection
//! - rollback and prune with remote manifest rewrites
//! - bounded concurrent asset transfers staged for atomic replacement
//! - publish of working files as new versions, cached until pushed
//! - pluggable versioning backends

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod drift;
pub mod objects;
pub mod plan;
pub mod publish;
pub mod staging;
pub mod state;

pub use backend::{
    create_backend, BackendKind, CommitOutcome, ExternalTransactionalBackend, ManifestBackend,
    MemoryCatalog, TransactionalCatalog, VersioningBackend,
};
pub use config::{CollectionOverride, SyncConfig, DEFAULT_MAX_CONCURRENT_TRANSFERS};
pub use coordinator::SyncCoordinator;
pub use drift::{DriftReport, DriftStatus};
pub use objects::{ObjectCache, OBJECTS_DIR};
pub use plan::{
    ManifestUpdate, Operation, StatusReport, SyncOptions, SyncPlan, SyncReport, Transfer,
};
pub use publish::{assign_href, build_version, AssetInput, PublishOutcome, PublishRequest};
pub use staging::{working_path, StagedFile, StagingArea, STAGING_DIR};
pub use state::{TransferEntry, TransferLog, TransferStatus};

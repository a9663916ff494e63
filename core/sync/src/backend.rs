//! Versioning backends.
//!
//! The manifest engine is one implementation of [`VersioningBackend`]; the
//! other delegates commits to a catalog with compare-and-swap semantics.
//! Callers pick one through [`create_backend`].

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use geovault_common::{CollectionId, Error, Result, VersionId};
use geovault_manifest::{append, store, Manifest, Version};

use crate::coordinator::{missing_uploads, SyncCoordinator};
use crate::drift::DriftReport;
use crate::plan::SyncOptions;
use crate::publish::{build_version, PublishRequest};

/// Which backend variant a collection uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Manifest document next to the assets in object storage.
    #[default]
    Manifest,
    /// Commits go through a transactional catalog.
    ExternalTransactional,
}

/// Version history operations common to every backend.
#[async_trait]
pub trait VersioningBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn current_version(&self) -> Result<Option<VersionId>>;

    /// Full history, oldest first, including pruned entries.
    async fn list_versions(&self) -> Result<Vec<Version>>;

    /// Record the working files as a new version and make it visible.
    async fn publish(&self, request: &PublishRequest) -> Result<Version>;

    /// Restore `target` as a new version.
    async fn rollback(&self, target: &VersionId, message: Option<String>) -> Result<Version>;

    /// Retain the newest `keep` versions; returns the versions pruned.
    async fn prune(&self, keep: usize) -> Result<Vec<VersionId>>;

    async fn check_drift(&self) -> Result<DriftReport>;
}

fn newly_pruned(before: &Manifest, after: &Manifest) -> Vec<VersionId> {
    after
        .versions
        .iter()
        .filter(|v| v.pruned && before.version(&v.version).map_or(false, |b| !b.pruned))
        .map(|v| v.version)
        .collect()
}

/// Manifest file plus object store, driven by a [`SyncCoordinator`].
pub struct ManifestBackend {
    coordinator: SyncCoordinator,
}

impl ManifestBackend {
    pub fn new(coordinator: SyncCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }
}

#[async_trait]
impl VersioningBackend for ManifestBackend {
    fn name(&self) -> &str {
        "manifest"
    }

    async fn current_version(&self) -> Result<Option<VersionId>> {
        Ok(self.coordinator.load_local().await?.current_version)
    }

    async fn list_versions(&self) -> Result<Vec<Version>> {
        Ok(self.coordinator.load_local().await?.versions)
    }

    async fn publish(&self, request: &PublishRequest) -> Result<Version> {
        let outcome = self
            .coordinator
            .publish(request, SyncOptions::default())
            .await?;
        self.coordinator.push(SyncOptions::default()).await?;
        Ok(outcome.version)
    }

    async fn rollback(&self, target: &VersionId, message: Option<String>) -> Result<Version> {
        self.coordinator
            .rollback(target, message, SyncOptions::default())
            .await?;
        self.coordinator
            .load_local()
            .await?
            .current()
            .cloned()
            .ok_or_else(|| Error::Storage("rollback left an empty manifest".to_string()))
    }

    async fn prune(&self, keep: usize) -> Result<Vec<VersionId>> {
        let before = self.coordinator.load_local().await?;
        self.coordinator.prune(keep, SyncOptions::default()).await?;
        let after = self.coordinator.load_local().await?;
        Ok(newly_pruned(&before, &after))
    }

    async fn check_drift(&self) -> Result<DriftReport> {
        Ok(self.coordinator.status().await?.drift)
    }
}

/// Outcome of a compare-and-swap commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The catalog's current version was not the expected one.
    Conflict { actual: Option<VersionId> },
}

/// A catalog that commits versions atomically.
#[async_trait]
pub trait TransactionalCatalog: Send + Sync {
    /// Version history of a collection; empty when unknown.
    async fn versions(&self, collection: &CollectionId) -> Result<Manifest>;

    /// Append `version` if the current version still equals `expected`.
    async fn commit(
        &self,
        collection: &CollectionId,
        expected: Option<VersionId>,
        version: Version,
    ) -> Result<CommitOutcome>;

    /// Flag versions whose content was removed.
    async fn mark_pruned(&self, collection: &CollectionId, versions: &[VersionId]) -> Result<()>;
}

/// In-process catalog.
#[derive(Default)]
pub struct MemoryCatalog {
    collections: Mutex<HashMap<CollectionId, Manifest>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CollectionId, Manifest>>> {
        self.collections
            .lock()
            .map_err(|_| Error::Storage("catalog lock poisoned".to_string()))
    }
}

#[async_trait]
impl TransactionalCatalog for MemoryCatalog {
    async fn versions(&self, collection: &CollectionId) -> Result<Manifest> {
        Ok(self.lock()?.get(collection).cloned().unwrap_or_default())
    }

    async fn commit(
        &self,
        collection: &CollectionId,
        expected: Option<VersionId>,
        version: Version,
    ) -> Result<CommitOutcome> {
        let mut collections = self.lock()?;
        let current = collections.entry(collection.clone()).or_default();
        if current.current_version != expected {
            return Ok(CommitOutcome::Conflict {
                actual: current.current_version,
            });
        }
        *current = append(current, version)?;
        Ok(CommitOutcome::Committed)
    }

    async fn mark_pruned(&self, collection: &CollectionId, versions: &[VersionId]) -> Result<()> {
        let mut collections = self.lock()?;
        let manifest = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {} not in catalog", collection)))?;
        let mut next = manifest.clone();
        for entry in next.versions.iter_mut() {
            if versions.contains(&entry.version) {
                entry.pruned = true;
            }
        }
        store::validate(&next).map_err(Error::InvalidInput)?;
        *manifest = next;
        Ok(())
    }
}

/// Asset bytes in object storage, history in a [`TransactionalCatalog`].
///
/// Working files are read on publish but never rewritten; rollback only
/// records the restored version.
pub struct ExternalTransactionalBackend {
    assets: SyncCoordinator,
    catalog: Arc<dyn TransactionalCatalog>,
    observed: Mutex<Option<VersionId>>,
}

impl ExternalTransactionalBackend {
    /// `assets` supplies the working directory and object store; its local
    /// manifest file is not used.
    pub fn new(assets: SyncCoordinator, catalog: Arc<dyn TransactionalCatalog>) -> Self {
        Self {
            assets,
            catalog,
            observed: Mutex::new(None),
        }
    }

    fn observe(&self, version: Option<VersionId>) -> Result<()> {
        *self
            .observed
            .lock()
            .map_err(|_| Error::Storage("observed version lock poisoned".to_string()))? = version;
        Ok(())
    }

    async fn history(&self) -> Result<Manifest> {
        let history = self.catalog.versions(self.assets.collection()).await?;
        self.observe(history.current_version)?;
        Ok(history)
    }

    async fn commit(&self, history: &Manifest, version: Version) -> Result<Version> {
        let outcome = self
            .catalog
            .commit(
                self.assets.collection(),
                history.current_version,
                version.clone(),
            )
            .await?;
        match outcome {
            CommitOutcome::Committed => {
                self.observe(Some(version.version))?;
                info!(
                    "Committed {} {} to catalog",
                    self.assets.collection(),
                    version.version
                );
                Ok(version)
            }
            CommitOutcome::Conflict { actual } => {
                warn!(
                    "Catalog moved to {:?} while committing {}",
                    actual, version.version
                );
                Err(Error::Conflict {
                    expected: history.current_version.map(|v| v.to_string()),
                    actual: actual.map(|v| v.to_string()),
                })
            }
        }
    }
}

#[async_trait]
impl VersioningBackend for ExternalTransactionalBackend {
    fn name(&self) -> &str {
        "external_transactional"
    }

    async fn current_version(&self) -> Result<Option<VersionId>> {
        Ok(self.history().await?.current_version)
    }

    async fn list_versions(&self) -> Result<Vec<Version>> {
        Ok(self.history().await?.versions)
    }

    async fn publish(&self, request: &PublishRequest) -> Result<Version> {
        let history = self.history().await?;
        let outcome = build_version(
            &history,
            self.assets.collection_dir(),
            request,
            self.assets.extractor(),
            Utc::now(),
        )
        .await?;

        // Bytes first, then the catalog entry that makes them visible.
        let next = append(&history, outcome.version.clone())?;
        let uploads = missing_uploads(&next, Some(&history));
        self.assets.upload_all(&uploads).await?;
        self.commit(&history, outcome.version).await
    }

    async fn rollback(&self, target: &VersionId, message: Option<String>) -> Result<Version> {
        let history = self.history().await?;
        let next = store::rollback(&history, target, message, Utc::now())?;
        let version = next
            .current()
            .cloned()
            .ok_or_else(|| Error::Storage("rollback produced no version".to_string()))?;
        self.assets.verify_present(&version).await?;
        self.commit(&history, version).await
    }

    async fn prune(&self, keep: usize) -> Result<Vec<VersionId>> {
        let history = self.history().await?;
        let (_, outcome) = store::prune(&history, keep)?;
        if outcome.is_empty() {
            return Ok(Vec::new());
        }
        self.catalog
            .mark_pruned(self.assets.collection(), &outcome.pruned)
            .await?;
        self.assets.delete_objects(&outcome.removable).await?;
        Ok(outcome.pruned)
    }

    async fn check_drift(&self) -> Result<DriftReport> {
        let observed = *self
            .observed
            .lock()
            .map_err(|_| Error::Storage("observed version lock poisoned".to_string()))?;
        let actual = self.catalog.versions(self.assets.collection()).await?;
        Ok(DriftReport::detect(
            observed,
            actual.current_version,
            !actual.is_empty(),
            observed.is_none(),
        ))
    }
}

/// Build the backend `kind` names.
///
/// # Errors
/// - `InvalidInput` when the transactional variant is requested without a
///   catalog
pub fn create_backend(
    kind: BackendKind,
    coordinator: SyncCoordinator,
    catalog: Option<Arc<dyn TransactionalCatalog>>,
) -> Result<Box<dyn VersioningBackend>> {
    match kind {
        BackendKind::Manifest => Ok(Box::new(ManifestBackend::new(coordinator))),
        BackendKind::ExternalTransactional => {
            let catalog = catalog.ok_or_else(|| {
                Error::InvalidInput(
                    "external_transactional backend requires a catalog".to_string(),
                )
            })?;
            Ok(Box::new(ExternalTransactionalBackend::new(
                coordinator,
                catalog,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::drift::DriftStatus;
    use crate::publish::AssetInput;
    use geovault_common::ObjectKey;
    use geovault_manifest::FormatKind;
    use geovault_schema::ExtractedMetadata;
    use geovault_storage::{MemoryProvider, ResolvedRemote};
    use tempfile::TempDir;

    fn coordinator(dir: &std::path::Path, provider: &MemoryProvider) -> SyncCoordinator {
        SyncCoordinator::new(
            dir,
            CollectionId::new("parcels").unwrap(),
            ResolvedRemote {
                provider: Arc::new(provider.clone()),
                prefix: ObjectKey::parse("catalog").unwrap(),
            },
            SyncConfig::default(),
        )
        .unwrap()
    }

    fn request(names: &[&str]) -> PublishRequest {
        PublishRequest {
            message: String::new(),
            assets: names.iter().map(|n| AssetInput::new(*n)).collect(),
            metadata: ExtractedMetadata::empty(FormatKind::Tabular),
        }
    }

    #[test]
    fn test_backend_kind_serde() {
        assert_eq!(
            serde_json::to_string(&BackendKind::ExternalTransactional).unwrap(),
            "\"external_transactional\""
        );
        assert_eq!(BackendKind::default(), BackendKind::Manifest);
    }

    #[tokio::test]
    async fn test_factory_requires_catalog() {
        let temp = TempDir::new().unwrap();
        let provider = MemoryProvider::new();
        let result = create_backend(
            BackendKind::ExternalTransactional,
            coordinator(temp.path(), &provider),
            None,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let backend =
            create_backend(BackendKind::Manifest, coordinator(temp.path(), &provider), None)
                .unwrap();
        assert_eq!(backend.name(), "manifest");
    }

    #[tokio::test]
    async fn test_memory_catalog_compare_and_swap() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.parquet"), b"a").unwrap();
        let version = build_version(
            &Manifest::new(),
            temp.path(),
            &request(&["a.parquet"]),
            None,
            Utc::now(),
        )
        .await
        .unwrap()
        .version;

        let catalog = MemoryCatalog::new();
        let id = CollectionId::new("parcels").unwrap();
        assert_eq!(
            catalog.commit(&id, None, version.clone()).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            catalog.commit(&id, None, version.clone()).await.unwrap(),
            CommitOutcome::Conflict {
                actual: Some(VersionId::initial())
            }
        );
    }

    #[tokio::test]
    async fn test_transactional_publish_and_drift() {
        let temp = TempDir::new().unwrap();
        let provider = MemoryProvider::new();
        let catalog: Arc<dyn TransactionalCatalog> = Arc::new(MemoryCatalog::new());
        let backend = create_backend(
            BackendKind::ExternalTransactional,
            coordinator(temp.path(), &provider),
            Some(catalog.clone()),
        )
        .unwrap();

        std::fs::write(temp.path().join("a.parquet"), b"a").unwrap();
        let v1 = backend.publish(&request(&["a.parquet"])).await.unwrap();
        assert_eq!(v1.version, VersionId::initial());
        assert!(provider.contains("catalog/parcels/1.0.0/a.parquet"));
        assert!(!provider.contains("catalog/parcels/versions.json"));
        assert_eq!(
            backend.check_drift().await.unwrap().status,
            DriftStatus::InSync
        );

        // Another writer commits behind this backend's back.
        std::fs::write(temp.path().join("a.parquet"), b"a2").unwrap();
        let other = build_version(
            &catalog.versions(&CollectionId::new("parcels").unwrap()).await.unwrap(),
            temp.path(),
            &request(&["a.parquet"]),
            None,
            Utc::now(),
        )
        .await
        .unwrap()
        .version;
        catalog
            .commit(
                &CollectionId::new("parcels").unwrap(),
                Some(VersionId::initial()),
                other,
            )
            .await
            .unwrap();

        assert!(backend.check_drift().await.unwrap().is_conflict());
        assert_eq!(backend.list_versions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transactional_prune_marks_and_deletes() {
        let temp = TempDir::new().unwrap();
        let provider = MemoryProvider::new();
        let backend = ExternalTransactionalBackend::new(
            coordinator(temp.path(), &provider),
            Arc::new(MemoryCatalog::new()),
        );

        for content in [&b"one"[..], b"two", b"three"] {
            std::fs::write(temp.path().join("a.parquet"), content).unwrap();
            backend.publish(&request(&["a.parquet"])).await.unwrap();
        }

        let pruned = backend.prune(1).await.unwrap();
        assert_eq!(pruned.len(), 2);
        assert!(!provider.contains("catalog/parcels/1.0.0/a.parquet"));
        assert!(provider.contains("catalog/parcels/1.2.0/a.parquet"));
        let versions = backend.list_versions().await.unwrap();
        assert_eq!(versions.iter().filter(|v| v.pruned).count(), 2);
    }
}

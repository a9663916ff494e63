//! End-to-end push/pull/sync scenarios against an in-memory remote.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use geovault_common::{CollectionId, Error, ObjectKey, Result, VersionId, EXIT_UNCOMMITTED};
use geovault_manifest::{FormatKind, Manifest, StructuralSummary};
use geovault_schema::{ExtractedBand, ExtractedField, ExtractedMetadata};
use geovault_staleness::{Extractor, Staleness, StalenessMode};
use geovault_storage::{MemoryProvider, ResolvedRemote, StorageProvider};
use geovault_sync::{
    AssetInput, DriftStatus, PublishRequest, SyncConfig, SyncCoordinator, SyncOptions,
};

const REMOTE_MANIFEST: &str = "catalog/roads/versions.json";

fn replica(dir: &Path, provider: &MemoryProvider, config: SyncConfig) -> SyncCoordinator {
    SyncCoordinator::new(
        dir,
        CollectionId::new("roads").unwrap(),
        ResolvedRemote {
            provider: Arc::new(provider.clone()),
            prefix: ObjectKey::parse("catalog").unwrap(),
        },
        config,
    )
    .unwrap()
}

fn table(columns: &[&str]) -> ExtractedMetadata {
    let mut meta = ExtractedMetadata::empty(FormatKind::Tabular);
    meta.fields = columns
        .iter()
        .map(|name| ExtractedField {
            name: name.to_string(),
            data_type: "int64".to_string(),
            nullable: true,
            geometry_kind: None,
            crs: None,
        })
        .collect();
    meta
}

fn request(names: &[&str], columns: &[&str]) -> PublishRequest {
    PublishRequest {
        message: String::new(),
        assets: names.iter().map(|n| AssetInput::new(*n)).collect(),
        metadata: table(columns),
    }
}

fn write(dir: &Path, name: &str, data: &[u8]) {
    std::fs::write(dir.join(name), data).unwrap();
}

async fn remote_manifest(provider: &MemoryProvider) -> Option<Manifest> {
    let key = ObjectKey::parse(REMOTE_MANIFEST).unwrap();
    match provider.get(&key).await {
        Ok(bytes) => Some(geovault_manifest::parse(&bytes, REMOTE_MANIFEST).unwrap()),
        Err(_) => None,
    }
}

/// Replica A publishes and pushes `a.parquet` and `b.parquet` as 1.0.0.
async fn seeded(provider: &MemoryProvider) -> (TempDir, SyncCoordinator) {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.parquet", b"alpha");
    write(dir.path(), "b.parquet", b"bravo");
    let coord = replica(dir.path(), provider, SyncConfig::default());
    coord
        .publish(&request(&["a.parquet", "b.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();
    coord.push(SyncOptions::default()).await.unwrap();
    (dir, coord)
}

#[tokio::test]
async fn test_fresh_push_uploads_assets_then_manifest() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.parquet", b"alpha");
    write(dir.path(), "b.parquet", b"bravo");
    let coord = replica(dir.path(), &provider, SyncConfig::default());

    let published = coord
        .publish(&request(&["a.parquet", "b.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(published.version.version, VersionId::initial());

    let report = coord.push(SyncOptions::default()).await.unwrap();
    assert_eq!(report.plan.drift.status, DriftStatus::RemoteMissing);
    assert_eq!(report.uploaded.len(), 2);
    assert!(report.manifest_written);

    assert_eq!(
        provider.keys(),
        vec![
            "catalog/roads/1.0.0/a.parquet",
            "catalog/roads/1.0.0/b.parquet",
            REMOTE_MANIFEST,
        ]
    );
    let remote = remote_manifest(&provider).await.unwrap();
    assert_eq!(remote.current_version, Some(VersionId::initial()));
    assert!(remote.expected_remote.is_none());

    let local = coord.load_local().await.unwrap();
    assert_eq!(local.expected_remote, Some(VersionId::initial()));
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let provider = MemoryProvider::new();
    let (_dir, coord) = seeded(&provider).await;
    let puts = provider.put_count();
    let gets = provider.get_count();

    let report = coord.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.transfer_count(), 0);
    assert_eq!(report.bytes_transferred, 0);
    assert!(!report.manifest_written);
    assert_eq!(provider.put_count(), puts);
    // Only the remote manifest is read.
    assert_eq!(provider.get_count(), gets + 1);

    let again = coord.sync(SyncOptions::default()).await.unwrap();
    assert!(again.plan.is_empty());
}

#[tokio::test]
async fn test_fresh_clone_pulls_current_assets() {
    let provider = MemoryProvider::new();
    let (_a_dir, _a) = seeded(&provider).await;

    let b_dir = TempDir::new().unwrap();
    let b = replica(b_dir.path(), &provider, SyncConfig::default());
    let report = b.pull(SyncOptions::default()).await.unwrap();

    assert_eq!(report.plan.drift.status, DriftStatus::Untracked);
    assert_eq!(report.downloaded.len(), 2);
    assert_eq!(std::fs::read(b_dir.path().join("a.parquet")).unwrap(), b"alpha");
    let local = b.load_local().await.unwrap();
    assert_eq!(local.current_version, Some(VersionId::initial()));
    assert_eq!(local.expected_remote, Some(VersionId::initial()));
}

#[tokio::test]
async fn test_concurrent_push_is_rejected_without_writes() {
    let provider = MemoryProvider::new();
    let (a_dir, a) = seeded(&provider).await;

    let b_dir = TempDir::new().unwrap();
    let b = replica(b_dir.path(), &provider, SyncConfig::default());
    b.pull(SyncOptions::default()).await.unwrap();

    write(a_dir.path(), "a.parquet", b"alpha-2");
    a.publish(&request(&["a.parquet", "b.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();
    a.push(SyncOptions::default()).await.unwrap();

    write(b_dir.path(), "b.parquet", b"bravo-2");
    b.publish(&request(&["a.parquet", "b.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();

    let key = ObjectKey::parse(REMOTE_MANIFEST).unwrap();
    let remote_before = provider.get(&key).await.unwrap();
    let local_before = std::fs::read(b_dir.path().join("versions.json")).unwrap();

    for result in [
        b.push(SyncOptions::default()).await,
        b.pull(SyncOptions::default()).await,
        b.sync(SyncOptions::default()).await,
    ] {
        match result.unwrap_err() {
            Error::Conflict { expected, actual } => {
                assert_eq!(expected.as_deref(), Some("1.0.0"));
                assert_eq!(actual.as_deref(), Some("1.1.0"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(provider.get(&key).await.unwrap(), remote_before);
    assert_eq!(
        std::fs::read(b_dir.path().join("versions.json")).unwrap(),
        local_before
    );

    // Forcing the pull discards B's unpushed version.
    let forced = b.pull(SyncOptions::force()).await.unwrap();
    assert!(forced.override_used);
    assert_eq!(std::fs::read(b_dir.path().join("a.parquet")).unwrap(), b"alpha-2");
    assert_eq!(std::fs::read(b_dir.path().join("b.parquet")).unwrap(), b"bravo");
    let local = b.load_local().await.unwrap();
    assert_eq!(local.current_version.map(|v| v.to_string()).as_deref(), Some("1.1.0"));
}

#[tokio::test]
async fn test_manifest_failure_leaves_remote_untouched() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.parquet", b"alpha");
    let coord = replica(dir.path(), &provider, SyncConfig::default());
    coord
        .publish(&request(&["a.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();

    provider.fail_puts_matching("versions.json");
    let err = coord.push(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));

    // Bytes landed, but no manifest references them.
    assert!(provider.contains("catalog/roads/1.0.0/a.parquet"));
    assert!(!provider.contains(REMOTE_MANIFEST));
    assert!(coord.load_local().await.unwrap().expected_remote.is_none());

    provider.clear_faults();
    coord.push(SyncOptions::default()).await.unwrap();
    assert!(provider.contains(REMOTE_MANIFEST));
}

#[tokio::test]
async fn test_asset_failure_is_partial_and_skips_commit() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.parquet", b"alpha");
    write(dir.path(), "b.parquet", b"bravo");
    let coord = replica(dir.path(), &provider, SyncConfig::default());
    coord
        .publish(&request(&["a.parquet", "b.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();

    provider.fail_puts_matching("b.parquet");
    match coord.push(SyncOptions::default()).await.unwrap_err() {
        Error::PartialFailure(failure) => {
            assert_eq!(failure.failed_names(), vec!["b.parquet"]);
            assert_eq!(failure.failed_hrefs(), vec!["1.0.0/b.parquet"]);
            assert_eq!(failure.succeeded, vec!["1.0.0/a.parquet"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!provider.contains(REMOTE_MANIFEST));
}

#[tokio::test]
async fn test_rollback_after_breaking_change() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    let coord = replica(dir.path(), &provider, SyncConfig::default());

    write(dir.path(), "a.parquet", b"with-name");
    coord
        .publish(&request(&["a.parquet"], &["id", "name"]), SyncOptions::default())
        .await
        .unwrap();
    write(dir.path(), "a.parquet", b"without-name");
    let breaking = coord
        .publish(&request(&["a.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(breaking.version.version.to_string(), "2.0.0");
    assert!(breaking.version.breaking);
    coord.push(SyncOptions::default()).await.unwrap();

    let target = VersionId::initial();
    let report = coord
        .rollback(&target, None, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.downloaded, vec!["a.parquet"]);
    assert_eq!(std::fs::read(dir.path().join("a.parquet")).unwrap(), b"with-name");

    let remote = remote_manifest(&provider).await.unwrap();
    let current = remote.current().unwrap();
    assert_eq!(current.version.to_string(), "2.1.0");
    assert_eq!(current.rollback_to, Some(target));
    assert!(!current.breaking);
    assert_eq!(
        coord.load_local().await.unwrap().expected_remote,
        remote.current_version
    );
}

#[tokio::test]
async fn test_push_keeps_bytes_of_every_unpushed_version() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    let coord = replica(dir.path(), &provider, SyncConfig::default());

    write(dir.path(), "a.parquet", b"one");
    coord
        .publish(&request(&["a.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();
    write(dir.path(), "a.parquet", b"two");
    coord
        .publish(&request(&["a.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();

    let report = coord.push(SyncOptions::default()).await.unwrap();
    assert_eq!(report.uploaded, vec!["1.0.0/a.parquet", "1.1.0/a.parquet"]);
    assert_eq!(report.bytes_transferred, 6);

    for (key, bytes) in [
        ("catalog/roads/1.0.0/a.parquet", &b"one"[..]),
        ("catalog/roads/1.1.0/a.parquet", b"two"),
    ] {
        let stored = provider.get(&ObjectKey::parse(key).unwrap()).await.unwrap();
        assert_eq!(stored, bytes);
    }

    let remote = remote_manifest(&provider).await.unwrap();
    assert_eq!(remote.current_version.map(|v| v.to_string()).as_deref(), Some("1.1.0"));

    // The older version restores from the remote with its own bytes.
    coord
        .rollback(&VersionId::initial(), None, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(std::fs::read(dir.path().join("a.parquet")).unwrap(), b"one");
}

fn raster(nodata: Option<f64>) -> ExtractedMetadata {
    let mut meta = ExtractedMetadata::empty(FormatKind::Gridded);
    meta.bands = vec![ExtractedBand {
        name: Some("elevation".to_string()),
        data_type: "float32".to_string(),
        nodata,
    }];
    meta.crs = Some("EPSG:4326".to_string());
    meta.resolution = Some([0.5, 0.5]);
    meta
}

#[tokio::test]
async fn test_nan_nodata_survives_save_and_republish() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    let coord = replica(dir.path(), &provider, SyncConfig::default());
    let dem = |metadata| PublishRequest {
        message: String::new(),
        assets: vec![AssetInput::new("dem.tif")],
        metadata,
    };

    write(dir.path(), "dem.tif", b"tile-v1");
    coord
        .publish(&dem(raster(Some(f64::NAN))), SyncOptions::default())
        .await
        .unwrap();
    coord.push(SyncOptions::default()).await.unwrap();

    let local = coord.load_local().await.unwrap();
    let stored = local.current().unwrap().schema.layout.bands[0].nodata;
    assert!(stored.unwrap().is_nan());

    write(dir.path(), "dem.tif", b"tile-v2");
    let outcome = coord
        .publish(&dem(raster(Some(f64::NAN))), SyncOptions::default())
        .await
        .unwrap();
    assert!(outcome.schema_changes.is_empty());
    assert!(!outcome.version.breaking);
    assert_eq!(outcome.version.version.to_string(), "1.1.0");

    // Reloaded history still matches the remote entry for entry.
    let report = coord.push(SyncOptions::default()).await.unwrap();
    assert_eq!(report.plan.drift.status, DriftStatus::InSync);
    let remote = remote_manifest(&provider).await.unwrap();
    assert!(remote.current().unwrap().schema.layout.bands[0]
        .nodata
        .unwrap()
        .is_nan());
    assert!(coord.sync(SyncOptions::default()).await.unwrap().plan.is_empty());
}

#[tokio::test]
async fn test_pull_refuses_uncommitted_changes() {
    let provider = MemoryProvider::new();
    let (_a_dir, _a) = seeded(&provider).await;

    let b_dir = TempDir::new().unwrap();
    let config = SyncConfig {
        staleness_mode: StalenessMode::FullHash,
        ..SyncConfig::default()
    };
    let b = replica(b_dir.path(), &provider, config);
    b.pull(SyncOptions::default()).await.unwrap();
    write(b_dir.path(), "a.parquet", b"local edit");

    let err = b.pull(SyncOptions::default()).await.unwrap_err();
    assert_eq!(err.exit_code(), EXIT_UNCOMMITTED);
    match err {
        Error::UncommittedChanges { assets } => assert_eq!(assets, vec!["a.parquet"]),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(std::fs::read(b_dir.path().join("a.parquet")).unwrap(), b"local edit");

    let forced = b.pull(SyncOptions::force()).await.unwrap();
    assert!(forced.override_used);
    assert_eq!(std::fs::read(b_dir.path().join("a.parquet")).unwrap(), b"alpha");
}

#[tokio::test]
async fn test_dry_run_performs_no_io() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.parquet", b"alpha");
    write(dir.path(), "b.parquet", b"bravo");
    let coord = replica(dir.path(), &provider, SyncConfig::default());
    coord
        .publish(&request(&["a.parquet", "b.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();
    let local_before = std::fs::read(dir.path().join("versions.json")).unwrap();

    let report = coord.sync(SyncOptions::dry_run()).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.plan.uploads.len(), 2);
    assert!(report.plan.manifest_update.unwrap().remote);
    assert!(report.to_string().contains("would upload"));

    assert_eq!(provider.put_count(), 0);
    assert!(provider.keys().is_empty());
    assert_eq!(
        std::fs::read(dir.path().join("versions.json")).unwrap(),
        local_before
    );

    // A fresh clone's dry-run pull writes nothing locally either.
    coord.push(SyncOptions::default()).await.unwrap();
    let clone_dir = TempDir::new().unwrap();
    let clone = replica(clone_dir.path(), &provider, SyncConfig::default());
    let plan = clone.pull(SyncOptions::dry_run()).await.unwrap();
    assert_eq!(plan.plan.downloads.len(), 2);
    assert_eq!(std::fs::read_dir(clone_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_prune_deletes_unreferenced_objects() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    let coord = replica(dir.path(), &provider, SyncConfig::default());
    for content in [&b"one"[..], b"two", b"three"] {
        write(dir.path(), "a.parquet", content);
        coord
            .publish(&request(&["a.parquet"], &["id"]), SyncOptions::default())
            .await
            .unwrap();
    }
    coord.push(SyncOptions::default()).await.unwrap();

    let dry = coord.prune(1, SyncOptions::dry_run()).await.unwrap();
    assert_eq!(dry.plan.deletes.len(), 2);
    assert!(provider.contains("catalog/roads/1.0.0/a.parquet"));

    let report = coord.prune(1, SyncOptions::default()).await.unwrap();
    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(deleted, vec!["1.0.0/a.parquet", "1.1.0/a.parquet"]);
    assert!(!provider.contains("catalog/roads/1.0.0/a.parquet"));
    assert!(provider.contains("catalog/roads/1.2.0/a.parquet"));

    let remote = remote_manifest(&provider).await.unwrap();
    assert_eq!(remote.versions.iter().filter(|v| v.pruned).count(), 2);
    assert_eq!(remote.current_version.map(|v| v.to_string()).as_deref(), Some("1.2.0"));
}

struct CountingExtractor {
    summary_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
}

#[async_trait]
impl Extractor for CountingExtractor {
    async fn summary(&self, _path: &Path) -> Result<StructuralSummary> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StructuralSummary {
            count: Some(10),
            ..StructuralSummary::default()
        })
    }

    async fn metadata(&self, _path: &Path) -> Result<ExtractedMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(table(&["id"]))
    }
}

#[tokio::test]
async fn test_status_uses_cheapest_staleness_tier() {
    let provider = MemoryProvider::new();
    let dir = TempDir::new().unwrap();
    let extractor = Arc::new(CountingExtractor {
        summary_calls: AtomicUsize::new(0),
        metadata_calls: AtomicUsize::new(0),
    });
    let coord = replica(dir.path(), &provider, SyncConfig::default())
        .with_extractor(extractor.clone());

    write(dir.path(), "a.parquet", b"alpha");
    coord
        .publish(&request(&["a.parquet"], &["id"]), SyncOptions::default())
        .await
        .unwrap();
    let after_publish = extractor.summary_calls.load(Ordering::SeqCst);

    let status = coord.status().await.unwrap();
    assert_eq!(status.assets["a.parquet"], Staleness::Fresh);
    assert_eq!(status.pending_uploads, vec!["1.0.0/a.parquet"]);
    assert_eq!(extractor.summary_calls.load(Ordering::SeqCst), after_publish);

    // Touch without changing content.
    let file = std::fs::File::options()
        .write(true)
        .open(dir.path().join("a.parquet"))
        .unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    let status = coord.status().await.unwrap();
    assert_eq!(status.assets["a.parquet"], Staleness::TouchedUnchanged);
    assert_eq!(
        extractor.summary_calls.load(Ordering::SeqCst),
        after_publish + 1
    );
    assert_eq!(extractor.metadata_calls.load(Ordering::SeqCst), 0);
}

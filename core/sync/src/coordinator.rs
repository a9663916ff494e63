//! Sync coordinator: push, pull, sync, rollback and prune for one collection.
//!
//! Every mutating operation runs the same phases:
//!
//! ```text
//! LOAD_LOCAL -> LOAD_REMOTE -> DIFF -> CONFLICT (stop) | APPLY -> COMMIT
//! ```
//!
//! APPLY moves asset bytes; COMMIT writes the remote manifest and then the
//! local one. A failure anywhere before COMMIT leaves both manifests as they
//! were, so a version is never visible remotely before its bytes are.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use geovault_common::{CollectionId, Error, ObjectKey, Result, VersionId};
use geovault_manifest::{
    append, checksum_bytes, checksum_file, manifest_path, store, Manifest, Version,
    MANIFEST_FILENAME,
};
use geovault_staleness::{Extractor, StalenessDetector};
use geovault_storage::ResolvedRemote;

use crate::config::SyncConfig;
use crate::drift::DriftReport;
use crate::objects::ObjectCache;
use crate::plan::{ManifestUpdate, Operation, StatusReport, SyncOptions, SyncPlan, SyncReport, Transfer};
use crate::publish::{build_version, PublishOutcome, PublishRequest};
use crate::staging::{working_path, StagedFile, StagingArea};
use crate::state::TransferLog;

/// Storage failures surface as `Network` unless they are already one of the
/// classified remote errors.
fn remote_error(e: Error) -> Error {
    match e {
        Error::Network(_) | Error::NotFound(_) | Error::CorruptManifest { .. } => e,
        other => Error::Network(other.to_string()),
    }
}

/// Whether the working file at `path` holds exactly the recorded bytes.
async fn file_matches(path: &Path, checksum: &str, size: u64) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) if meta.len() != size => Ok(false),
        Ok(_) => Ok(checksum_file(path).await? == checksum),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Rollback and prune rewrite the remote manifest from the local one, so the
/// two histories must match entry for entry first.
fn require_level(local: &Manifest, remote: &Manifest) -> Result<()> {
    if local.versions.len() == remote.versions.len() && local.is_history_prefix_of(remote) {
        return Ok(());
    }
    Err(Error::InvalidInput(
        "local and remote histories differ; push or pull first".to_string(),
    ))
}

/// Hrefs held by the live versions of a remote manifest, with their checksums.
fn remote_objects(remote: Option<&Manifest>) -> BTreeSet<(String, String)> {
    remote
        .map(|m| {
            m.live_versions()
                .flat_map(|v| v.assets.values())
                .map(|a| (a.href.clone(), a.checksum.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Assets of the live local versions the remote does not hold yet, one per href.
pub(crate) fn missing_uploads(local: &Manifest, remote: Option<&Manifest>) -> Vec<Transfer> {
    let present = remote_objects(remote);
    let mut seen = BTreeSet::new();
    let mut uploads = Vec::new();
    for version in local.live_versions() {
        for (name, asset) in &version.assets {
            if present.contains(&(asset.href.clone(), asset.checksum.clone())) {
                continue;
            }
            if seen.insert(asset.href.clone()) {
                uploads.push(Transfer {
                    name: name.clone(),
                    href: asset.href.clone(),
                    checksum: asset.checksum.clone(),
                    size_bytes: asset.size_bytes,
                });
            }
        }
    }
    uploads
}

/// Result of planning one direction in memory.
struct Planned {
    plan: SyncPlan,
    /// Local manifest after COMMIT.
    next_local: Manifest,
    override_used: bool,
}

/// Coordinates one collection directory against its remote.
///
/// The coordinator holds no state between calls. Each operation reloads
/// both manifests, so a coordinator may be reused for any number of calls.
pub struct SyncCoordinator {
    collection_dir: PathBuf,
    collection: CollectionId,
    storage: ResolvedRemote,
    config: SyncConfig,
    extractor: Option<Arc<dyn Extractor>>,
    detector: StalenessDetector,
}

impl SyncCoordinator {
    /// Create a coordinator for `collection`, whose working files and local
    /// manifest live in `collection_dir`.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration is out of range
    pub fn new(
        collection_dir: impl Into<PathBuf>,
        collection: CollectionId,
        storage: ResolvedRemote,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let detector = StalenessDetector::new(None, config.staleness_mode);
        Ok(Self {
            collection_dir: collection_dir.into(),
            collection,
            storage,
            config,
            extractor: None,
            detector,
        })
    }

    /// Use `extractor` for structural summaries and schema-aware staleness.
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.detector = StalenessDetector::new(Some(extractor.clone()), self.config.staleness_mode);
        self.extractor = Some(extractor);
        self
    }

    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    pub fn collection_dir(&self) -> &Path {
        &self.collection_dir
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub(crate) fn extractor(&self) -> Option<&dyn Extractor> {
        self.extractor.as_deref()
    }

    fn objects(&self) -> ObjectCache {
        ObjectCache::new(&self.collection_dir)
    }

    fn object_key(&self, href: &str) -> Result<ObjectKey> {
        self.storage
            .prefix
            .join(self.collection.as_str())?
            .join(href)
    }

    /// Key of the remote manifest document.
    pub fn remote_manifest_key(&self) -> Result<ObjectKey> {
        self.object_key(MANIFEST_FILENAME)
    }

    /// Create an empty local manifest.
    ///
    /// # Errors
    /// - `InvalidInput` if the directory already holds one
    pub async fn init(&self) -> Result<Manifest> {
        store::init(&self.collection_dir).await
    }

    /// The local manifest, or an empty one when the directory has none yet.
    pub async fn load_local(&self) -> Result<Manifest> {
        debug!("LOAD_LOCAL {}", self.collection);
        match store::load(&manifest_path(&self.collection_dir)).await {
            Ok(manifest) => Ok(manifest),
            Err(e) if e.is_not_found() => Ok(Manifest::new()),
            Err(e) => Err(e),
        }
    }

    /// The remote manifest, or `None` when nothing was ever pushed.
    pub async fn load_remote(&self) -> Result<Option<Manifest>> {
        let key = self.remote_manifest_key()?;
        debug!("LOAD_REMOTE {}", key);
        match self.storage.provider.get(&key).await {
            Ok(bytes) => Ok(Some(store::parse(&bytes, &key.as_key())?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(remote_error(e)),
        }
    }

    fn drift(local: &Manifest, remote: Option<&Manifest>) -> DriftReport {
        DriftReport::detect(
            local.expected_remote,
            remote.and_then(|m| m.current_version),
            remote.is_some(),
            local.is_empty(),
        )
    }

    /// Refuse to overwrite working files that no longer match the local
    /// current version.
    ///
    /// Returns whether the check was overridden.
    async fn check_uncommitted(&self, local: &Manifest, force: bool) -> Result<bool> {
        let Some(current) = local.current() else {
            return Ok(false);
        };
        let states = self
            .detector
            .check_version(current, &self.collection_dir)
            .await?;
        let changed: Vec<String> = states
            .into_iter()
            .filter(|(_, s)| s.is_changed())
            .map(|(name, _)| name)
            .collect();

        if changed.is_empty() {
            return Ok(false);
        }
        if !force {
            return Err(Error::UncommittedChanges { assets: changed });
        }
        warn!("Overriding uncommitted changes in {}", changed.join(", "));
        Ok(true)
    }

    /// Assets of `version` whose working file does not hold the recorded bytes.
    async fn stale_working_files(&self, manifest: &Manifest) -> Result<Vec<Transfer>> {
        let Some(version) = manifest.current() else {
            return Ok(Vec::new());
        };
        let mut downloads = Vec::new();
        for (name, asset) in &version.assets {
            let path = working_path(&self.collection_dir, name)?;
            if !file_matches(&path, &asset.checksum, asset.size_bytes).await? {
                downloads.push(Transfer {
                    name: name.clone(),
                    href: asset.href.clone(),
                    checksum: asset.checksum.clone(),
                    size_bytes: asset.size_bytes,
                });
            }
        }
        Ok(downloads)
    }

    // DIFF

    fn plan_push(local: &Manifest, remote: Option<&Manifest>, force: bool) -> Result<Planned> {
        let drift = Self::drift(local, remote);
        let mut override_used = drift.check(force)?;
        let mut plan = SyncPlan::new(drift);

        if local.is_empty() {
            return Ok(Planned {
                plan,
                next_local: local.clone(),
                override_used,
            });
        }

        if let Some(remote) = remote {
            if !remote.is_history_prefix_of(local) {
                if !force {
                    return Err(plan.drift.to_error());
                }
                warn!("Remote history is not a prefix of local history; overwriting");
                override_used = true;
            }
        }

        plan.uploads = missing_uploads(local, remote);

        let remote_doc = local.for_remote();
        let write_remote = remote.map_or(true, |r| r != &remote_doc);
        let mut next_local = local.clone();
        next_local.expected_remote = local.current_version;
        let write_local = next_local != *local;

        if write_remote || write_local {
            plan.manifest_update = Some(ManifestUpdate {
                remote: write_remote,
                local: write_local,
                current_version: local.current_version,
            });
        }

        Ok(Planned {
            plan,
            next_local,
            override_used,
        })
    }

    fn plan_pull(local: &Manifest, remote: Option<&Manifest>, force: bool) -> Result<Planned> {
        let drift = Self::drift(local, remote);
        let mut override_used = drift.check(force)?;
        let mut plan = SyncPlan::new(drift);

        let Some(remote) = remote else {
            return Ok(Planned {
                plan,
                next_local: local.clone(),
                override_used,
            });
        };

        let mut next_local = if local.versions.len() < remote.versions.len()
            && local.is_history_prefix_of(remote)
        {
            remote.clone()
        } else if remote.is_history_prefix_of(local) {
            local.clone()
        } else if force {
            warn!("Local history diverges from remote; replacing it");
            override_used = true;
            remote.clone()
        } else {
            return Err(plan.drift.to_error());
        };
        next_local.expected_remote = remote.current_version;

        if next_local != *local {
            plan.manifest_update = Some(ManifestUpdate {
                remote: false,
                local: true,
                current_version: next_local.current_version,
            });
        }

        Ok(Planned {
            plan,
            next_local,
            override_used,
        })
    }

    // APPLY

    /// Upload one href, preferring the copy cached at publish.
    async fn upload_one(&self, transfer: &Transfer) -> Result<u64> {
        let (data, origin) = match self.objects().read(&transfer.href).await? {
            Some(data) => (data, "cached copy"),
            None => {
                let path = working_path(&self.collection_dir, &transfer.name)?;
                (fs::read(&path).await?, "working file")
            }
        };
        if checksum_bytes(&data) != transfer.checksum {
            return Err(Error::InvalidInput(format!(
                "{} of {} no longer holds the content recorded for {}",
                origin, transfer.name, transfer.href
            )));
        }
        let size = data.len() as u64;
        self.storage
            .provider
            .put(&self.object_key(&transfer.href)?, data)
            .await
            .map_err(remote_error)?;
        debug!("Uploaded {} ({} bytes)", transfer.href, size);
        Ok(size)
    }

    pub(crate) async fn upload_all(&self, transfers: &[Transfer]) -> Result<TransferLog> {
        let mut log = TransferLog::new();
        for t in transfers {
            log.plan(&t.name, &t.href);
        }

        let results: Vec<(&Transfer, Result<u64>)> = stream::iter(transfers)
            .map(|t| async move { (t, self.upload_one(t).await) })
            .buffer_unordered(self.config.max_concurrent_transfers)
            .boxed()
            .collect()
            .await;

        for (t, result) in &results {
            if let Err(e) = result {
                warn!("Upload of {} failed: {}", t.href, e);
            }
            log.record(&t.name, &t.href, result);
        }

        log.into_result()
    }

    async fn download_one(&self, staging: &StagingArea, transfer: &Transfer) -> Result<StagedFile> {
        let data = self
            .storage
            .provider
            .get(&self.object_key(&transfer.href)?)
            .await
            .map_err(remote_error)?;
        let actual = checksum_bytes(&data);
        if actual != transfer.checksum {
            return Err(Error::Storage(format!(
                "checksum mismatch for {}: expected {}, got {}",
                transfer.href, transfer.checksum, actual
            )));
        }
        staging.stage(&transfer.name, &data).await
    }

    /// Download and verify every transfer, then replace the working files.
    ///
    /// Working files are only touched once every download succeeded.
    /// Returns the working files replaced and the bytes moved.
    async fn download_all(&self, transfers: &[Transfer]) -> Result<(Vec<String>, u64)> {
        if transfers.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let staging = StagingArea::new(&self.collection_dir).await?;
        let staging_ref = &staging;

        let results: Vec<(&Transfer, Result<StagedFile>)> = stream::iter(transfers)
            .map(|t| async move { (t, self.download_one(staging_ref, t).await) })
            .buffer_unordered(self.config.max_concurrent_transfers)
            .boxed()
            .collect()
            .await;

        let mut log = TransferLog::new();
        let mut staged = Vec::new();
        for (t, result) in results {
            match result {
                Ok(file) => {
                    log.record(&t.name, &t.href, &Ok(file.size));
                    staged.push(file);
                }
                Err(e) => {
                    warn!("Download of {} failed: {}", t.href, e);
                    log.record(&t.name, &t.href, &Err(e));
                }
            }
        }

        if let Some(failure) = log.partial_failure() {
            staging.discard(&staged).await;
            return Err(Error::PartialFailure(failure));
        }
        let names = staging.commit(staged).await?;
        Ok((names, log.bytes_transferred()))
    }

    /// Confirm every href of `version` exists remotely.
    ///
    /// # Errors
    /// - `PartialFailure` naming the assets whose objects are missing
    pub(crate) async fn verify_present(&self, version: &Version) -> Result<()> {
        let mut log = TransferLog::new();
        for (name, asset) in &version.assets {
            if log.get(&asset.href).is_some() {
                continue;
            }
            let key = self.object_key(&asset.href)?;
            match self.storage.provider.head(&key).await {
                Ok(meta) => log.record(name, &asset.href, &Ok(meta.size)),
                Err(e) => log.record(name, &asset.href, &Err(remote_error(e))),
            }
        }
        log.into_result()?;
        Ok(())
    }

    /// Delete remote objects; returns the hrefs actually removed.
    ///
    /// Failures are logged and skipped.
    pub(crate) async fn delete_objects(&self, hrefs: &[String]) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for href in hrefs {
            let key = self.object_key(href)?;
            match self.storage.provider.delete(&key).await {
                Ok(()) => deleted.push(href.clone()),
                Err(e) if e.is_not_found() => debug!("{} already gone", href),
                Err(e) => warn!("Failed to delete {}: {}", href, e),
            }
        }
        Ok(deleted)
    }

    // COMMIT

    async fn commit_remote(&self, manifest: &Manifest) -> Result<()> {
        let key = self.remote_manifest_key()?;
        let data = store::serialize(&manifest.for_remote())?;
        self.storage
            .provider
            .put(&key, data)
            .await
            .map_err(remote_error)?;
        debug!("COMMIT remote manifest {}", key);
        Ok(())
    }

    async fn commit_local(&self, manifest: &Manifest) -> Result<()> {
        store::save(&manifest_path(&self.collection_dir), manifest).await?;
        debug!("COMMIT local manifest for {}", self.collection);
        Ok(())
    }

    /// Read-only comparison of local, remote and working files.
    pub async fn status(&self) -> Result<StatusReport> {
        let local = self.load_local().await?;
        let remote = self.load_remote().await?;
        let assets = match local.current() {
            Some(current) => {
                self.detector
                    .check_version(current, &self.collection_dir)
                    .await?
            }
            None => Default::default(),
        };

        Ok(StatusReport {
            drift: Self::drift(&local, remote.as_ref()),
            local_version: local.current_version,
            remote_version: remote.as_ref().and_then(|m| m.current_version),
            assets,
            pending_uploads: missing_uploads(&local, remote.as_ref())
                .into_iter()
                .map(|t| t.href)
                .collect(),
        })
    }

    /// Record the working files as a new local version.
    ///
    /// Nothing is sent to the remote; call [`push`](Self::push) afterwards.
    /// Bytes under new hrefs are cached so later edits of the working files
    /// cannot change what the push uploads. A dry run builds the version and
    /// writes nothing.
    pub async fn publish(
        &self,
        request: &PublishRequest,
        opts: SyncOptions,
    ) -> Result<PublishOutcome> {
        let local = self.load_local().await?;
        let outcome = build_version(
            &local,
            &self.collection_dir,
            request,
            self.extractor(),
            Utc::now(),
        )
        .await?;
        let next = append(&local, outcome.version.clone())?;

        let v = &outcome.version;
        if opts.dry_run {
            info!("[dry-run] Would publish {} {}", self.collection, v.version);
            return Ok(outcome);
        }

        let known: BTreeSet<&str> = local.versions.iter().flat_map(|e| e.hrefs()).collect();
        let objects = self.objects();
        let mut cached = Vec::new();
        for (name, asset) in &v.assets {
            if known.contains(asset.href.as_str()) {
                continue;
            }
            let path = working_path(&self.collection_dir, name)?;
            if let Err(e) = objects.store(&asset.href, &path, &asset.checksum).await {
                objects.evict(&cached).await;
                return Err(e);
            }
            cached.push(asset.href.clone());
        }
        if let Err(e) = self.commit_local(&next).await {
            objects.evict(&cached).await;
            return Err(e);
        }

        info!(
            "Published {} {} ({} asset(s) changed{})",
            self.collection,
            v.version,
            v.changes.len(),
            if v.breaking { ", breaking" } else { "" }
        );
        Ok(outcome)
    }

    /// Upload unpublished assets, then the manifest.
    ///
    /// # Errors
    /// - `Conflict` when the remote moved since the last pull or push
    /// - `PartialFailure` when any upload failed; no manifest is written
    /// - `Network` for other remote failures
    pub async fn push(&self, opts: SyncOptions) -> Result<SyncReport> {
        let local = self.load_local().await?;
        let remote = self.load_remote().await?;
        let planned = Self::plan_push(&local, remote.as_ref(), opts.force)?;
        info!(
            "Push {}: {} upload(s), {}",
            self.collection,
            planned.plan.uploads.len(),
            planned.plan.drift
        );
        self.apply_push(&local, planned, opts).await
    }

    async fn apply_push(&self, local: &Manifest, planned: Planned, opts: SyncOptions) -> Result<SyncReport> {
        let mut report = SyncReport::new(Operation::Push, planned.plan, opts);
        report.override_used = planned.override_used;
        if opts.dry_run {
            return Ok(report);
        }

        let log = self.upload_all(&report.plan.uploads).await?;
        report.uploaded = log.transferred();
        report.bytes_transferred = log.bytes_transferred();

        if let Some(update) = report.plan.manifest_update {
            if update.remote {
                self.commit_remote(local).await?;
            }
            if update.local {
                self.commit_local(&planned.next_local).await?;
            }
            report.manifest_written = true;
        }
        // The remote now holds these bytes.
        self.objects().evict(&report.uploaded).await;
        Ok(report)
    }

    /// Adopt the remote history and bring the working files up to date.
    ///
    /// # Errors
    /// - `Conflict` when the remote moved in a way the local history cannot
    ///   follow
    /// - `UncommittedChanges` when working files differ from the local
    ///   current version
    /// - `PartialFailure` when any download failed; nothing is replaced
    pub async fn pull(&self, opts: SyncOptions) -> Result<SyncReport> {
        let local = self.load_local().await?;
        let remote = self.load_remote().await?;
        let (report, _) = self.run_pull(&local, remote.as_ref(), opts).await?;
        Ok(report)
    }

    /// Pull against already loaded manifests; returns the report and the
    /// local manifest as it stands afterwards.
    async fn run_pull(
        &self,
        local: &Manifest,
        remote: Option<&Manifest>,
        opts: SyncOptions,
    ) -> Result<(SyncReport, Manifest)> {
        let mut planned = Self::plan_pull(local, remote, opts.force)?;
        let uncommitted_override = self.check_uncommitted(local, opts.force).await?;

        // Only the version the remote considers current is restored.
        let at_remote = remote.and_then(|m| m.current_version) == planned.next_local.current_version;
        if at_remote {
            planned.plan.downloads = self.stale_working_files(&planned.next_local).await?;
        }
        info!(
            "Pull {}: {} download(s), {}",
            self.collection,
            planned.plan.downloads.len(),
            planned.plan.drift
        );

        let mut report = SyncReport::new(Operation::Pull, planned.plan, opts);
        report.override_used = planned.override_used || uncommitted_override;
        if opts.dry_run {
            return Ok((report, planned.next_local));
        }

        let (downloaded, bytes) = self.download_all(&report.plan.downloads).await?;
        report.downloaded = downloaded;
        report.bytes_transferred = bytes;
        if report.plan.manifest_update.is_some() {
            self.commit_local(&planned.next_local).await?;
            report.manifest_written = true;
        }
        Ok((report, planned.next_local))
    }

    /// Pull, confirm the working files are clean, then push.
    pub async fn sync(&self, opts: SyncOptions) -> Result<SyncReport> {
        let local = self.load_local().await?;
        let remote = self.load_remote().await?;

        let (pull_report, after_pull) = self.run_pull(&local, remote.as_ref(), opts).await?;

        if !opts.dry_run {
            self.check_uncommitted(&after_pull, opts.force).await?;
        }

        // Pushing against the remote as loaded: a concurrent writer is caught
        // by the next drift check, not this one.
        let planned = Self::plan_push(&after_pull, remote.as_ref(), opts.force)?;
        let push_report = self.apply_push(&after_pull, planned, opts).await?;

        let report = SyncReport::combine(pull_report, push_report);
        info!(
            "Sync {}: {} transfer(s)",
            self.collection,
            report.transfer_count()
        );
        Ok(report)
    }

    /// Restore the assets and schema of `target` as a new minor version.
    ///
    /// # Errors
    /// - `Conflict` when the remote moved since the last pull or push
    /// - `InvalidInput` when local changes are unpushed or the target is
    ///   pruned or current
    /// - `NotFound` when the target is not in the history
    /// - `PartialFailure` when any target asset is missing remotely or fails
    ///   to download
    pub async fn rollback(
        &self,
        target: &VersionId,
        message: Option<String>,
        opts: SyncOptions,
    ) -> Result<SyncReport> {
        let local = self.load_local().await?;
        let remote = self.load_remote().await?;
        let drift = Self::drift(&local, remote.as_ref());
        let conflict_override = drift.check(opts.force)?;
        let remote = remote.ok_or_else(|| {
            Error::InvalidInput("nothing pushed yet; push before rolling back".to_string())
        })?;
        require_level(&local, &remote)?;

        let mut next = store::rollback(&local, target, message, Utc::now())?;
        next.expected_remote = next.current_version;
        let uncommitted_override = self.check_uncommitted(&local, opts.force).await?;

        let mut plan = SyncPlan::new(drift);
        plan.downloads = self.stale_working_files(&next).await?;
        plan.manifest_update = Some(ManifestUpdate {
            remote: true,
            local: true,
            current_version: next.current_version,
        });
        info!(
            "Rollback {} to {} as {}",
            self.collection,
            target,
            next.current_version
                .map(|v| v.to_string())
                .unwrap_or_default()
        );

        if let Some(current) = next.current() {
            self.verify_present(current).await?;
        }

        let mut report = SyncReport::new(Operation::Rollback, plan, opts);
        report.override_used = conflict_override || uncommitted_override;
        if opts.dry_run {
            return Ok(report);
        }

        let (downloaded, bytes) = self.download_all(&report.plan.downloads).await?;
        report.downloaded = downloaded;
        report.bytes_transferred = bytes;
        self.commit_remote(&next).await?;
        self.commit_local(&next).await?;
        report.manifest_written = true;
        Ok(report)
    }

    /// Mark all but the newest `keep` versions pruned and delete objects no
    /// retained version references.
    ///
    /// Deletion happens after COMMIT; a failed delete only leaves an orphan.
    pub async fn prune(&self, keep: usize, opts: SyncOptions) -> Result<SyncReport> {
        let local = self.load_local().await?;
        let remote = self.load_remote().await?;
        let drift = Self::drift(&local, remote.as_ref());
        let override_used = drift.check(opts.force)?;
        if let Some(remote) = &remote {
            require_level(&local, remote)?;
        }

        let (mut next, outcome) = store::prune(&local, keep)?;
        let mut plan = SyncPlan::new(drift);
        if !outcome.is_empty() {
            if remote.is_some() {
                next.expected_remote = next.current_version;
                plan.deletes = outcome.removable.clone();
            }
            plan.manifest_update = Some(ManifestUpdate {
                remote: remote.is_some(),
                local: true,
                current_version: next.current_version,
            });
        }
        info!(
            "Prune {}: {} version(s), {} object(s)",
            self.collection,
            outcome.pruned.len(),
            plan.deletes.len()
        );

        let mut report = SyncReport::new(Operation::Prune, plan, opts);
        report.override_used = override_used;
        if opts.dry_run {
            return Ok(report);
        }
        let Some(update) = report.plan.manifest_update else {
            return Ok(report);
        };

        if update.remote {
            self.commit_remote(&next).await?;
        }
        self.commit_local(&next).await?;
        report.manifest_written = true;

        report.deleted = self.delete_objects(&report.plan.deletes).await?;
        self.objects().evict(&outcome.removable).await;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::OBJECTS_DIR;
    use crate::publish::AssetInput;
    use geovault_manifest::FormatKind;
    use geovault_schema::ExtractedMetadata;
    use geovault_storage::{MemoryProvider, StorageProvider};
    use tempfile::TempDir;

    fn coordinator(dir: &Path, provider: &MemoryProvider) -> SyncCoordinator {
        let storage = ResolvedRemote {
            provider: Arc::new(provider.clone()),
            prefix: ObjectKey::parse("catalog").unwrap(),
        };
        SyncCoordinator::new(
            dir,
            CollectionId::new("roads").unwrap(),
            storage,
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
    fn test_remote_error_classification() {
        assert!(matches!(
            remote_error(Error::Storage("disk".to_string())),
            Error::Network(_)
        ));
        assert!(remote_error(Error::NotFound("x".to_string())).is_not_found());
    }

    #[tokio::test]
    async fn test_missing_uploads_dedupes_shared_hrefs() {
        let temp = TempDir::new().unwrap();
        let provider = MemoryProvider::new();
        let coord = coordinator(temp.path(), &provider);

        std::fs::write(temp.path().join("a.parquet"), b"a").unwrap();
        std::fs::write(temp.path().join("b.parquet"), b"b").unwrap();
        coord
            .publish(&request(&["a.parquet", "b.parquet"]), SyncOptions::default())
            .await
            .unwrap();
        std::fs::write(temp.path().join("b.parquet"), b"b2").unwrap();
        coord
            .publish(&request(&["a.parquet", "b.parquet"]), SyncOptions::default())
            .await
            .unwrap();

        let local = coord.load_local().await.unwrap();
        let uploads = missing_uploads(&local, None);
        let hrefs: Vec<&str> = uploads.iter().map(|t| t.href.as_str()).collect();
        assert_eq!(hrefs, vec!["1.0.0/a.parquet", "1.0.0/b.parquet", "1.1.0/b.parquet"]);
    }

    #[tokio::test]
    async fn test_remote_manifest_key_layout() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(temp.path(), &MemoryProvider::new());
        assert_eq!(
            coord.remote_manifest_key().unwrap().as_key(),
            "catalog/roads/versions.json"
        );
    }

    #[tokio::test]
    async fn test_upload_reads_cached_copy() {
        let temp = TempDir::new().unwrap();
        let provider = MemoryProvider::new();
        let coord = coordinator(temp.path(), &provider);

        std::fs::write(temp.path().join("a.parquet"), b"a").unwrap();
        coord
            .publish(&request(&["a.parquet"]), SyncOptions::default())
            .await
            .unwrap();
        assert!(temp.path().join(OBJECTS_DIR).join("1.0.0/a.parquet").exists());
        std::fs::write(temp.path().join("a.parquet"), b"edited").unwrap();

        let report = coord.push(SyncOptions::default()).await.unwrap();
        assert_eq!(report.uploaded, vec!["1.0.0/a.parquet"]);
        assert_eq!(report.bytes_transferred, 1);
        let key = ObjectKey::parse("catalog/roads/1.0.0/a.parquet").unwrap();
        assert_eq!(provider.get(&key).await.unwrap(), b"a");
        assert!(!temp.path().join(OBJECTS_DIR).exists());
    }

    #[tokio::test]
    async fn test_corrupt_cached_copy_fails_upload() {
        let temp = TempDir::new().unwrap();
        let provider = MemoryProvider::new();
        let coord = coordinator(temp.path(), &provider);

        std::fs::write(temp.path().join("a.parquet"), b"a").unwrap();
        coord
            .publish(&request(&["a.parquet"]), SyncOptions::default())
            .await
            .unwrap();
        std::fs::write(temp.path().join(OBJECTS_DIR).join("1.0.0/a.parquet"), b"rot").unwrap();

        match coord.push(SyncOptions::default()).await.unwrap_err() {
            Error::PartialFailure(failure) => {
                assert_eq!(failure.failed_hrefs(), vec!["1.0.0/a.parquet"]);
                assert!(failure.failed[0].cause.contains("cached copy"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(provider.keys().is_empty());
    }

    #[tokio::test]
    async fn test_publish_dry_run_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let coord = coordinator(temp.path(), &MemoryProvider::new());

        std::fs::write(temp.path().join("a.parquet"), b"a").unwrap();
        let outcome = coord
            .publish(&request(&["a.parquet"]), SyncOptions::dry_run())
            .await
            .unwrap();
        assert_eq!(outcome.version.version, VersionId::initial());
        assert!(!manifest_path(temp.path()).exists());
        assert!(!temp.path().join(OBJECTS_DIR).exists());
        assert!(coord.load_local().await.unwrap().is_empty());
    }
}

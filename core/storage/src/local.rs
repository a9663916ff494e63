//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::provider::{ObjectMeta, StorageProvider};
use geovault_common::{Error, ObjectKey, Result};

/// Local filesystem storage provider.
///
/// Maps object keys onto a directory tree below `root`. Intermediate
/// directories are created on `put`, mirroring object-store semantics where
/// prefixes need no explicit creation.
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this provider.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, key: &ObjectKey) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in key.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn create_metadata(&self, key: &ObjectKey, fs_meta: &std::fs::Metadata) -> ObjectMeta {
        let modified: Option<DateTime<Utc>> = fs_meta.modified().ok().map(Into::into);
        let stamp = modified
            .and_then(|m| m.timestamp_nanos_opt())
            .unwrap_or_default();

        ObjectMeta {
            key: key.clone(),
            size: fs_meta.len(),
            etag: format!("{}-{}", stamp, fs_meta.len()),
            modified,
        }
    }

    fn not_found(key: &ObjectKey) -> Error {
        Error::NotFound(format!("Object not found: {}", key))
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(key);

        if !fs_path.is_file() {
            return Err(Self::not_found(key));
        }

        Ok(fs::read(&fs_path).await?)
    }

    async fn put(&self, key: &ObjectKey, data: Vec<u8>) -> Result<ObjectMeta> {
        if key.is_root() {
            return Err(Error::InvalidInput("Cannot put to an empty key".to_string()));
        }
        let fs_path = self.to_fs_path(key);

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Readers never observe a half-written object.
        let tmp = fs_path.with_file_name(format!(
            ".{}.{}.tmp",
            key.name().unwrap_or("object"),
            Uuid::new_v4()
        ));
        let write = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &fs_path).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(self.create_metadata(key, &fs_meta))
    }

    async fn head(&self, key: &ObjectKey) -> Result<ObjectMeta> {
        let fs_path = self.to_fs_path(key);

        if !fs_path.is_file() {
            return Err(Self::not_found(key));
        }

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(self.create_metadata(key, &fs_meta))
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<ObjectKey>> {
        let start = self.to_fs_path(prefix);
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut pending = vec![(start, prefix.clone())];

        while let Some((dir, dir_key)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                // Skip in-flight temp files from concurrent puts.
                if name.starts_with('.') && name.ends_with(".tmp") {
                    continue;
                }
                let child = dir_key.join(&name)?;
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), child));
                } else {
                    results.push(child);
                }
            }
        }

        Ok(results)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let fs_path = self.to_fs_path(key);

        if !fs_path.is_file() {
            return Err(Self::not_found(key));
        }

        fs::remove_file(&fs_path).await?;
        Ok(())
    }
}

//! Local copies of published bytes that have not reached the remote yet.
//!
//! Publish copies every newly referenced href here, so a later edit of the
//! working file cannot take the bytes of an unpushed version with it. Push
//! uploads from the cache and evicts entries once the remote manifest
//! commits.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use geovault_common::{Error, Result};
use geovault_manifest::checksum_bytes;

use crate::staging::working_path;

/// Name of the object cache directory inside a collection directory.
pub const OBJECTS_DIR: &str = ".geovault-objects";

/// Cached bytes for one collection, keyed by href.
pub struct ObjectCache {
    base_dir: PathBuf,
}

impl ObjectCache {
    pub fn new(collection_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: collection_dir.as_ref().join(OBJECTS_DIR),
        }
    }

    fn path(&self, href: &str) -> Result<PathBuf> {
        working_path(&self.base_dir, href)
    }

    /// Copy `source` into the cache under `href`.
    ///
    /// # Errors
    /// - `InvalidInput` if `source` no longer holds `checksum`
    pub async fn store(&self, href: &str, source: &Path, checksum: &str) -> Result<()> {
        let target = self.path(href)?;
        let data = fs::read(source).await?;
        if checksum_bytes(&data) != checksum {
            return Err(Error::InvalidInput(format!(
                "{} changed while it was being published",
                source.display()
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        // The cache holds the only copy of unpushed bytes.
        let temp = self.base_dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let write = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        debug!("Cached {} ({} bytes)", href, data.len());
        Ok(())
    }

    /// Cached bytes of `href`, if any.
    pub async fn read(&self, href: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(href)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop cached hrefs. Failures are logged.
    pub async fn evict(&self, hrefs: &[String]) {
        for href in hrefs {
            let Ok(path) = self.path(href) else {
                continue;
            };
            match fs::remove_file(&path).await {
                Ok(()) => debug!("Evicted {}", href),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to evict cached {}: {}", href, e),
            }
            // Version directories go once empty.
            if let Some(parent) = path.parent() {
                if parent != self.base_dir {
                    let _ = fs::remove_dir(parent).await;
                }
            }
        }
        let _ = fs::remove_dir(&self.base_dir).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_read_evict() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.tif");
        std::fs::write(&source, b"raster").unwrap();
        let cache = ObjectCache::new(temp.path());

        cache
            .store("1.0.0/a.tif", &source, &checksum_bytes(b"raster"))
            .await
            .unwrap();
        std::fs::write(&source, b"edited").unwrap();
        assert_eq!(cache.read("1.0.0/a.tif").await.unwrap().unwrap(), b"raster");
        assert!(cache.read("1.0.0/b.tif").await.unwrap().is_none());

        cache.evict(&["1.0.0/a.tif".to_string()]).await;
        assert!(cache.read("1.0.0/a.tif").await.unwrap().is_none());
        assert!(!temp.path().join(OBJECTS_DIR).exists());
    }

    #[tokio::test]
    async fn test_store_rejects_changed_source() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.tif");
        std::fs::write(&source, b"edited").unwrap();
        let cache = ObjectCache::new(temp.path());

        let err = cache
            .store("1.0.0/a.tif", &source, &checksum_bytes(b"raster"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(cache.read("1.0.0/a.tif").await.unwrap().is_none());
    }
}

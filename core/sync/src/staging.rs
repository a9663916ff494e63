//! Local staging area for atomic working-file replacement.
//!
//! Downloads land in a hidden directory inside the collection directory and
//! are renamed over the working files only once every download of the
//! APPLY phase has been verified.

use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use geovault_common::{Error, Result};

/// Name of the staging directory inside a collection directory.
pub const STAGING_DIR: &str = ".geovault-staging";

/// Path of an asset's working file inside a collection directory.
///
/// # Errors
/// - `InvalidInput` if the name is empty, absolute or climbs out of the
///   directory
pub fn working_path(collection_dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if name.is_empty() || escapes {
        return Err(Error::InvalidInput(format!(
            "Asset name is not a relative path: {}",
            name
        )));
    }
    Ok(collection_dir.join(relative))
}

/// A verified download waiting to replace its working file.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Asset name, which is also the working file's relative path.
    pub name: String,
    pub staging_file: PathBuf,
    pub size: u64,
}

/// Staging directory for one collection.
pub struct StagingArea {
    collection_dir: PathBuf,
    base_dir: PathBuf,
}

impl StagingArea {
    /// Create the staging directory if needed.
    pub async fn new(collection_dir: impl AsRef<Path>) -> Result<Self> {
        let collection_dir = collection_dir.as_ref().to_path_buf();
        let base_dir = collection_dir.join(STAGING_DIR);
        fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            collection_dir,
            base_dir,
        })
    }

    /// Working-file path of an asset.
    pub fn target_path(&self, name: &str) -> Result<PathBuf> {
        working_path(&self.collection_dir, name)
    }

    /// Write bytes to a fresh staging file.
    pub async fn stage(&self, name: &str, data: &[u8]) -> Result<StagedFile> {
        self.target_path(name)?;
        let staging_file = self.base_dir.join(Uuid::new_v4().to_string());
        fs::write(&staging_file, data).await?;
        debug!("Staged {} ({} bytes)", name, data.len());
        Ok(StagedFile {
            name: name.to_string(),
            staging_file,
            size: data.len() as u64,
        })
    }

    /// Move staged files over their working files.
    ///
    /// Returns the names committed, in the order given.
    pub async fn commit(&self, files: Vec<StagedFile>) -> Result<Vec<String>> {
        let mut committed = Vec::with_capacity(files.len());
        for file in files {
            let target = self.target_path(&file.name)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&file.staging_file, &target).await?;
            committed.push(file.name);
        }
        self.cleanup().await;
        Ok(committed)
    }

    /// Remove staged files without applying them.
    pub async fn discard(&self, files: &[StagedFile]) {
        for file in files {
            if let Err(e) = fs::remove_file(&file.staging_file).await {
                warn!("Failed to remove staged file for {}: {}", file.name, e);
            }
        }
        self.cleanup().await;
    }

    /// Remove the staging directory when nothing is left in it.
    async fn cleanup(&self) {
        // Fails harmlessly while other staged files remain.
        let _ = fs::remove_dir(&self.base_dir).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stage_and_commit() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.tif"), b"old").unwrap();
        let staging = StagingArea::new(temp.path()).await.unwrap();

        let a = staging.stage("a.tif", b"new").await.unwrap();
        let b = staging.stage("nested/b.tif", b"bee").await.unwrap();
        // Working files untouched until commit.
        assert_eq!(std::fs::read(temp.path().join("a.tif")).unwrap(), b"old");

        let names = staging.commit(vec![a, b]).await.unwrap();
        assert_eq!(names, vec!["a.tif", "nested/b.tif"]);
        assert_eq!(std::fs::read(temp.path().join("a.tif")).unwrap(), b"new");
        assert_eq!(std::fs::read(temp.path().join("nested/b.tif")).unwrap(), b"bee");
        assert!(!temp.path().join(STAGING_DIR).exists());
    }

    #[tokio::test]
    async fn test_discard_leaves_working_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.tif"), b"old").unwrap();
        let staging = StagingArea::new(temp.path()).await.unwrap();

        let staged = staging.stage("a.tif", b"new").await.unwrap();
        staging.discard(&[staged]).await;

        assert_eq!(std::fs::read(temp.path().join("a.tif")).unwrap(), b"old");
        assert!(!temp.path().join(STAGING_DIR).exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_names() {
        let temp = TempDir::new().unwrap();
        let staging = StagingArea::new(temp.path()).await.unwrap();
        assert!(staging.stage("../evil", b"x").await.is_err());
        assert!(staging.stage("/etc/passwd", b"x").await.is_err());
    }
}

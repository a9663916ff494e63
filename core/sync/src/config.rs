//! Sync configuration.
//!
//! Resolved by the caller and handed to the coordinator at construction.
//! Nothing in this crate reads environment variables or config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use geovault_common::{Error, Result};
use geovault_staleness::StalenessMode;

use crate::backend::BackendKind;

/// Default bound on concurrent asset transfers within one APPLY phase.
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 4;

/// Per-collection overrides of the top-level remote settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_profile: Option<String>,
}

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote location, e.g. `s3://bucket/catalog` or a local path.
    pub remote: Option<String>,
    /// Credentials profile passed through to the storage provider.
    pub credentials_profile: Option<String>,
    /// Upper bound on concurrent uploads or downloads.
    pub max_concurrent_transfers: usize,
    /// Staleness check thoroughness.
    pub staleness_mode: StalenessMode,
    /// Versioning backend variant.
    pub backend: BackendKind,
    /// Overrides keyed by collection name.
    pub collections: HashMap<String, CollectionOverride>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: None,
            credentials_profile: None,
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            staleness_mode: StalenessMode::Tiered,
            backend: BackendKind::Manifest,
            collections: HashMap::new(),
        }
    }
}

impl SyncConfig {
    /// Config with only a remote set.
    pub fn with_remote(remote: impl Into<String>) -> Self {
        Self {
            remote: Some(remote.into()),
            ..Self::default()
        }
    }

    /// Effective remote for a collection.
    pub fn remote_for(&self, collection: &str) -> Option<&str> {
        self.collections
            .get(collection)
            .and_then(|o| o.remote.as_deref())
            .or(self.remote.as_deref())
    }

    /// Effective credentials profile for a collection.
    pub fn profile_for(&self, collection: &str) -> Option<&str> {
        self.collections
            .get(collection)
            .and_then(|o| o.credentials_profile.as_deref())
            .or(self.credentials_profile.as_deref())
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// - `max_concurrent_transfers` is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_transfers == 0 {
            return Err(Error::InvalidInput(
                "max_concurrent_transfers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_concurrent_transfers, 4);
        assert_eq!(config.staleness_mode, StalenessMode::Tiered);
        assert_eq!(config.backend, BackendKind::Manifest);
        assert!(config.remote_for("roads").is_none());
    }

    #[test]
    fn test_collection_override() {
        let mut config = SyncConfig::with_remote("s3://main/catalog");
        config.credentials_profile = Some("default".to_string());
        config.collections.insert(
            "imagery".to_string(),
            CollectionOverride {
                remote: Some("s3://big/imagery".to_string()),
                credentials_profile: None,
            },
        );

        assert_eq!(config.remote_for("roads"), Some("s3://main/catalog"));
        assert_eq!(config.remote_for("imagery"), Some("s3://big/imagery"));
        assert_eq!(config.profile_for("imagery"), Some("default"));
    }

    #[test]
    fn test_json_partial_document() {
        let config =
            SyncConfig::from_json(r#"{"remote":"/srv/mirror","staleness_mode":"full_hash"}"#)
                .unwrap();
        assert_eq!(config.remote.as_deref(), Some("/srv/mirror"));
        assert_eq!(config.staleness_mode, StalenessMode::FullHash);
        assert_eq!(config.max_concurrent_transfers, DEFAULT_MAX_CONCURRENT_TRANSFERS);

        let back = SyncConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(SyncConfig::from_json(r#"{"max_concurrent_transfers":0}"#).is_err());
    }
}

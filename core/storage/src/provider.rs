//! Storage provider trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use geovault_common::{ObjectKey, Result};

/// Metadata for a stored object, as returned by `head` and `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Full key of the object.
    pub key: ObjectKey,
    /// Size in bytes.
    pub size: u64,
    /// ETag or revision ID; changes whenever the content is replaced.
    pub etag: String,
    /// Last modification time, when the backend reports one.
    pub modified: Option<DateTime<Utc>>,
}

/// Narrow object-storage interface consumed by the sync coordinator.
///
/// Transport, authentication and retry policy belong to the implementation.
/// Missing objects are reported as `Error::NotFound`; any other failure is
/// treated by callers as a recoverable network error.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read a whole object.
    ///
    /// # Errors
    /// - `NotFound` if no object exists at `key`
    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>>;

    /// Create or replace an object.
    ///
    /// # Postconditions
    /// - The object is durably stored when this returns `Ok`
    /// - Returns metadata with a fresh etag
    async fn put(&self, key: &ObjectKey, data: Vec<u8>) -> Result<ObjectMeta>;

    /// Read object metadata without its content.
    ///
    /// # Errors
    /// - `NotFound` if no object exists at `key`
    async fn head(&self, key: &ObjectKey) -> Result<ObjectMeta>;

    /// List keys under a prefix, in no particular order.
    ///
    /// Returns an empty vec if nothing matches.
    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<ObjectKey>>;

    /// Delete an object.
    ///
    /// # Errors
    /// - `NotFound` if no object exists at `key`
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

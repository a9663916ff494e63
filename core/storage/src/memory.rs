//! In-memory storage provider for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

use crate::provider::{ObjectMeta, StorageProvider};
use geovault_common::{Error, ObjectKey, Result};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    meta: ObjectMeta,
}

/// Substring rules that make matching operations fail.
#[derive(Debug, Default)]
struct Faults {
    puts: Vec<String>,
    gets: Vec<String>,
}

impl Faults {
    fn matches(rules: &[String], key: &str) -> bool {
        rules.iter().any(|r| key.contains(r.as_str()))
    }
}

/// In-memory storage provider.
///
/// Useful for testing and development. All data is stored in memory and
/// lost on drop. Clones share the same underlying store, so a test can keep
/// a handle while the coordinator owns another.
///
/// Faults can be injected per key substring to simulate a storage backend
/// failing partway through a transfer phase.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    storage: Arc<RwLock<HashMap<String, Entry>>>,
    faults: Arc<RwLock<Faults>>,
    puts: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
}

impl MemoryProvider {
    /// Create a new empty memory provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.storage
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.storage
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    /// Make every `put` whose key contains `pattern` fail with a network error.
    pub fn fail_puts_matching(&self, pattern: impl Into<String>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.puts.push(pattern.into());
        }
    }

    /// Make every `get` whose key contains `pattern` fail with a network error.
    pub fn fail_gets_matching(&self, pattern: impl Into<String>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.gets.push(pattern.into());
        }
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.write() {
            *faults = Faults::default();
        }
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful `get` calls so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Whether an object exists at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.read().map(|s| s.contains_key(key)).unwrap_or(false)
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn check_fault(&self, put: bool, key: &str) -> Result<()> {
        let faults = self
            .faults
            .read()
            .map_err(|_| Error::Storage("fault table lock poisoned".to_string()))?;
        let rules = if put { &faults.puts } else { &faults.gets };
        if Faults::matches(rules, key) {
            debug!("Injected fault for {}", key);
            return Err(Error::Network(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>> {
        let k = key.as_key();
        self.check_fault(false, &k)?;

        let storage = self.read()?;
        match storage.get(&k) {
            Some(entry) => {
                self.gets.fetch_add(1, Ordering::SeqCst);
                Ok(entry.data.clone())
            }
            None => Err(Error::NotFound(format!("Object not found: {}", key))),
        }
    }

    async fn put(&self, key: &ObjectKey, data: Vec<u8>) -> Result<ObjectMeta> {
        let k = key.as_key();
        self.check_fault(true, &k)?;

        let meta = ObjectMeta {
            key: key.clone(),
            size: data.len() as u64,
            etag: Uuid::new_v4().to_string(),
            modified: Some(Utc::now()),
        };

        self.write()?.insert(
            k,
            Entry {
                data,
                meta: meta.clone(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);

        Ok(meta)
    }

    async fn head(&self, key: &ObjectKey) -> Result<ObjectMeta> {
        let storage = self.read()?;
        storage
            .get(&key.as_key())
            .map(|e| e.meta.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<ObjectKey>> {
        let storage = self.read()?;
        let mut results = Vec::new();
        for entry in storage.values() {
            if entry.meta.key.starts_with(prefix) {
                results.push(entry.meta.key.clone());
            }
        }
        Ok(results)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        match self.write()?.remove(&key.as_key()) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Object not found: {}", key))),
        }
    }
}

//! Provider registry for resolving a remote location string to a provider.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::provider::StorageProvider;
use geovault_common::{Error, ObjectKey, Result};

/// A parsed remote location such as `s3://bucket/prefix` or `/srv/mirror`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLocation {
    /// URL scheme; bare paths resolve to `file`.
    pub scheme: String,
    /// Everything after `scheme://`.
    pub path: String,
}

impl RemoteLocation {
    /// Parse a location string.
    ///
    /// # Errors
    /// - Empty location, or an empty path after the scheme
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::InvalidInput("Remote location cannot be empty".to_string()));
        }

        let (scheme, path) = match location.split_once("://") {
            Some((scheme, path)) => (scheme.to_ascii_lowercase(), path.to_string()),
            None => ("file".to_string(), location.to_string()),
        };

        if scheme.is_empty() || (path.trim_matches('/').is_empty() && scheme != "file") {
            return Err(Error::InvalidInput(format!(
                "Remote location has no bucket or path: {}",
                location
            )));
        }

        Ok(Self { scheme, path })
    }
}

impl fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path)
    }
}

/// A provider plus the key prefix all of a catalog's objects live under.
#[derive(Clone)]
pub struct ResolvedRemote {
    pub provider: Arc<dyn StorageProvider>,
    pub prefix: ObjectKey,
}

/// Factory function type for creating providers.
///
/// Receives the parsed location and the optional credentials profile.
pub type ProviderFactory =
    Box<dyn Fn(&RemoteLocation, Option<&str>) -> Result<ResolvedRemote> + Send + Sync>;

/// Registry for storage provider factories, keyed by location scheme.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory for a scheme.
    ///
    /// # Errors
    /// - Returns error if the scheme is already registered
    pub fn register(&mut self, scheme: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let scheme = scheme.into();
        if self.has_scheme(&scheme) {
            return Err(Error::InvalidInput(format!(
                "Provider for scheme '{}' is already registered",
                scheme
            )));
        }
        self.factories.insert(scheme, factory);
        Ok(())
    }

    /// Resolve a location string to a provider and key prefix.
    ///
    /// # Errors
    /// - Location does not parse
    /// - No provider registered for its scheme
    pub fn resolve(&self, location: &str, profile: Option<&str>) -> Result<ResolvedRemote> {
        let parsed = RemoteLocation::parse(location)?;
        let factory = self.factories.get(&parsed.scheme).ok_or_else(|| {
            Error::NotFound(format!(
                "No storage provider registered for scheme '{}' (known: {})",
                parsed.scheme,
                self.schemes().join(", ")
            ))
        })?;
        factory(&parsed, profile)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Check if a scheme is registered.
    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers (`memory`, `file`).
///
/// Object-store transports such as `s3` are registered by the embedding
/// application.
pub fn create_default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    let builtin: [(&str, ProviderFactory); 2] = [
        (
            "memory",
            Box::new(|location: &RemoteLocation, _profile: Option<&str>| {
                Ok(ResolvedRemote {
                    provider: Arc::new(crate::memory::MemoryProvider::new()),
                    prefix: ObjectKey::parse(&location.path)?,
                })
            }),
        ),
        (
            "file",
            Box::new(|location: &RemoteLocation, _profile: Option<&str>| {
                Ok(ResolvedRemote {
                    provider: Arc::new(crate::local::LocalProvider::new(&location.path)?),
                    prefix: ObjectKey::parse("")?,
                })
            }),
        ),
    ];

    for (scheme, factory) in builtin {
        // Fresh registry: schemes cannot collide.
        let _ = registry.register(scheme, factory);
    }

    registry
}

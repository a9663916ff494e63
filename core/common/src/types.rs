//! Common types used throughout geovault.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Name of a collection: a group of assets with its own version history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionId(String);

impl CollectionId {
    /// Create a new CollectionId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty, starts with a dot, or contains a separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "CollectionId cannot be empty".to_string(),
            ));
        }
        if id.starts_with('.') {
            return Err(crate::Error::InvalidInput(format!(
                "CollectionId cannot start with a dot: {}",
                id
            )));
        }
        if id.contains('/') || id.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "CollectionId cannot contain separators: {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CollectionId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<CollectionId> for String {
    fn from(id: CollectionId) -> Self {
        id.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Semantic version identifier of a published collection state.
///
/// Serialized as `"major.minor.patch"`. Ordering is numeric per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionId {
    /// Create a version from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The first version of any collection.
    pub const fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    /// Parse `major.minor.patch`. A leading `v` is accepted.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parts: Vec<&str> = body.split('.').collect();
        if parts.len() != 3 {
            return Err(crate::Error::InvalidVersion(format!(
                "expected major.minor.patch, got '{}'",
                s
            )));
        }

        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(crate::Error::InvalidVersion(format!(
                    "non-numeric component in '{}'",
                    s
                )));
            }
            *slot = part.parse().map_err(|_| {
                crate::Error::InvalidVersion(format!("component out of range in '{}'", s))
            })?;
        }

        Ok(Self::new(nums[0], nums[1], nums[2]))
    }

    fn increment(&self, component: u64) -> crate::Result<u64> {
        component.checked_add(1).ok_or_else(|| {
            crate::Error::InvalidVersion(format!("no version follows {}", self))
        })
    }

    /// # Errors
    /// - `InvalidVersion` when the component is already at its maximum
    pub fn bump_major(&self) -> crate::Result<Self> {
        Ok(Self::new(self.increment(self.major)?, 0, 0))
    }

    pub fn bump_minor(&self) -> crate::Result<Self> {
        Ok(Self::new(self.major, self.increment(self.minor)?, 0))
    }

    pub fn bump_patch(&self) -> crate::Result<Self> {
        Ok(Self::new(self.major, self.minor, self.increment(self.patch)?))
    }

    /// Next version after this one: major bump for breaking changes, minor otherwise.
    pub fn next(&self, breaking: bool) -> crate::Result<Self> {
        if breaking {
            self.bump_major()
        } else {
            self.bump_minor()
        }
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for VersionId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionId> for String {
    fn from(v: VersionId) -> Self {
        v.to_string()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A key in remote object storage, independent of the backend.
///
/// Keys are `/`-separated and never carry leading or trailing separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    components: Vec<String>,
}

impl ObjectKey {
    /// Create a key from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, `.`/`..`, or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a key string. Uses '/' as separator; empty segments are rejected.
    pub fn parse(key: &str) -> crate::Result<Self> {
        let key = key.trim_matches('/');
        if key.is_empty() {
            return Ok(Self {
                components: Vec::new(),
            });
        }
        let components: Vec<String> = key.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Key component cannot be empty".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(format!(
                "Key component cannot be '{}'",
                comp
            )));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Key component cannot contain separators".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether this is the empty (bucket-root) key.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the last component, if any.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Append a relative key (which may itself contain separators).
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        let child = Self::parse(child)?;
        if child.is_root() {
            return Err(crate::Error::InvalidInput(
                "Child key cannot be empty".to_string(),
            ));
        }
        let mut components = self.components.clone();
        components.extend(child.components);
        Ok(Self { components })
    }

    /// Whether `self` lies under `prefix` (component-wise).
    pub fn starts_with(&self, prefix: &ObjectKey) -> bool {
        self.components.starts_with(&prefix.components)
    }

    /// Get the key components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Render as a storage key string.
    pub fn as_key(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

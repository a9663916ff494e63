//! Remote object-storage abstraction for geovault.
//!
//! This module provides the narrow trait the sync coordinator consumes
//! (`get`/`put`/`head`/`list`, plus `delete` for pruning), an in-memory and a
//! local-filesystem implementation, and a registry that resolves a remote
//! location string to a provider.
//!
//! # Design Principles
//! - Provider isolation: no transport-specific logic in manifest or sync crates
//! - Async operations: all I/O operations are async
//! - Unified error semantics: missing objects are `NotFound`, everything else
//!   is a provider failure the caller treats as a network error

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{ObjectMeta, StorageProvider};
pub use registry::{
    create_default_registry, ProviderFactory, ProviderRegistry, RemoteLocation, ResolvedRemote,
};

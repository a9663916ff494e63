//! Common utilities and types shared across geovault crates.
//!
//! This module provides the error taxonomy every component reports through
//! and the validated identifier types that flow between them.

pub mod error;
pub mod types;

pub use error::{
    AssetFailure, Error, PartialFailure, Result, EXIT_CONFLICT, EXIT_CORRUPT, EXIT_FAILURE,
    EXIT_OK, EXIT_PARTIAL_FAILURE, EXIT_UNCOMMITTED,
};
pub use types::{CollectionId, ObjectKey, VersionId};

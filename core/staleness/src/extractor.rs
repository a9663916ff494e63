//! External structural-metadata extractor interface.

use async_trait::async_trait;
use std::path::Path;

use geovault_common::Result;
use geovault_manifest::StructuralSummary;
use geovault_schema::ExtractedMetadata;

/// Reads structural information from a dataset file.
///
/// Implemented outside this workspace (format readers). `summary` must only
/// read headers or footers; `metadata` may read more.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extent and count, cheap to compute.
    async fn summary(&self, path: &Path) -> Result<StructuralSummary>;

    /// Field and band structure.
    async fn metadata(&self, path: &Path) -> Result<ExtractedMetadata>;
}

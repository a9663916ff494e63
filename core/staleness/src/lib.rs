//! Staleness detection for published assets.
//!
//! Decides whether a working file still matches the asset recorded in the
//! current version, reading as little of the file as possible. See
//! [`StalenessDetector`] for the tiers.

pub mod detector;
pub mod extractor;

pub use detector::{modified_time, Staleness, StalenessDetector, StalenessMode};
pub use extractor::Extractor;

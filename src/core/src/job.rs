//! Print job artifacts and their persistence.
//!
//! Components:
//! - `types`: the `Job` entity and its `Metadata` JSON contract.
//! - `store`: crash-safe on-disk persistence with a free-space gate.
//! - `reprint`: short-window fingerprint index for reprint detection.

pub mod reprint;
pub mod store;
pub mod types;

pub use reprint::ReprintDetector;
pub use store::Store;
pub use types::{Job, Metadata, Transport};

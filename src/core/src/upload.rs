//! Durable store-and-forward webhook delivery.
//!
//! Components:
//! - `types`: the `.upload.json` sidecar record.
//! - `uploader`: bounded queue, startup recovery scan, retrying worker.

pub mod types;
pub mod uploader;

pub use types::{UploadState, UploadStatus};
pub use uploader::Uploader;

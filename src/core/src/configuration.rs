//! Daemon configuration.
//!
//! The configuration is a typed record loaded from a TOML file. Every field
//! carries a default so a minimal deployment only sets `device_id`,
//! `site_id`, and whatever diverges from the defaults.

pub mod config;
pub mod types;

pub use config::Config;
pub use types::{CaptureConfig, HealthConfig, MetricsConfig, StorageConfig, UploadConfig};

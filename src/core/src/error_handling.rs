pub mod types;

pub use types::{CaptureError, ConfigError, StoreError, UploadError};

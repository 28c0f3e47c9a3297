pub mod capture;
pub mod configuration;
pub mod error_handling;
pub mod health;
pub mod job;
pub mod upload;

pub use capture::{Capturer, Stats};
pub use configuration::Config;
pub use health::HealthServer;
pub use job::{Job, ReprintDetector, Store};
pub use upload::Uploader;

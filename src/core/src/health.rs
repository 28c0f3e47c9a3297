//! Health/metrics surface: a read-only JSON view over the capture counters.

pub mod server;
pub mod types;

pub use server::HealthServer;
pub use types::HealthStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::types::rfc3339_micros;

/// Read-only health document served at `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
    pub uptime: String,
    pub jobs_captured: u64,
    pub bytes_captured: u64,
    pub active_sessions: usize,
    pub upload_queue: i64,
    pub parse_errors: u64,
}

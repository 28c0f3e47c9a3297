use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::types::rfc3339_micros_opt;

/// Delivery state recorded in a job's `.upload.json` sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Pending,
    Uploaded,
    Failed,
}

/// One-per-job upload progress record, co-located with the job files. The
/// sidecar is flushed after every attempt so a crash never loses progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatus {
    pub job_id: String,
    pub status: UploadState,
    pub attempts: u32,
    #[serde(
        default,
        with = "rfc3339_micros_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_attempt_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(
        default,
        with = "rfc3339_micros_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl UploadStatus {
    pub fn new(job_id: String) -> Self {
        Self {
            job_id,
            status: UploadState::Pending,
            attempts: 0,
            last_attempt_ts: None,
            last_error: None,
            uploaded_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_json_roundtrip() {
        let mut status = UploadStatus::new("0c6f1d2e".into());
        status.status = UploadState::Uploaded;
        status.attempts = 2;
        status.last_attempt_ts = Some(Utc::now());
        status.uploaded_at = Some(Utc::now());

        let json = serde_json::to_string_pretty(&status).unwrap();
        assert!(json.contains("\"status\": \"uploaded\""));

        let parsed: UploadStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, UploadState::Uploaded);
        assert_eq!(parsed.attempts, 2);
        // Serialization truncates to microseconds.
        assert_eq!(
            parsed.last_attempt_ts.unwrap().timestamp_micros(),
            status.last_attempt_ts.unwrap().timestamp_micros()
        );
    }

    #[test]
    fn fresh_status_omits_empty_fields() {
        let json = serde_json::to_string(&UploadStatus::new("j".into())).unwrap();
        assert!(!json.contains("last_attempt_ts"));
        assert!(!json.contains("last_error"));
        assert!(!json.contains("uploaded_at"));
    }
}

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Timestamps persist as RFC-3339 UTC with microsecond precision.
pub mod rfc3339_micros {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Same format for optional timestamps.
pub mod rfc3339_micros_opt {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Protocol label derived from the printer-side destination port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "tcp9100")]
    Tcp9100,
    #[serde(rename = "lpd")]
    Lpd,
}

impl Transport {
    pub fn from_port(port: u16) -> Option<Self> {
        match port {
            9100 => Some(Transport::Tcp9100),
            515 => Some(Transport::Lpd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp9100 => "tcp9100",
            Transport::Lpd => "lpd",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON metadata for a captured print job. This is the on-disk `.json`
/// contract; clients tolerate unknown fields, we never remove known ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub job_id: Uuid,
    pub device_id: String,
    pub site_id: String,
    pub printer_ip: IpAddr,
    pub printer_port: u16,
    pub src_ip: IpAddr,
    #[serde(with = "rfc3339_micros")]
    pub capture_start_ts: DateTime<Utc>,
    #[serde(
        default,
        with = "rfc3339_micros_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub capture_end_ts: Option<DateTime<Utc>>,
    pub byte_len: u64,
    pub sha256: String,
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprint_of_job_id: Option<Uuid>,
}

/// An in-progress or completed print job capture.
///
/// A job is exclusively owned by its session while open and handed to the
/// [`Store`](super::store::Store) once closed. Closing seals the metadata:
/// hash, end timestamp, and length are final.
#[derive(Debug)]
pub struct Job {
    pub metadata: Metadata,
    pub data: Vec<u8>,
    closed: bool,
}

impl Job {
    pub fn new(
        device_id: &str,
        site_id: &str,
        printer_ip: IpAddr,
        printer_port: u16,
        src_ip: IpAddr,
        transport: Transport,
    ) -> Self {
        Self {
            metadata: Metadata {
                job_id: Uuid::new_v4(),
                device_id: device_id.to_owned(),
                site_id: site_id.to_owned(),
                printer_ip,
                printer_port,
                src_ip,
                capture_start_ts: Utc::now(),
                capture_end_ts: None,
                byte_len: 0,
                sha256: String::new(),
                transport,
                tags: Vec::new(),
                reprint_of_job_id: None,
            },
            data: Vec::with_capacity(4096),
            closed: false,
        }
    }

    /// Appends payload bytes. Returns false if the job is already closed.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if self.closed {
            return false;
        }
        self.data.extend_from_slice(data);
        true
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Seals the job: end timestamp, byte length, and SHA-256 over the full
    /// payload. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.metadata.capture_end_ts = Some(Utc::now());
        self.metadata.byte_len = self.data.len() as u64;
        self.metadata.sha256 = hex::encode(Sha256::digest(&self.data));
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The payload hash; empty until the job is closed.
    pub fn hash(&self) -> &str {
        &self.metadata.sha256
    }

    /// Adds a tag, suppressing duplicates.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.metadata.tags.push(tag.to_owned());
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
    }

    /// Marks this job as a reprint of an earlier persisted job.
    pub fn set_reprint_of(&mut self, job_id: Uuid) {
        self.metadata.reprint_of_job_id = Some(job_id);
        self.add_tag("reprint");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        Job::new(
            "dev-1",
            "site-1",
            "192.168.1.50".parse().unwrap(),
            9100,
            "192.168.1.10".parse().unwrap(),
            Transport::Tcp9100,
        )
    }

    #[test]
    fn close_seals_hash_and_length() {
        let mut job = test_job();
        assert!(job.append(b"@PJL\n"));
        assert!(job.append(b"order #42\n"));
        assert!(job.append(b"\x1dVA\n"));
        job.close();

        assert!(job.is_closed());
        assert_eq!(job.metadata.byte_len, 20);
        assert_eq!(
            job.metadata.sha256,
            hex::encode(Sha256::digest(b"@PJL\norder #42\n\x1dVA\n"))
        );
        let end = job.metadata.capture_end_ts.unwrap();
        assert!(job.metadata.capture_start_ts <= end);
    }

    #[test]
    fn append_after_close_is_refused() {
        let mut job = test_job();
        job.append(b"x");
        job.close();
        let sealed_hash = job.metadata.sha256.clone();

        assert!(!job.append(b"y"));
        assert_eq!(job.metadata.byte_len, 1);
        assert_eq!(job.metadata.sha256, sealed_hash);
    }

    #[test]
    fn close_is_idempotent() {
        let mut job = test_job();
        job.append(b"abc");
        job.close();
        let end = job.metadata.capture_end_ts;
        job.close();
        assert_eq!(job.metadata.capture_end_ts, end);
    }

    #[test]
    fn reprint_tag_is_not_duplicated() {
        let mut job = test_job();
        let original = Uuid::new_v4();
        job.set_reprint_of(original);
        job.set_reprint_of(original);
        assert_eq!(job.metadata.reprint_of_job_id, Some(original));
        assert_eq!(job.metadata.tags, vec!["reprint".to_string()]);
    }

    #[test]
    fn metadata_json_roundtrip() {
        let mut job = test_job();
        job.append(b"receipt");
        job.close();
        job.add_tag("reprint");

        let json = serde_json::to_string_pretty(&job.metadata).unwrap();
        assert!(json.contains("\"transport\": \"tcp9100\""));
        assert!(json.contains("\"printer_ip\": \"192.168.1.50\""));

        let parsed: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id, job.metadata.job_id);
        // Serialization truncates to microseconds.
        assert_eq!(
            parsed.capture_start_ts.timestamp_micros(),
            job.metadata.capture_start_ts.timestamp_micros()
        );
        assert_eq!(
            parsed.capture_end_ts.unwrap().timestamp_micros(),
            job.metadata.capture_end_ts.unwrap().timestamp_micros()
        );
        assert_eq!(parsed.sha256, job.metadata.sha256);
    }

    #[test]
    fn timestamps_have_microsecond_precision() {
        let mut job = test_job();
        job.append(b"x");
        job.close();
        let json = serde_json::to_string(&job.metadata).unwrap();
        let start = job
            .metadata
            .capture_start_ts
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        assert!(json.contains(&start));
    }
}

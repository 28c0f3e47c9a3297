use std::time::Duration;

use serde::Deserialize;

/// Packet capture settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture traffic to TCP port 9100 (raw printing).
    pub port_9100_enabled: bool,
    /// Capture traffic to TCP port 515 (LPD).
    pub port_515_enabled: bool,
    /// Silence interval after which an open session is declared complete.
    pub idle_timeout_ms: u64,
    /// Snapshot length passed to the kernel capture.
    pub snap_len: u32,
    pub promiscuous: bool,
    /// Kernel capture buffer size in MiB.
    pub buffer_size_mb: u32,
    /// Create a session on the first payload-bearing packet even without a
    /// prior SYN (tap started mid-flow). `capture_start_ts` then reflects the
    /// first observed payload.
    pub allow_late_start: bool,
    /// Maximum job payload size in bytes; 0 means unbounded. A segment that
    /// would push a job past the cap is discarded and the job is closed with
    /// a `truncated` tag.
    pub max_job_bytes: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            port_9100_enabled: true,
            port_515_enabled: false,
            idle_timeout_ms: 800,
            snap_len: 65535,
            promiscuous: true,
            buffer_size_mb: 8,
            allow_late_start: false,
            max_job_bytes: 0,
        }
    }
}

impl CaptureConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for persisted jobs.
    pub base_path: String,
    /// Minimum free MiB on the base path's filesystem to accept writes.
    pub min_free_mb: u64,
    /// Reprint detector lookup window in seconds.
    pub reprint_window_sec: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: "/var/lib/kitchen-printer-tap".into(),
            min_free_mb: 100,
            reprint_window_sec: 300,
        }
    }
}

/// Webhook upload settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    pub webhook_url: String,
    /// Optional bearer token added as `Authorization: Bearer <token>`.
    pub auth_token: String,
    pub max_retries: u32,
    /// Linear backoff unit: attempt N waits N * retry_backoff_secs.
    pub retry_backoff_secs: u64,
    /// Per-request HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            auth_token: String::new(),
            max_retries: 3,
            retry_backoff_secs: 5,
            timeout_secs: 30,
        }
    }
}

impl UploadConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Health endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:8088".into(),
        }
    }
}

/// Periodic metrics logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

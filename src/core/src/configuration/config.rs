use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::types::{CaptureConfig, HealthConfig, MetricsConfig, StorageConfig, UploadConfig};
use crate::error_handling::types::ConfigError;

/// Top-level daemon configuration.
///
/// Every field has a default; a config file only needs to override what
/// differs from the defaults. `device_id` and `site_id` carry placeholder
/// defaults and are expected to be set per deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of the tap device, embedded in every job.
    pub device_id: String,
    /// Identifier of the site, embedded in every job.
    pub site_id: String,
    /// Capture device name (the Layer-2 bridge). The sentinel `auto` selects
    /// an interface via [`crate::capture::find_interface`].
    pub interface: String,

    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "kptap-001".into(),
            site_id: "site-001".into(),
            interface: "br0".into(),
            capture: CaptureConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            health: HealthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file and validates it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for errors, naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::Invalid("device_id is required".into()));
        }
        if self.site_id.is_empty() {
            return Err(ConfigError::Invalid("site_id is required".into()));
        }
        if self.interface.is_empty() {
            return Err(ConfigError::Invalid("interface is required".into()));
        }
        if !self.capture.port_9100_enabled && !self.capture.port_515_enabled {
            return Err(ConfigError::Invalid(
                "at least one capture port must be enabled".into(),
            ));
        }
        if self.capture.idle_timeout_ms < 100 {
            return Err(ConfigError::Invalid(
                "capture.idle_timeout_ms must be at least 100".into(),
            ));
        }
        if self.storage.base_path.is_empty() {
            return Err(ConfigError::Invalid("storage.base_path is required".into()));
        }
        if self.upload.enabled && self.upload.webhook_url.is_empty() {
            return Err(ConfigError::Invalid(
                "upload.webhook_url is required when upload is enabled".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.interface, "br0");
        assert!(config.capture.port_9100_enabled);
        assert!(!config.capture.port_515_enabled);
        assert_eq!(config.capture.idle_timeout_ms, 800);
        assert_eq!(config.storage.min_free_mb, 100);
        assert!(!config.upload.enabled);
    }

    #[test]
    fn from_file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
device_id = "tap-kitchen-7"
site_id = "bistro-42"

[capture]
port_515_enabled = true
idle_timeout_ms = 1200

[upload]
enabled = true
webhook_url = "https://example.test/hook"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.device_id, "tap-kitchen-7");
        assert_eq!(config.site_id, "bistro-42");
        assert!(config.capture.port_9100_enabled);
        assert!(config.capture.port_515_enabled);
        assert_eq!(config.capture.idle_timeout_ms, 1200);
        assert_eq!(config.upload.webhook_url, "https://example.test/hook");
        // Untouched sections keep their defaults.
        assert_eq!(config.storage.base_path, "/var/lib/kitchen-printer-tap");
        assert_eq!(config.upload.max_retries, 3);
    }

    #[test]
    fn rejects_missing_ports() {
        let mut config = Config::default();
        config.capture.port_9100_enabled = false;
        config.capture.port_515_enabled = false;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capture port"));
    }

    #[test]
    fn rejects_short_idle_timeout() {
        let mut config = Config::default();
        config.capture.idle_timeout_ms = 50;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle_timeout_ms"));
    }

    #[test]
    fn rejects_upload_without_url() {
        let mut config = Config::default();
        config.upload.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("webhook_url"));
    }

    #[test]
    fn rejects_empty_identifiers() {
        let mut config = Config::default();
        config.device_id.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.site_id.clear();
        assert!(config.validate().is_err());
    }
}

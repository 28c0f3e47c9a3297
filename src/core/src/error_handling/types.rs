use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, err) => {
                write!(f, "reading config file {}: {}", path.display(), err)
            }
            ConfigError::Parse(path, err) => {
                write!(f, "parsing config file {}: {}", path.display(), err)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum CaptureError {
    OpenDevice(String, pcap::Error),
    SetFilter(String, pcap::Error),
    ListDevices(pcap::Error),
    NoInterface,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::OpenDevice(iface, err) => {
                write!(f, "opening interface {}: {}", iface, err)
            }
            CaptureError::SetFilter(filter, err) => {
                write!(f, "setting BPF filter {:?}: {}", filter, err)
            }
            CaptureError::ListDevices(err) => write!(f, "listing capture devices: {}", err),
            CaptureError::NoInterface => write!(f, "no suitable capture interface found"),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum StoreError {
    UnclosedJob,
    InsufficientSpace { available_mb: u64, min_free_mb: u64 },
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnclosedJob => write!(f, "cannot save unclosed job"),
            StoreError::InsufficientSpace {
                available_mb,
                min_free_mb,
            } => write!(
                f,
                "insufficient disk space: {} MB available, {} MB required",
                available_mb, min_free_mb
            ),
            StoreError::Io(err) => write!(f, "IO error: {}", err),
            StoreError::Serialize(err) => write!(f, "marshaling metadata: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialize(err)
    }
}

#[derive(Debug)]
pub enum UploadError {
    Io(std::io::Error),
    Metadata(serde_json::Error),
    Http(reqwest::Error),
    Status(u16, String),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Io(err) => write!(f, "IO error: {}", err),
            UploadError::Metadata(err) => write!(f, "parsing metadata: {}", err),
            UploadError::Http(err) => write!(f, "sending request: {}", err),
            UploadError::Status(code, body) => {
                write!(f, "upload failed: status {}, body: {}", code, body)
            }
        }
    }
}

impl std::error::Error for UploadError {}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Io(err)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Http(err)
    }
}

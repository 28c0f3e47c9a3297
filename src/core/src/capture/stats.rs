use std::sync::atomic::AtomicU64;

/// Capture counters, shared with the health view. Monotonic for the lifetime
/// of the process.
#[derive(Debug, Default)]
pub struct Stats {
    pub jobs_captured: AtomicU64,
    pub bytes_captured: AtomicU64,
    pub parse_errors: AtomicU64,
}

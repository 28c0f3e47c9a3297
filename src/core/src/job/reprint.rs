use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use log::debug;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One recorded hash observation.
#[derive(Debug, Clone)]
struct HashEntry {
    job_id: Uuid,
    printer_ip: IpAddr,
    timestamp: DateTime<Utc>,
}

/// Short-window fingerprint index over `(sha256, printer_ip)`.
///
/// Entries older than the window are invisible to lookups; entries older
/// than twice the window are swept out. Hashes are recorded only after a
/// successful save, so a failed persist cannot poison future detection.
pub struct ReprintDetector {
    window: Duration,
    hashes: Mutex<HashMap<String, Vec<HashEntry>>>,
}

impl ReprintDetector {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the job ID of a previous job with the same hash to the same
    /// printer within the window, if any.
    pub fn check(&self, hash: &str, printer_ip: IpAddr) -> Option<Uuid> {
        let hashes = self.hashes.lock().unwrap();
        let entries = hashes.get(hash)?;

        let now = Utc::now();
        entries
            .iter()
            .find(|e| e.printer_ip == printer_ip && now - e.timestamp <= self.window)
            .map(|e| e.job_id)
    }

    /// Records a job hash for future reprint detection.
    pub fn record(&self, hash: &str, printer_ip: IpAddr, job_id: Uuid) {
        self.record_at(hash, printer_ip, job_id, Utc::now());
    }

    fn record_at(&self, hash: &str, printer_ip: IpAddr, job_id: Uuid, timestamp: DateTime<Utc>) {
        let mut hashes = self.hashes.lock().unwrap();
        hashes.entry(hash.to_owned()).or_default().push(HashEntry {
            job_id,
            printer_ip,
            timestamp,
        });
    }

    /// Drops entries older than twice the window and empty buckets.
    pub fn sweep(&self) {
        let mut hashes = self.hashes.lock().unwrap();
        let now = Utc::now();
        let ttl = self.window * 2;

        hashes.retain(|_, entries| {
            entries.retain(|e| now - e.timestamp <= ttl);
            !entries.is_empty()
        });
    }

    /// Background sweep loop, ticking every `2 * window`.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = (self.window * 2)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(600));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; consume the first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("reprint sweeper stopping");
                    return;
                }
                _ = ticker.tick() => self.sweep(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRINTER: &str = "192.168.1.50";

    #[test]
    fn detects_reprint_within_window() {
        let detector = ReprintDetector::new(300);
        let printer: IpAddr = PRINTER.parse().unwrap();
        let original = Uuid::new_v4();

        detector.record("abc123", printer, original);
        assert_eq!(detector.check("abc123", printer), Some(original));
    }

    #[test]
    fn different_printer_is_not_a_reprint() {
        let detector = ReprintDetector::new(300);
        let printer: IpAddr = PRINTER.parse().unwrap();
        let other: IpAddr = "192.168.1.51".parse().unwrap();

        detector.record("abc123", printer, Uuid::new_v4());
        assert_eq!(detector.check("abc123", other), None);
    }

    #[test]
    fn unknown_hash_is_not_a_reprint() {
        let detector = ReprintDetector::new(300);
        let printer: IpAddr = PRINTER.parse().unwrap();
        assert_eq!(detector.check("never-seen", printer), None);
    }

    #[test]
    fn entries_outside_window_are_invisible() {
        let detector = ReprintDetector::new(300);
        let printer: IpAddr = PRINTER.parse().unwrap();

        let stale = Utc::now() - Duration::seconds(301);
        detector.record_at("abc123", printer, Uuid::new_v4(), stale);
        assert_eq!(detector.check("abc123", printer), None);
    }

    #[test]
    fn first_match_wins_with_multiple_entries() {
        let detector = ReprintDetector::new(300);
        let printer: IpAddr = PRINTER.parse().unwrap();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        detector.record_at("abc123", printer, first, Utc::now() - Duration::seconds(10));
        detector.record("abc123", printer, second);
        assert_eq!(detector.check("abc123", printer), Some(first));
    }

    #[test]
    fn sweep_evicts_beyond_double_window() {
        let detector = ReprintDetector::new(300);
        let printer: IpAddr = PRINTER.parse().unwrap();

        detector.record_at(
            "old",
            printer,
            Uuid::new_v4(),
            Utc::now() - Duration::seconds(601),
        );
        detector.record("fresh", printer, Uuid::new_v4());
        detector.sweep();

        let hashes = detector.hashes.lock().unwrap();
        assert!(!hashes.contains_key("old"));
        assert!(hashes.contains_key("fresh"));
    }

    #[test]
    fn sweep_keeps_entries_between_window_and_double_window() {
        // Invisible to lookups but not yet evictable.
        let detector = ReprintDetector::new(300);
        let printer: IpAddr = PRINTER.parse().unwrap();

        detector.record_at(
            "mid",
            printer,
            Uuid::new_v4(),
            Utc::now() - Duration::seconds(400),
        );
        detector.sweep();

        assert_eq!(detector.check("mid", printer), None);
        assert!(detector.hashes.lock().unwrap().contains_key("mid"));
    }
}

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info};
use tokio::sync::broadcast;
use warp::Filter;

use super::types::HealthStatus;
use crate::capture::capturer::Capturer;
use crate::capture::stats::Stats;
use crate::configuration::types::HealthConfig;
use crate::upload::uploader::Uploader;

/// Serves counter snapshots over HTTP. Strictly read-only: the handler takes
/// the session gauge under the session lock and loads the atomics, nothing
/// else.
pub struct HealthServer {
    config: HealthConfig,
    started_at: Instant,
    stats: Arc<Stats>,
    capturer: Arc<Capturer>,
    uploader: Arc<Uploader>,
}

impl HealthServer {
    pub fn new(
        config: HealthConfig,
        stats: Arc<Stats>,
        capturer: Arc<Capturer>,
        uploader: Arc<Uploader>,
    ) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            stats,
            capturer,
            uploader,
        }
    }

    /// Snapshot of all counters and gauges.
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".into(),
            timestamp: Utc::now(),
            uptime: format_uptime(self.started_at.elapsed()),
            jobs_captured: self.stats.jobs_captured.load(Ordering::Relaxed),
            bytes_captured: self.stats.bytes_captured.load(Ordering::Relaxed),
            active_sessions: self.capturer.active_sessions(),
            upload_queue: self.uploader.queue_depth(),
            parse_errors: self.stats.parse_errors.load(Ordering::Relaxed),
        }
    }

    /// Serves `GET /health` until shutdown. A bind failure is logged and
    /// tolerated; the tap keeps capturing without its health surface.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("health endpoint disabled");
            return;
        }
        let addr: SocketAddr = match self.config.address.parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!("invalid health address {:?}: {}", self.config.address, e);
                return;
            }
        };

        let this = Arc::clone(&self);
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || warp::reply::json(&this.status()));

        match warp::serve(health).try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown.recv().await;
        }) {
            Ok((bound, server)) => {
                info!("health server started address={}", bound);
                server.await;
            }
            Err(e) => error!("health server failed to bind {}: {}", addr, e),
        }
    }
}

/// `1h2m3s`-style uptime, rounded to seconds.
fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;
    use crate::configuration::types::UploadConfig;
    use crate::job::reprint::ReprintDetector;
    use crate::job::store::Store;
    use tempfile::TempDir;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m5s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h2m3s");
        assert_eq!(format_uptime(Duration::from_millis(900)), "0s");
    }

    #[tokio::test]
    async fn status_reflects_counters() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let store = Arc::new(Store::new(dir.path(), 0).unwrap());
        let reprint = Arc::new(ReprintDetector::new(300));
        let stats = Arc::new(Stats::default());
        let uploader = Arc::new(Uploader::new(UploadConfig::default(), dir.path()).unwrap());
        let capturer = Arc::new(Capturer::new(
            config.clone(),
            store,
            reprint,
            Arc::clone(&stats),
            Some(Arc::clone(&uploader)),
        ));

        stats.jobs_captured.store(3, Ordering::Relaxed);
        stats.bytes_captured.store(4096, Ordering::Relaxed);

        let server = HealthServer::new(config.health, stats, capturer, uploader);
        let status = server.status();
        assert_eq!(status.status, "ok");
        assert_eq!(status.jobs_captured, 3);
        assert_eq!(status.bytes_captured, 4096);
        assert_eq!(status.active_sessions, 0);
        assert_eq!(status.upload_queue, 0);
        assert_eq!(status.parse_errors, 0);

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"jobs_captured\":3"));
        assert!(json.contains("\"uptime\""));
    }
}

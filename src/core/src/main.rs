use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use kptap::capture::{find_interface, Capturer, PacketSource, Stats};
use kptap::configuration::Config;
use kptap::health::HealthServer;
use kptap::job::{ReprintDetector, Store};
use kptap::upload::Uploader;

#[derive(Parser)]
#[command(name = "kptapd")]
#[command(version)]
#[command(about = "Passive in-line tap for kitchen printer traffic")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "/etc/kitchen-printer-tap/config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();
    info!(
        "starting kptapd version {} config {}",
        env!("CARGO_PKG_VERSION"),
        args.config
    );

    let config = match Config::from_file(Path::new(&args.config)) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "configuration loaded device_id={} site_id={} interface={} port_9100={} port_515={}",
        config.device_id,
        config.site_id,
        config.interface,
        config.capture.port_9100_enabled,
        config.capture.port_515_enabled
    );

    let interface = if config.interface == "auto" {
        match find_interface() {
            Ok(name) => {
                info!("auto-selected capture interface {}", name);
                name
            }
            Err(e) => {
                error!("interface auto-discovery failed: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        config.interface.clone()
    };

    let store = match Store::new(&config.storage.base_path, config.storage.min_free_mb) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to initialize store: {}", e);
            std::process::exit(1);
        }
    };

    let reprint = Arc::new(ReprintDetector::new(config.storage.reprint_window_sec));
    let stats = Arc::new(Stats::default());

    let uploader = match Uploader::new(config.upload.clone(), &config.storage.base_path) {
        Ok(uploader) => Arc::new(uploader),
        Err(e) => {
            error!("failed to initialize uploader: {}", e);
            std::process::exit(1);
        }
    };

    let capturer = Arc::new(Capturer::new(
        config.clone(),
        Arc::clone(&store),
        Arc::clone(&reprint),
        Arc::clone(&stats),
        Some(Arc::clone(&uploader)),
    ));

    // Opening the interface and installing the filter are the last fatal
    // steps; from here on, per-packet and per-job errors never terminate.
    let source = match PacketSource::open(&interface, &config.capture) {
        Ok(source) => source,
        Err(e) => {
            error!("failed to start capture: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Packet loop on a dedicated thread: libpcap reads block indefinitely.
    // After shutdown the loop discards packets; the thread dies with the
    // process.
    {
        let capturer = Arc::clone(&capturer);
        std::thread::spawn(move || capturer.run_capture_loop(source));
    }

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(tokio::spawn(
        Arc::clone(&capturer).run_timeout_sweeper(shutdown_tx.subscribe()),
    ));
    tasks.push(tokio::spawn(
        Arc::clone(&reprint).run_sweeper(shutdown_tx.subscribe()),
    ));
    tasks.push(tokio::spawn(
        Arc::clone(&uploader).run(shutdown_tx.subscribe()),
    ));

    // Startup recovery: re-discover jobs a previous run never delivered.
    {
        let uploader = Arc::clone(&uploader);
        let _ = tokio::task::spawn_blocking(move || uploader.scan_pending());
    }

    let health = Arc::new(HealthServer::new(
        config.health.clone(),
        Arc::clone(&stats),
        Arc::clone(&capturer),
        Arc::clone(&uploader),
    ));
    tasks.push(tokio::spawn(
        Arc::clone(&health).run(shutdown_tx.subscribe()),
    ));

    if config.metrics.enabled {
        tasks.push(tokio::spawn(metrics_loop(
            config.metrics.interval(),
            Arc::clone(&stats),
            Arc::clone(&capturer),
            Arc::clone(&uploader),
            shutdown_tx.subscribe(),
        )));
    }

    info!(
        "kptapd running health_endpoint=http://{}/health",
        config.health.address
    );

    wait_for_signal().await;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    // Drain the session table: every open session is finalized for
    // best-effort persistence of in-flight jobs.
    capturer.shutdown();

    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!("task did not stop within 5s");
        }
    }

    info!(
        "kptapd stopped jobs_captured={} bytes_captured={}",
        stats.jobs_captured.load(Ordering::Relaxed),
        stats.bytes_captured.load(Ordering::Relaxed)
    );
}

async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("failed to install SIGTERM handler: {}", e);
            // Fall back to SIGINT only.
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for shutdown signal: {}", e);
            }
        }
        _ = sigterm.recv() => {}
    }
}

async fn metrics_loop(
    interval: Duration,
    stats: Arc<Stats>,
    capturer: Arc<Capturer>,
    uploader: Arc<Uploader>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // interval fires immediately; skip the startup tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                info!(
                    "metrics jobs_captured={} bytes_captured={} upload_queue={} active_sessions={} parse_errors={}",
                    stats.jobs_captured.load(Ordering::Relaxed),
                    stats.bytes_captured.load(Ordering::Relaxed),
                    uploader.queue_depth(),
                    capturer.active_sessions(),
                    stats.parse_errors.load(Ordering::Relaxed)
                );
            }
        }
    }
}

//! Store-and-forward webhook delivery.
//!
//! Jobs are addressed by their extension-less base path. A bounded in-memory
//! queue feeds one worker; the startup recovery scan re-discovers anything
//! the queue dropped or a previous process never finished. Each job gets at
//! most `max_retries` sends per run with linear backoff, progress flushed to
//! the `.upload.json` sidecar after every attempt.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::multipart;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use super::types::{UploadState, UploadStatus};
use crate::configuration::types::UploadConfig;
use crate::error_handling::types::UploadError;
use crate::job::types::Metadata;

const QUEUE_CAPACITY: usize = 1000;
const SIDECAR_MODE: u32 = 0o640;
const ERROR_BODY_LIMIT: usize = 1024;

pub struct Uploader {
    config: UploadConfig,
    base_path: PathBuf,
    client: reqwest::Client,
    tx: mpsc::Sender<PathBuf>,
    rx: Mutex<Option<mpsc::Receiver<PathBuf>>>,
    queue_depth: AtomicI64,
}

impl Uploader {
    pub fn new<P: AsRef<Path>>(config: UploadConfig, base_path: P) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        Ok(Self {
            config,
            base_path: base_path.as_ref().to_path_buf(),
            client,
            tx,
            rx: Mutex::new(Some(rx)),
            queue_depth: AtomicI64::new(0),
        })
    }

    /// Queues a job base path for upload. Non-blocking: a full queue drops
    /// with a warning, the recovery scan will find the job again.
    pub fn enqueue(&self, base: PathBuf) {
        if !self.config.enabled {
            return;
        }
        match self.tx.try_send(base) {
            Ok(()) => {
                self.queue_depth.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(base)) => {
                warn!("upload queue full, dropping job path {}", base.display());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Walks the storage tree and enqueues every job whose sidecar is still
    /// `pending`. Jobs marked `failed` are left for manual remediation.
    pub fn scan_pending(&self) {
        if !self.config.enabled {
            return;
        }
        let mut found = 0;
        self.scan_dir(&self.base_path.clone(), &mut found);
        info!("upload recovery scan enqueued {} job(s)", found);
    }

    /// Worker loop: dequeue, deliver, repeat until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("upload disabled");
            return;
        }
        let mut rx = match self.rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };
        info!("upload worker started webhook_url={}", self.config.webhook_url);

        loop {
            let base = tokio::select! {
                _ = shutdown.recv() => return,
                base = rx.recv() => match base {
                    Some(base) => base,
                    None => return,
                },
            };
            self.queue_depth.fetch_sub(1, Ordering::Relaxed);
            self.process_job(&base, &mut shutdown).await;
        }
    }

    /// Delivers one job, updating its sidecar after every attempt. A shutdown
    /// signal cancels the in-flight request and preserves sidecar state.
    async fn process_job(&self, base: &Path, shutdown: &mut broadcast::Receiver<()>) {
        let bin_path = path_with_suffix(base, ".bin");
        let json_path = path_with_suffix(base, ".json");
        let status_path = sidecar_path(base);

        let mut status = load_or_create_status(&status_path, base);
        if status.status == UploadState::Uploaded {
            debug!("job {} already uploaded, skipping", status.job_id);
            return;
        }

        let meta: Metadata = match fs::read(&json_path)
            .map_err(UploadError::from)
            .and_then(|b| serde_json::from_slice(&b).map_err(UploadError::Metadata))
        {
            Ok(meta) => meta,
            Err(e) => {
                error!("failed to read metadata {}: {}", json_path.display(), e);
                return;
            }
        };
        let bin_data = match fs::read(&bin_path) {
            Ok(b) => b,
            Err(e) => {
                error!("failed to read payload {}: {}", bin_path.display(), e);
                return;
            }
        };

        let mut last_error: Option<UploadError> = None;
        for attempt in 1..=self.config.max_retries {
            status.attempts += 1;
            status.last_attempt_ts = Some(Utc::now());

            let result = tokio::select! {
                _ = shutdown.recv() => {
                    save_status(&status_path, &status);
                    return;
                }
                result = self.send(&meta, bin_data.clone()) => result,
            };

            match result {
                Ok(()) => {
                    status.status = UploadState::Uploaded;
                    status.uploaded_at = Some(Utc::now());
                    save_status(&status_path, &status);
                    info!(
                        "job uploaded job_id={} attempts={}",
                        meta.job_id, status.attempts
                    );
                    return;
                }
                Err(e) => {
                    status.last_error = Some(e.to_string());
                    save_status(&status_path, &status);
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        let backoff = self.config.retry_backoff() * attempt;
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }

        status.status = UploadState::Failed;
        save_status(&status_path, &status);
        error!(
            "job upload failed job_id={} attempts={} error={}",
            meta.job_id,
            status.attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        );
    }

    /// One POST: multipart form with the metadata JSON and the raw payload.
    async fn send(&self, meta: &Metadata, bin_data: Vec<u8>) -> Result<(), UploadError> {
        let meta_json = serde_json::to_string(meta).map_err(UploadError::Metadata)?;
        let payload =
            multipart::Part::bytes(bin_data).file_name(format!("{}.bin", meta.job_id));
        let form = multipart::Form::new()
            .text("metadata", meta_json)
            .part("payload", payload);

        let mut request = self.client.post(&self.config.webhook_url).multipart(form);
        if !self.config.auth_token.is_empty() {
            request = request.bearer_auth(&self.config.auth_token);
        }

        let response = request.send().await?;
        let code = response.status();
        if !code.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = if body.len() > ERROR_BODY_LIMIT {
                String::from_utf8_lossy(&body.as_bytes()[..ERROR_BODY_LIMIT]).into_owned()
            } else {
                body
            };
            return Err(UploadError::Status(code.as_u16(), body));
        }
        Ok(())
    }

    fn scan_dir(&self, dir: &Path, found: &mut usize) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("recovery scan cannot read {}: {}", dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.scan_dir(&path, found);
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.ends_with(".json") || name.ends_with(".upload.json") {
                continue;
            }

            let base = path.with_extension("");
            let status = load_or_create_status(&sidecar_path(&base), &base);
            if status.status == UploadState::Pending {
                self.enqueue(base);
                *found += 1;
            }
        }
    }
}

fn path_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn sidecar_path(base: &Path) -> PathBuf {
    path_with_suffix(base, ".upload.json")
}

fn load_or_create_status(status_path: &Path, base: &Path) -> UploadStatus {
    if let Ok(data) = fs::read(status_path) {
        if let Ok(status) = serde_json::from_slice(&data) {
            return status;
        }
    }
    let job_id = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    UploadStatus::new(job_id)
}

fn save_status(status_path: &Path, status: &UploadStatus) {
    let result = serde_json::to_vec_pretty(status).map_err(UploadError::Metadata).and_then(|data| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(SIDECAR_MODE)
            .open(status_path)?;
        file.write_all(&data)?;
        Ok(())
    });
    if let Err(e) = result {
        warn!("failed to write sidecar {}: {}", status_path.display(), e);
    }
}

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use sysinfo::Disks;
use uuid::Uuid;

use super::types::Job;
use crate::error_handling::types::StoreError;

const DIR_MODE: u32 = 0o750;
const FILE_MODE: u32 = 0o640;

/// Crash-safe persistence of closed jobs.
///
/// Jobs land under `<base>/YYYY/MM/DD/<job_id>.{bin,json}`, the date taken
/// from `capture_start_ts` in UTC. Both files are written via
/// write-tmp/fsync/rename so a partial write never becomes visible. A single
/// writer lock serializes saves, keeping the free-space gate race-free.
pub struct Store {
    base_path: PathBuf,
    min_free_mb: u64,
    writer: Mutex<()>,
}

impl Store {
    pub fn new<P: AsRef<Path>>(base_path: P, min_free_mb: u64) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&base_path)?;

        Ok(Self {
            base_path,
            min_free_mb,
            writer: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// The extension-less base path a job's files live under.
    pub fn job_base_path(&self, job_id: Uuid, ts: DateTime<Utc>) -> PathBuf {
        self.date_dir(ts).join(job_id.to_string())
    }

    /// Persists a closed job atomically and returns its base path.
    ///
    /// Takes ownership: on success the caller addresses the job by path only;
    /// on error the job is dropped (the capture loop logs and moves on).
    pub fn save(&self, job: Job) -> Result<PathBuf, StoreError> {
        let _guard = self.writer.lock().unwrap();

        if !job.is_closed() {
            return Err(StoreError::UnclosedJob);
        }

        if let Some(available_mb) = self.available_mb() {
            if !free_space_ok(available_mb, self.min_free_mb) {
                return Err(StoreError::InsufficientSpace {
                    available_mb,
                    min_free_mb: self.min_free_mb,
                });
            }
        }

        let dir = self.date_dir(job.metadata.capture_start_ts);
        DirBuilder::new().recursive(true).mode(DIR_MODE).create(&dir)?;

        let base = dir.join(job.metadata.job_id.to_string());
        let bin_path = base.with_extension("bin");
        let json_path = base.with_extension("json");

        write_file_atomic(&bin_path, &job.data)?;

        let meta_bytes = match serde_json::to_vec_pretty(&job.metadata) {
            Ok(b) => b,
            Err(e) => {
                let _ = fs::remove_file(&bin_path);
                return Err(e.into());
            }
        };
        if let Err(e) = write_file_atomic(&json_path, &meta_bytes) {
            let _ = fs::remove_file(&bin_path);
            return Err(e);
        }

        debug!(
            "saved job {} ({} bytes) under {}",
            job.metadata.job_id,
            job.metadata.byte_len,
            dir.display()
        );
        Ok(base)
    }

    fn date_dir(&self, ts: DateTime<Utc>) -> PathBuf {
        self.base_path
            .join(ts.format("%Y").to_string())
            .join(ts.format("%m").to_string())
            .join(ts.format("%d").to_string())
    }

    /// Free space on the filesystem holding the base path, in MiB. `None`
    /// when the mount cannot be resolved; the save then proceeds.
    fn available_mb(&self) -> Option<u64> {
        let probe = self.base_path.canonicalize().ok()?;
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| probe.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());
        match disk {
            Some(d) => Some(d.available_space() / (1024 * 1024)),
            None => {
                warn!(
                    "no mount found for {}; skipping free-space check",
                    probe.display()
                );
                None
            }
        }
    }
}

/// Free space exactly at the floor is acceptable.
fn free_space_ok(available_mb: u64, min_free_mb: u64) -> bool {
    available_mb >= min_free_mb
}

/// Write-tmp/fsync/rename. The temporary file is removed on any failure so a
/// partial write leaves nothing behind.
fn write_file_atomic(final_path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp_path = tmp_name(final_path);
    match write_and_rename(&tmp_path, final_path, data) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e.into())
        }
    }
}

fn write_and_rename(tmp_path: &Path, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, final_path)
}

fn tmp_name(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::types::{Metadata, Transport};
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn closed_job(payload: &[u8]) -> Job {
        let mut job = Job::new(
            "dev-1",
            "site-1",
            "192.168.1.50".parse().unwrap(),
            9100,
            "192.168.1.10".parse().unwrap(),
            Transport::Tcp9100,
        );
        job.append(payload);
        job.close();
        job
    }

    #[test]
    fn save_writes_bin_and_json() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), 0).unwrap();

        let job = closed_job(b"order #42\n");
        let job_id = job.metadata.job_id;
        let expected_sha = job.metadata.sha256.clone();
        let base = store.save(job).unwrap();

        let bin = fs::read(base.with_extension("bin")).unwrap();
        assert_eq!(bin, b"order #42\n");
        assert_eq!(hex::encode(Sha256::digest(&bin)), expected_sha);

        let meta: Metadata =
            serde_json::from_slice(&fs::read(base.with_extension("json")).unwrap()).unwrap();
        assert_eq!(meta.job_id, job_id);
        assert_eq!(meta.byte_len, bin.len() as u64);
        assert_eq!(meta.sha256, expected_sha);
    }

    #[test]
    fn save_uses_utc_date_layout() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), 0).unwrap();

        let job = closed_job(b"x");
        let ts = job.metadata.capture_start_ts;
        let base = store.save(job).unwrap();

        let expected = dir
            .path()
            .join(ts.format("%Y").to_string())
            .join(ts.format("%m").to_string())
            .join(ts.format("%d").to_string());
        assert_eq!(base.parent().unwrap(), expected);
    }

    #[test]
    fn save_rejects_unclosed_job() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), 0).unwrap();

        let mut job = Job::new(
            "dev-1",
            "site-1",
            "192.168.1.50".parse().unwrap(),
            9100,
            "192.168.1.10".parse().unwrap(),
            Transport::Tcp9100,
        );
        job.append(b"x");

        match store.save(job) {
            Err(StoreError::UnclosedJob) => {}
            other => panic!("expected UnclosedJob, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn free_space_floor_is_inclusive() {
        assert!(free_space_ok(101, 100));
        assert!(free_space_ok(100, 100));
        assert!(!free_space_ok(99, 100));
    }

    #[test]
    fn failed_save_leaves_no_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), 0).unwrap();

        // A file squatting on the year directory makes the save fail
        // regardless of privileges.
        let job = closed_job(b"x");
        let year = job.metadata.capture_start_ts.format("%Y").to_string();
        fs::write(dir.path().join(&year), b"in the way").unwrap();

        assert!(store.save(job).is_err());
        assert!(fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .all(|e| e.path().extension().is_none()));
    }

    #[test]
    fn no_tmp_files_survive_a_save() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), 0).unwrap();
        let base = store.save(closed_job(b"payload")).unwrap();

        for entry in fs::read_dir(base.parent().unwrap()).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(
                !name.to_string_lossy().ends_with(".tmp"),
                "leftover tmp file: {:?}",
                name
            );
        }
    }

    #[test]
    fn job_base_path_matches_save_location() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path(), 0).unwrap();

        let job = closed_job(b"x");
        let job_id = job.metadata.job_id;
        let ts = job.metadata.capture_start_ts;
        let base = store.save(job).unwrap();

        assert_eq!(base, store.job_base_path(job_id, ts));
    }
}

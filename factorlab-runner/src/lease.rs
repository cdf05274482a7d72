//! Singleton heartbeat lease.
//!
//! A JSON lease file marks the single live optimizer for a state directory.
//! It is renewed by a heartbeat thread every `ttl / 3` and removed on clean
//! exit. A lease whose `renewed_at + ttl` lies in the past is stale: its
//! holder died without cleaning up, and the next acquirer replaces it.
//!
//! Every read-modify-write of the lease file (acquire, renew, release) runs
//! under an OS advisory lock on a sibling `.lock` file, so two processes
//! replacing the same stale lease cannot both succeed. The kernel drops the
//! advisory lock when its holder dies; liveness is still judged by the
//! heartbeat timestamp alone.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::report::write_atomic;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease held by '{holder}' (renewed {renewed_at})")]
    LockConflict {
        holder: String,
        renewed_at: DateTime<Utc>,
    },
    #[error("lease on {path} is no longer held by '{holder}'")]
    Lost { path: PathBuf, holder: String },
    #[error("lease I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl LeaseRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.renewed_at + ChronoDuration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() < now
    }
}

// ─── Lease file ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LeaseFile {
    path: PathBuf,
}

impl LeaseFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lease, if any. An unparseable file reads as `None`.
    pub fn read(&self) -> Result<Option<LeaseRecord>, LeaseError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io(e)),
        }
    }

    /// Take the lease or fail with `LockConflict` if a live holder has it.
    pub fn acquire(&self, holder: &str, ttl_secs: u64) -> Result<LeaseRecord, LeaseError> {
        let _section = self.exclusive()?;
        let now = Utc::now();
        match self.read()? {
            Some(existing) if !existing.is_stale(now) => {
                return Err(LeaseError::LockConflict {
                    holder: existing.holder,
                    renewed_at: existing.renewed_at,
                });
            }
            stale if self.path.exists() => warn!(
                previous = ?stale.map(|s| s.holder),
                path = %self.path.display(),
                "discarding stale lease"
            ),
            _ => {}
        }
        let record = LeaseRecord {
            holder: holder.to_string(),
            acquired_at: now,
            renewed_at: now,
            ttl_secs,
        };
        self.write(&record)?;
        info!(holder, ttl_secs, path = %self.path.display(), "lease acquired");
        Ok(record)
    }

    /// Push `renewed_at` forward; fails with `Lost` if another holder owns the file.
    pub fn renew(&self, holder: &str) -> Result<LeaseRecord, LeaseError> {
        let _section = self.exclusive()?;
        let mut record = match self.read()? {
            Some(r) if r.holder == holder => r,
            _ => return Err(self.lost(holder)),
        };
        record.renewed_at = Utc::now();
        self.write(&record)?;
        Ok(record)
    }

    /// Remove the lease if `holder` still owns it.
    pub fn release(&self, holder: &str) -> Result<(), LeaseError> {
        let _section = self.exclusive()?;
        match self.read()? {
            Some(r) if r.holder == holder => match fs::remove_file(&self.path) {
                Ok(()) => {
                    info!(holder, "lease released");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io(e)),
            },
            _ => Ok(()),
        }
    }

    /// `Ok` while `holder` owns the lease file.
    pub fn check(&self, holder: &str) -> Result<(), LeaseError> {
        match self.read()? {
            Some(r) if r.holder == holder => Ok(()),
            _ => Err(self.lost(holder)),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Block until this process holds the advisory lock. Released on drop.
    fn exclusive(&self) -> Result<File, LeaseError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| self.io(e))?;
        file.lock_exclusive().map_err(|e| self.io(e))?;
        Ok(file)
    }

    fn write(&self, record: &LeaseRecord) -> Result<(), LeaseError> {
        let json = serde_json::to_string(record)
            .map_err(|e| self.io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| self.io(e))
    }

    fn lost(&self, holder: &str) -> LeaseError {
        LeaseError::Lost {
            path: self.path.clone(),
            holder: holder.to_string(),
        }
    }

    fn io(&self, source: io::Error) -> LeaseError {
        LeaseError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

// ─── Guard + heartbeat ──────────────────────────────────────────────

/// A held lease. Renewed in the background; released on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    file: LeaseFile,
    record: LeaseRecord,
    stop: Arc<AtomicBool>,
    /// Set once the lease is seen in another holder's hands.
    lost: Arc<AtomicBool>,
    heartbeat: Option<JoinHandle<()>>,
}

impl LeaseGuard {
    /// Acquire the lease and start its heartbeat thread.
    pub fn acquire(path: impl Into<PathBuf>, holder: &str, ttl_secs: u64) -> Result<Self, LeaseError> {
        let file = LeaseFile::new(path);
        let record = file.acquire(holder, ttl_secs)?;
        let stop = Arc::new(AtomicBool::new(false));
        let lost = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis((ttl_secs.saturating_mul(1000) / 3).max(1));

        let heartbeat = {
            let file = file.clone();
            let holder = holder.to_string();
            let stop = Arc::clone(&stop);
            let lost = Arc::clone(&lost);
            thread::Builder::new()
                .name("factorlab-heartbeat".into())
                .spawn(move || heartbeat_loop(&file, &holder, interval, &stop, &lost))
        };
        let heartbeat = match heartbeat {
            Ok(handle) => handle,
            Err(e) => {
                let _ = file.release(holder);
                return Err(file.io(e));
            }
        };

        Ok(Self {
            file,
            record,
            stop,
            lost,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn holder(&self) -> &str {
        &self.record.holder
    }

    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }

    /// Fails with `Lost` once another holder has taken the lease over.
    ///
    /// Checks the file itself as well as the heartbeat's flag, so a takeover
    /// between two renewals is still seen before the next write.
    pub fn ensure_held(&self) -> Result<(), LeaseError> {
        if self.is_lost() {
            return Err(self.file.lost(&self.record.holder));
        }
        match self.file.check(&self.record.holder) {
            Err(e @ LeaseError::Lost { .. }) => {
                self.lost.store(true, Ordering::Relaxed);
                Err(e)
            }
            other => other,
        }
    }

    /// Stop the heartbeat and remove the lease file.
    pub fn release(mut self) -> Result<(), LeaseError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), LeaseError> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
            return self.file.release(&self.record.holder);
        }
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "failed to release lease");
        }
    }
}

/// Sleep in short slices so a stop request is honoured quickly.
fn heartbeat_loop(
    file: &LeaseFile,
    holder: &str,
    interval: Duration,
    stop: &AtomicBool,
    lost: &AtomicBool,
) {
    let slice = Duration::from_millis(20).min(interval);
    loop {
        let mut waited = Duration::ZERO;
        while waited < interval {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(slice);
            waited += slice;
        }
        match file.renew(holder) {
            Ok(record) => debug!(holder, renewed_at = %record.renewed_at, "lease renewed"),
            Err(LeaseError::Lost { .. }) => {
                warn!(holder, "lease lost; heartbeat stopping");
                lost.store(true, Ordering::Relaxed);
                return;
            }
            Err(e) => warn!(holder, error = %e, "lease renewal failed"),
        }
    }
}

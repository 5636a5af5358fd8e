//! Filesystem-backed cross-process semaphore for Genie.
//!
//! A semaphore key maps to a directory holding one JSON file per holder
//! (`<holder>.lock`, contents `{"permits": n, "expiresAt": ms}`). Holder
//! files are written atomically via temp-then-rename, so the stored
//! atomicity is per holder file; permit counting across holders is
//! eventually consistent, which is acceptable because Genie only uses
//! `limit = 1`. Stale holders age out through the TTL.
//!
//! # Example
//!
//! ```
//! use genie_lock::{FsSemaphore, make_holder_id, DEFAULT_TTL};
//! use tempfile::tempdir;
//!
//! let dir = tempdir().expect("tempdir");
//! let semaphore = FsSemaphore::new(dir.path());
//! let holder = make_holder_id();
//!
//! assert!(semaphore.try_acquire("genie:file:/tmp/a", &holder, DEFAULT_TTL, 1, 1).expect("acquire"));
//! assert_eq!(semaphore.count("genie:file:/tmp/a").expect("count"), 1);
//! semaphore.release("genie:file:/tmp/a", &holder, 1).expect("release");
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default holder TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Holder file suffix.
pub const HOLDER_SUFFIX: &str = ".lock";

/// Poll interval for the release watcher.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Information stored in a holder file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderInfo {
    /// Permits held by this holder.
    pub permits: u32,
    /// Expiry as milliseconds since the epoch.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl HolderInfo {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Root lock directory for a working directory:
/// `<OS temp>/genie-locks/<sha256(cwd)[:16]>`.
pub fn lock_root(cwd: &Path) -> PathBuf {
    let digest = Sha256::digest(cwd.to_string_lossy().as_bytes());
    let prefix = &hex::encode(digest)[..16];
    std::env::temp_dir().join("genie-locks").join(prefix)
}

/// Percent-encode a key or holder id for use as a file name.
pub fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                encoded.push(byte as char);
            }
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{other:02X}"));
            }
        }
    }
    encoded
}

/// A stable holder id for the current task.
///
/// Combines hostname, pid, and a process-local counter so concurrent tasks
/// in one process hold distinct identities.
pub fn make_holder_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    let task = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{hostname}-{}-{task}", std::process::id())
}

/// Filesystem-backed multi-holder semaphore.
#[derive(Debug, Clone)]
pub struct FsSemaphore {
    lock_dir: PathBuf,
}

impl FsSemaphore {
    /// Semaphore rooted at an explicit lock directory.
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    /// Semaphore rooted at the conventional per-cwd lock directory.
    pub fn for_cwd(cwd: &Path) -> Self {
        Self::new(lock_root(cwd))
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.lock_dir.join(encode_component(key))
    }

    fn holder_path(&self, key: &str, holder: &str) -> PathBuf {
        self.key_dir(key)
            .join(format!("{}{}", encode_component(holder), HOLDER_SUFFIX))
    }

    /// Try to take `permits` permits on `key` for `holder`.
    ///
    /// Our own expired holder file is discarded first; active permits of all
    /// other holders are summed, and the acquisition succeeds iff the sum
    /// plus the requested permits stays within `limit`.
    pub fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        limit: u32,
        permits: u32,
    ) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();
        let own_path = self.holder_path(key, holder);

        if let Some(own) = read_holder(&own_path)? {
            if own.is_expired(now_ms) {
                let _ = fs::remove_file(&own_path);
            }
        }

        let mut other_permits = 0u32;
        for (path, info) in self.read_holders(key)? {
            if path == own_path {
                continue;
            }
            if info.is_expired(now_ms) {
                continue;
            }
            other_permits = other_permits.saturating_add(info.permits);
        }

        if other_permits.saturating_add(permits) > limit {
            return Ok(false);
        }

        let info = HolderInfo {
            permits,
            expires_at: now_ms + ttl.as_millis() as i64,
        };
        self.write_holder(&own_path, &info)?;
        Ok(true)
    }

    /// Release up to `permits` permits; returns the number actually released.
    pub fn release(&self, key: &str, holder: &str, permits: u32) -> Result<u32> {
        let own_path = self.holder_path(key, holder);
        let Some(own) = read_holder(&own_path)? else {
            return Ok(0);
        };

        let released = own.permits.min(permits);
        let remaining = own.permits - released;

        if remaining == 0 {
            let _ = fs::remove_file(&own_path);
            // Remove the key dir when it emptied; best-effort, another holder
            // may race a new file in.
            let _ = fs::remove_dir(self.key_dir(key));
        } else {
            self.write_holder(
                &own_path,
                &HolderInfo {
                    permits: remaining,
                    ..own
                },
            )?;
        }
        Ok(released)
    }

    /// Extend our holder's TTL.
    ///
    /// Fails (returns `false`) when the holder file is absent or already
    /// expired; the permit count only ever shrinks on refresh.
    pub fn refresh(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        permits: u32,
    ) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();
        let own_path = self.holder_path(key, holder);
        let Some(own) = read_holder(&own_path)? else {
            return Ok(false);
        };
        if own.is_expired(now_ms) {
            let _ = fs::remove_file(&own_path);
            return Ok(false);
        }

        self.write_holder(
            &own_path,
            &HolderInfo {
                permits: permits.min(own.permits),
                expires_at: now_ms + ttl.as_millis() as i64,
            },
        )?;
        Ok(true)
    }

    /// Sum of active permits across all holders of `key`.
    pub fn count(&self, key: &str) -> Result<u32> {
        let now_ms = Utc::now().timestamp_millis();
        let mut total = 0u32;
        for (_, info) in self.read_holders(key)? {
            if !info.is_expired(now_ms) {
                total = total.saturating_add(info.permits);
            }
        }
        Ok(total)
    }

    /// Watch `key`'s directory and emit whenever its holder set changes.
    ///
    /// The watcher polls; I/O errors are absorbed (a vanished directory reads
    /// as an empty holder set). Dropping the returned watcher stops the
    /// polling thread.
    pub fn watch_releases(&self, key: &str) -> ReleaseWatcher {
        let (sender, receiver) = mpsc::channel();
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let semaphore = self.clone();
        let key = key.to_string();
        let stop_flag = std::sync::Arc::clone(&stop);

        std::thread::spawn(move || {
            let mut last = semaphore.holder_snapshot(&key);
            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(WATCH_INTERVAL);
                let current = semaphore.holder_snapshot(&key);
                if current != last {
                    last = current;
                    if sender.send(()).is_err() {
                        break;
                    }
                }
            }
        });

        ReleaseWatcher { receiver, stop }
    }

    /// Block until `permits` permits are acquired or `deadline` elapses.
    pub fn acquire_blocking(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        limit: u32,
        permits: u32,
        deadline: Duration,
    ) -> Result<bool> {
        let started = std::time::Instant::now();
        if self.try_acquire(key, holder, ttl, limit, permits)? {
            return Ok(true);
        }

        let releases = self.watch_releases(key);
        while started.elapsed() < deadline {
            let remaining = deadline.saturating_sub(started.elapsed());
            let _ = releases.recv_timeout(remaining.min(WATCH_INTERVAL * 2));
            if self.try_acquire(key, holder, ttl, limit, permits)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn holder_snapshot(&self, key: &str) -> Vec<(PathBuf, u32, i64)> {
        self.read_holders(key)
            .unwrap_or_default()
            .into_iter()
            .map(|(path, info)| (path, info.permits, info.expires_at))
            .collect()
    }

    fn read_holders(&self, key: &str) -> Result<Vec<(PathBuf, HolderInfo)>> {
        let dir = self.key_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", dir.display()));
            }
        };

        let mut holders = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "lock") {
                continue;
            }
            if let Some(info) = read_holder(&path)? {
                holders.push((path, info));
            }
        }
        holders.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(holders)
    }

    fn write_holder(&self, path: &Path, info: &HolderInfo) -> Result<()> {
        let dir = path
            .parent()
            .context("holder path has no parent directory")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create lock dir {}", dir.display()))?;

        let json = serde_json::to_string(info).context("failed to serialize holder info")?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write holder tmp file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename holder file to {}", path.display()))?;
        Ok(())
    }
}

/// Stream of holder-set change notifications for one key.
#[derive(Debug)]
pub struct ReleaseWatcher {
    receiver: mpsc::Receiver<()>,
    stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl ReleaseWatcher {
    /// Wait up to `timeout` for a change notification.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<(), mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Drop for ReleaseWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Read holder info from a path; a missing or corrupt file reads as absent.
fn read_holder(path: &Path) -> Result<Option<HolderInfo>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read holder file {}", path.display()));
        }
    };
    match serde_json::from_str(&content) {
        Ok(info) => Ok(Some(info)),
        Err(_) => {
            // Corrupt holder files are treated as stale and removed.
            let _ = fs::remove_file(path);
            Ok(None)
        }
    }
}

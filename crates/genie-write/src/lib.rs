//! Atomic, lock-coordinated target writes for Genie.
//!
//! A target is never observable in a half-written state: bytes land in a
//! sibling `<target>.genie.tmp` file and the rename onto the target is the
//! atomicity boundary. Concurrent producers for the same target serialize
//! through a cross-process semaphore keyed on the target's real path;
//! different targets do not contend.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use genie_lock::{DEFAULT_TTL, FsSemaphore, make_holder_id};
use genie_paths::normalize_lexically;

/// Temp-file suffix used beside the target.
pub const TMP_SUFFIX: &str = ".genie.tmp";

/// Semaphore key prefix for target locks.
pub const TARGET_LOCK_PREFIX: &str = "genie:file:";

/// Mode applied to generated files in read-only mode.
pub const READ_ONLY_MODE: u32 = 0o444;

/// Mode applied before overwriting a previously read-only target.
pub const WRITABLE_MODE: u32 = 0o644;

/// Write `bytes` to `target` atomically.
///
/// An existing target is made writable first (best-effort) so read-only
/// outputs from prior runs can be overwritten. When `mode` is given, the
/// temp file is chmodded *before* the rename so the post-rename inode
/// carries the intended permissions. On any failure the temp file is
/// removed.
pub fn atomic_write(target: &Path, bytes: &[u8], mode: Option<u32>) -> Result<()> {
    if target.exists() {
        let _ = set_mode(target, WRITABLE_MODE);
    }

    let tmp_path = tmp_path_for(target);
    let result = write_via_tmp(target, &tmp_path, bytes, mode);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_via_tmp(
    target: &Path,
    tmp_path: &Path,
    bytes: &[u8],
    mode: Option<u32>,
) -> Result<()> {
    fs::write(tmp_path, bytes)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;

    if let Some(mode) = mode {
        set_mode(tmp_path, mode)
            .with_context(|| format!("failed to chmod temp file {}", tmp_path.display()))?;
    }

    fs::rename(tmp_path, target)
        .with_context(|| format!("failed to rename temp file to {}", target.display()))?;
    Ok(())
}

/// The sibling temp path for a target.
pub fn tmp_path_for(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_os_string();
    os.push(TMP_SUFFIX);
    PathBuf::from(os)
}

/// Mark a generated file read-only. Best-effort: failures are reported, the
/// caller decides whether to ignore them.
pub fn set_read_only(target: &Path) -> Result<()> {
    set_mode(target, READ_ONLY_MODE)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    // Only the read-only bit is expressible here.
    let mut permissions = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("failed to chmod {}", path.display()))
}

/// Semaphore key for a target: `genie:file:` plus the target's real path.
///
/// The target may not exist yet, so its parent is canonicalized and the
/// file name re-attached; lexical normalization is the fallback.
pub fn target_lock_key(target: &Path) -> String {
    let real = target
        .parent()
        .and_then(|parent| parent.canonicalize().ok())
        .and_then(|parent| target.file_name().map(|name| parent.join(name)))
        .unwrap_or_else(|| normalize_lexically(target));
    format!("{TARGET_LOCK_PREFIX}{}", real.display())
}

/// Run `action` while holding the cross-process lock for `target`.
///
/// The lock is a limit-1 semaphore under the per-cwd lock directory with a
/// 120s TTL. It is released on scope exit, including on panic or failure.
pub fn with_target_lock<T>(
    cwd: &Path,
    target: &Path,
    action: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let semaphore = FsSemaphore::for_cwd(cwd);
    let key = target_lock_key(target);
    let holder = make_holder_id();

    let acquired = semaphore.acquire_blocking(&key, &holder, DEFAULT_TTL, 1, 1, LOCK_DEADLINE)?;
    if !acquired {
        bail!(
            "timed out waiting for target lock on {} after {:?}",
            target.display(),
            LOCK_DEADLINE
        );
    }

    let _guard = TargetLockGuard {
        semaphore: &semaphore,
        key: &key,
        holder: &holder,
    };
    action()
}

/// How long a writer waits for a contended target lock.
const LOCK_DEADLINE: Duration = DEFAULT_TTL;

struct TargetLockGuard<'a> {
    semaphore: &'a FsSemaphore,
    key: &'a str,
    holder: &'a str,
}

impl Drop for TargetLockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.semaphore.release(self.key, self.holder, 1);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).expect("stat").permissions().mode() & 0o777
    }

    #[test]
    fn writes_and_replaces_content() {
        let td = tempdir().expect("tempdir");
        let target = td.path().join("out.json");

        atomic_write(&target, b"first\n", None).expect("create");
        assert_eq!(fs::read(&target).expect("read"), b"first\n");

        atomic_write(&target, b"second\n", None).expect("update");
        assert_eq!(fs::read(&target).expect("read"), b"second\n");
        assert!(!tmp_path_for(&target).exists());
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let td = tempdir().expect("tempdir");
        // Renaming onto a path whose parent is missing fails after the temp
        // write; the temp file must not survive.
        let target = td.path().join("missing-dir/out.json");
        let result = atomic_write(&target, b"x", None);
        assert!(result.is_err());
        assert!(!tmp_path_for(&target).exists());
    }

    #[cfg(unix)]
    #[test]
    fn mode_applies_before_rename() {
        let td = tempdir().expect("tempdir");
        let target = td.path().join("out.json");

        atomic_write(&target, b"x\n", Some(READ_ONLY_MODE)).expect("write");
        assert_eq!(mode_of(&target), READ_ONLY_MODE);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_targets_are_overwritable() {
        let td = tempdir().expect("tempdir");
        let target = td.path().join("out.json");

        atomic_write(&target, b"old\n", Some(READ_ONLY_MODE)).expect("first");
        atomic_write(&target, b"new\n", Some(READ_ONLY_MODE)).expect("second");
        assert_eq!(fs::read(&target).expect("read"), b"new\n");
        assert_eq!(mode_of(&target), READ_ONLY_MODE);
    }

    #[test]
    fn lock_key_ignores_dot_segments() {
        let td = tempdir().expect("tempdir");
        fs::create_dir_all(td.path().join("a")).expect("mkdir");
        let direct = td.path().join("out.json");
        let indirect = td.path().join("a/../out.json");
        assert_eq!(target_lock_key(&direct), target_lock_key(&indirect));
    }

    #[test]
    fn concurrent_writers_serialize_per_target() {
        let td = tempdir().expect("tempdir");
        let cwd = td.path().to_path_buf();
        let target = td.path().join("out.json");

        let mut handles = Vec::new();
        for n in 0..4u8 {
            let cwd = cwd.clone();
            let target = target.clone();
            handles.push(std::thread::spawn(move || {
                with_target_lock(&cwd, &target, || {
                    atomic_write(&target, format!("writer {n}\n").as_bytes(), None)
                })
            }));
        }
        for handle in handles {
            handle.join().expect("join").expect("write");
        }

        let content = fs::read_to_string(&target).expect("read");
        assert!(content.starts_with("writer "));
    }

    #[test]
    fn lock_releases_on_action_failure() {
        let td = tempdir().expect("tempdir");
        let target = td.path().join("out.json");

        let failed: Result<()> =
            with_target_lock(td.path(), &target, || bail!("action failed"));
        assert!(failed.is_err());

        // A second writer must not dead-wait on the released lock.
        with_target_lock(td.path(), &target, || {
            atomic_write(&target, b"ok\n", None)
        })
        .expect("second writer");
    }
}

//! Update lock
//!
//! An exclusive-create marker file holding the owner's pid. The guard removes it
//! on drop, so every exit path of an update attempt releases it. A lock left by a
//! process that no longer exists is reclaimed by the next attempt.

use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::AgentError;
use crate::utils::{now_rfc3339, pid_alive};

/// A lock file younger than this with unreadable content is assumed mid-write
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(60);

/// Contents of the lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: String,
}

/// Scoped ownership of the update lock
#[derive(Debug)]
pub struct UpdateLockGuard {
    path: PathBuf,
}

impl UpdateLockGuard {
    /// Acquire the lock or fail with `LockHeld` when a live process owns it
    pub fn acquire(path: &Path) -> Result<UpdateLockGuard, AgentError> {
        // second pass only happens after reclaiming a stale lock
        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        acquired_at: now_rfc3339(),
                    };
                    let guard = UpdateLockGuard {
                        path: path.to_path_buf(),
                    };
                    file.write_all(&serde_json::to_vec(&info)?)?;
                    file.sync_all()?;
                    info!("Acquired update lock {}", path.display());
                    return Ok(guard);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(owner) = live_owner(path)? {
                        return Err(AgentError::LockHeld(owner));
                    }
                    warn!("Reclaiming stale update lock {}", path.display());
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AgentError::LockHeld(format!(
            "{} was re-created while reclaiming it",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLockGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Released update lock {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to release update lock {}: {}", self.path.display(), e),
        }
    }
}

/// Describe the owner if the lock at `path` belongs to a live process
fn live_owner(path: &Path) -> Result<Option<String>, AgentError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<LockInfo>(&contents) {
        Ok(info) if pid_alive(info.pid) => Ok(Some(format!(
            "held by pid {} since {}",
            info.pid, info.acquired_at
        ))),
        Ok(_) => Ok(None),
        Err(_) => {
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or_default();
            if age < UNREADABLE_LOCK_GRACE {
                Ok(Some(format!("{} is being written", path.display())))
            } else {
                Ok(None)
            }
        }
    }
}

/// Whether an update lock file is present
pub fn is_locked(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Wait until the lock file disappears or `cap` elapses.
///
/// Returns `true` when the lock was released (or never held) and `false` when the
/// wait gave up.
pub async fn wait_for_release<S, F>(path: &Path, cap: Duration, poll: Duration, sleep_fn: S) -> bool
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let mut waited = Duration::ZERO;
    while is_locked(path) {
        if waited >= cap {
            return false;
        }
        sleep_fn(poll).await;
        waited += poll;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_removes_lock_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".update.lock");

        {
            let guard = UpdateLockGuard::acquire(&path).unwrap();
            assert!(guard.path().exists());
            let info: LockInfo = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
            assert_eq!(info.pid, std::process::id());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_live_lock_refuses_second_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".update.lock");

        let _guard = UpdateLockGuard::acquire(&path).unwrap();
        let err = UpdateLockGuard::acquire(&path).unwrap_err();
        assert!(matches!(err, AgentError::LockHeld(_)));
        assert!(path.exists());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".update.lock");
        let stale = LockInfo {
            pid: u32::MAX,
            acquired_at: "2020-01-01T00:00:00Z".to_string(),
        };
        fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let guard = UpdateLockGuard::acquire(&path).unwrap();
        let info: LockInfo = serde_json::from_slice(&fs::read(guard.path()).unwrap()).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[test]
    fn test_fresh_unreadable_lock_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".update.lock");
        fs::write(&path, b"").unwrap();

        assert!(matches!(
            UpdateLockGuard::acquire(&path),
            Err(AgentError::LockHeld(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_release_gives_up_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".update.lock");
        fs::write(&path, b"{}").unwrap();

        let calls = std::sync::atomic::AtomicU32::new(0);
        let released = wait_for_release(
            &path,
            Duration::from_secs(30),
            Duration::from_millis(500),
            |_| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async {}
            },
        )
        .await;

        assert!(!released);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 60);
    }

    #[tokio::test]
    async fn test_wait_for_release_returns_when_lock_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".update.lock");
        fs::write(&path, b"{}").unwrap();

        let lock_path = path.clone();
        let released = wait_for_release(
            &path,
            Duration::from_secs(30),
            Duration::from_millis(500),
            move |_| {
                let _ = fs::remove_file(&lock_path);
                async {}
            },
        )
        .await;

        assert!(released);
    }
}

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::fsutil::fsync_dir;

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFile {
    pid: u32,
    acquired_at: String,
}

/// Advisory per-execution lock manager.
///
/// A lock is a file `<locksDir>/<executionId>.lock` holding the owner pid
/// and acquisition time. Stale locks (dead pid, or older than the TTL)
/// are reclaimed by renaming a freshly written lock over the stale one.
pub struct LockManager {
    locks_dir: PathBuf,
    ttl: Duration,
}

impl LockManager {
    pub fn new(locks_dir: impl Into<PathBuf>) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn lock_path(&self, execution_id: &str) -> PathBuf {
        self.locks_dir.join(format!("{execution_id}.lock"))
    }

    /// Acquire the lock for an execution, failing if a live lock exists.
    pub fn acquire(&self, execution_id: &str) -> Result<ExecutionLock, StoreError> {
        std::fs::create_dir_all(&self.locks_dir)?;
        let path = self.lock_path(execution_id);
        let contents = serde_json::to_vec(&LockFile {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        })?;

        match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&contents)?;
                file.sync_all()?;
                fsync_dir(&self.locks_dir)?;
                debug!(execution_id, "execution lock acquired");
                Ok(ExecutionLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                self.try_reclaim(execution_id, &path, &contents)
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Reclaim a stale lock atomically (write replacement, rename over).
    fn try_reclaim(
        &self,
        execution_id: &str,
        path: &Path,
        contents: &[u8],
    ) -> Result<ExecutionLock, StoreError> {
        let existing: LockFile = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(LockFile {
                pid: 0,
                acquired_at: String::new(),
            }),
            // Lock vanished between the create attempt and the read;
            // retry the clean acquisition path once.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.acquire(execution_id)
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        if !self.is_stale(&existing) {
            return Err(StoreError::Locked {
                execution_id: execution_id.to_string(),
                holder_pid: existing.pid,
            });
        }

        warn!(
            execution_id,
            stale_pid = existing.pid,
            "reclaiming stale execution lock"
        );
        let tmp = self
            .locks_dir
            .join(format!(".{execution_id}.{}.lock.tmp", std::process::id()));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        fsync_dir(&self.locks_dir)?;
        Ok(ExecutionLock {
            path: path.to_path_buf(),
        })
    }

    fn is_stale(&self, lock: &LockFile) -> bool {
        if !pid_alive(lock.pid) {
            return true;
        }
        match chrono::DateTime::parse_from_rfc3339(&lock.acquired_at) {
            Ok(acquired) => {
                let age = chrono::Utc::now().signed_duration_since(acquired);
                age.to_std().map(|d| d > self.ttl).unwrap_or(false)
            }
            // Unparseable lock content counts as stale.
            Err(_) => true,
        }
    }
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    pid != 0 && Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(pid: u32) -> bool {
    // Without a portable liveness probe, only the TTL retires locks.
    pid != 0
}

/// Held for the lifetime of an in-flight execution; releases on drop.
#[derive(Debug)]
pub struct ExecutionLock {
    path: PathBuf,
}

impl ExecutionLock {
    pub fn release(self) {
        // Drop does the work.
    }
}

impl Drop for ExecutionLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release execution lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());

        let lock = manager.acquire("exec-1").unwrap();
        assert!(dir.path().join("exec-1.lock").exists());
        lock.release();
        assert!(!dir.path().join("exec-1.lock").exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());

        let _lock = manager.acquire("exec-1").unwrap();
        let err = manager.acquire("exec-1").unwrap_err();
        match err {
            StoreError::Locked { holder_pid, .. } => {
                assert_eq!(holder_pid, std::process::id());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expired_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path()).with_ttl(Duration::from_secs(0));

        {
            let _held = manager.acquire("exec-1").unwrap();
            // TTL zero: our own live lock is immediately stale.
            let reclaimed = manager.acquire("exec-1").unwrap();
            drop(reclaimed);
        }
    }

    #[test]
    fn dead_pid_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());

        let path = dir.path().join("exec-1.lock");
        std::fs::write(
            &path,
            serde_json::to_vec(&LockFile {
                pid: 0,
                acquired_at: chrono::Utc::now().to_rfc3339(),
            })
            .unwrap(),
        )
        .unwrap();

        let lock = manager.acquire("exec-1").unwrap();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn distinct_executions_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LockManager::new(dir.path());
        let _a = manager.acquire("exec-1").unwrap();
        let _b = manager.acquire("exec-2").unwrap();
    }
}

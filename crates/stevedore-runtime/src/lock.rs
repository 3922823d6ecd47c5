//! Per-project advisory locks.
//!
//! A lock is a file `<lock_dir>/<project>.lock` created exclusively and
//! holding the [`LockHolder`] as JSON. The lock is released when the
//! [`ProjectLock`] guard is dropped. A lock whose holder process is gone is
//! stale and is only replaced when reclamation is explicitly requested.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use stevedore_common::constants::LOCK_EXTENSION;
use stevedore_common::error::LockError;
use stevedore_common::types::LockHolder;

/// Exclusive hold on one project's lock file.
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
    holder: LockHolder,
}

impl ProjectLock {
    /// Location of the lock file for `project`.
    #[must_use]
    pub fn lock_path(lock_dir: &Path, project: &str) -> PathBuf {
        lock_dir.join(format!("{project}.{LOCK_EXTENSION}"))
    }

    /// Acquires the lock for `project`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::HeldByOther`] if a live process holds the lock,
    /// [`LockError::Stale`] if a dead process holds it and `reclaim_stale`
    /// is false, and [`LockError::Corrupt`] if the lock file is unreadable.
    pub fn acquire(lock_dir: &Path, project: &str, reclaim_stale: bool) -> Result<Self, LockError> {
        fs::create_dir_all(lock_dir).map_err(|source| LockError::Io {
            path: lock_dir.to_path_buf(),
            source,
        })?;
        let path = Self::lock_path(lock_dir, project);
        let holder = LockHolder {
            pid: std::process::id(),
            invocation: uuid::Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
        };

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let body = serde_json::to_vec(&holder).map_err(|e| LockError::Io {
                        path: path.clone(),
                        source: e.into(),
                    })?;
                    file.write_all(&body)
                        .and_then(|()| file.sync_all())
                        .map_err(|source| LockError::Io {
                            path: path.clone(),
                            source,
                        })?;
                    tracing::debug!(project, path = %path.display(), "lock acquired");
                    return Ok(Self { path, holder });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let current = read_holder_at(&path)?;
                    let Some(current) = current else {
                        continue;
                    };
                    if is_process_alive(current.pid) {
                        return Err(LockError::HeldByOther {
                            project: project.to_string(),
                            holder: current,
                        });
                    }
                    if !reclaim_stale {
                        return Err(LockError::Stale {
                            project: project.to_string(),
                            holder: current,
                        });
                    }
                    tracing::warn!(project, holder = %current, "reclaiming stale lock");
                    remove_lock_file(&path)?;
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }
        Err(LockError::Io {
            path,
            source: ErrorKind::AlreadyExists.into(),
        })
    }

    /// Identity recorded in the lock file.
    #[must_use]
    pub const fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current holder of `project`'s lock, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Corrupt`] if the lock file cannot be parsed.
    pub fn read_holder(lock_dir: &Path, project: &str) -> Result<Option<LockHolder>, LockError> {
        read_holder_at(&Self::lock_path(lock_dir, project))
    }

    /// Removes `project`'s lock if its holder is gone.
    ///
    /// Returns the removed holder, or `None` if there was no lock.
    /// A corrupt lock file is removed as well.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::HeldByOther`] if the holder is still alive.
    pub fn reclaim(lock_dir: &Path, project: &str) -> Result<Option<LockHolder>, LockError> {
        let path = Self::lock_path(lock_dir, project);
        let holder = match read_holder_at(&path) {
            Ok(None) => return Ok(None),
            Ok(Some(holder)) => Some(holder),
            Err(LockError::Corrupt { .. }) => None,
            Err(e) => return Err(e),
        };
        if let Some(holder) = &holder {
            if is_process_alive(holder.pid) {
                return Err(LockError::HeldByOther {
                    project: project.to_string(),
                    holder: holder.clone(),
                });
            }
        }
        remove_lock_file(&path)?;
        tracing::info!(project, "lock reclaimed");
        Ok(holder)
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        match read_holder_at(&self.path) {
            Ok(Some(current)) if current.invocation == self.holder.invocation => {
                if let Err(e) = remove_lock_file(&self.path) {
                    tracing::warn!(error = %e, "failed to release lock");
                }
            }
            Ok(_) => tracing::warn!(path = %self.path.display(), "lock was replaced while held"),
            Err(e) => tracing::warn!(error = %e, "failed to read lock on release"),
        }
    }
}

fn read_holder_at(path: &Path) -> Result<Option<LockHolder>, LockError> {
    let body = match fs::read(path) {
        Ok(body) => body,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|_| LockError::Corrupt {
            path: path.to_path_buf(),
        })
}

fn remove_lock_file(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Returns whether a process with `pid` exists.
///
/// A process owned by another user counts as alive.
#[cfg(unix)]
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Returns whether a process with `pid` exists.
///
/// Liveness cannot be checked here, so every holder counts as alive.
#[cfg(not(unix))]
#[must_use]
pub const fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        let _ = child.wait().expect("wait");
        pid
    }

    fn write_holder(dir: &Path, project: &str, pid: u32) {
        let holder = LockHolder {
            pid,
            invocation: "other".into(),
            acquired_at: Utc::now(),
        };
        fs::write(
            ProjectLock::lock_path(dir, project),
            serde_json::to_vec(&holder).expect("json"),
        )
        .expect("write lock");
    }

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ProjectLock::acquire(dir.path(), "shop", false).expect("acquire");
        assert_eq!(lock.holder().pid, std::process::id());
        let recorded = ProjectLock::read_holder(dir.path(), "shop").expect("read");
        assert_eq!(recorded.as_ref(), Some(lock.holder()));
        drop(lock);
        assert!(!ProjectLock::lock_path(dir.path(), "shop").exists());
    }

    #[test]
    fn live_holder_blocks_acquire() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _held = ProjectLock::acquire(dir.path(), "shop", false).expect("acquire");
        let err = ProjectLock::acquire(dir.path(), "shop", true).unwrap_err();
        assert!(matches!(err, LockError::HeldByOther { ref holder, .. } if holder.pid == std::process::id()));
    }

    #[test]
    fn stale_lock_requires_reclaim() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_holder(dir.path(), "shop", dead_pid());

        let err = ProjectLock::acquire(dir.path(), "shop", false).unwrap_err();
        assert!(matches!(err, LockError::Stale { .. }));

        let lock = ProjectLock::acquire(dir.path(), "shop", true).expect("reclaim");
        assert_eq!(lock.holder().pid, std::process::id());
    }

    #[test]
    fn reclaim_refuses_live_holder() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_holder(dir.path(), "shop", std::process::id());
        let err = ProjectLock::reclaim(dir.path(), "shop").unwrap_err();
        assert!(matches!(err, LockError::HeldByOther { .. }));
    }

    #[test]
    fn reclaim_removes_dead_and_corrupt_locks() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_holder(dir.path(), "a", dead_pid());
        assert!(ProjectLock::reclaim(dir.path(), "a").expect("reclaim").is_some());

        fs::write(ProjectLock::lock_path(dir.path(), "b"), "garbage").expect("write");
        assert!(ProjectLock::reclaim(dir.path(), "b").expect("reclaim").is_none());
        assert!(!ProjectLock::lock_path(dir.path(), "b").exists());

        assert!(ProjectLock::reclaim(dir.path(), "none").expect("reclaim").is_none());
    }

    #[test]
    fn corrupt_lock_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(ProjectLock::lock_path(dir.path(), "shop"), "{").expect("write");
        let err = ProjectLock::acquire(dir.path(), "shop", false).unwrap_err();
        assert!(matches!(err, LockError::Corrupt { .. }));
    }

    #[test]
    fn locks_are_per_project() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _a = ProjectLock::acquire(dir.path(), "a", false).expect("a");
        let _b = ProjectLock::acquire(dir.path(), "b", false).expect("b");
    }
}

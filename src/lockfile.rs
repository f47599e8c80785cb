//! Host liveness lock file
//!
//! A running host holds an exclusive advisory lock (`flock`) on
//! `<project>/.tickbridge/host.lock` for its whole lifetime. The supervisor
//! treats "file exists and is locked" as "a host is already running", which
//! works even before the host's listener is reachable.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

/// Directory under the project holding tickbridge state
pub const STATE_DIR: &str = ".tickbridge";
/// Lock file name inside [`STATE_DIR`]
pub const LOCK_FILE_NAME: &str = "host.lock";

/// Lock file errors
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another host already holds {}", .0.display())]
    AlreadyHeld(PathBuf),

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("flock on {}: {source}", path.display())]
    Flock {
        path: PathBuf,
        #[source]
        source: Errno,
    },
}

/// Location of the lock file for a project
pub fn lock_path(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR).join(LOCK_FILE_NAME)
}

/// An exclusive lock held for as long as this value lives
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Create (if needed) and exclusively lock `path`, recording our PID in it
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(Errno::EWOULDBLOCK) => return Err(LockError::AlreadyHeld(path.clone())),
            Err(source) => {
                return Err(LockError::Flock {
                    path: path.clone(),
                    source,
                })
            }
        }

        // Only the lock holder rewrites the contents
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "{}", std::process::id()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        tracing::debug!(path = %path.display(), "acquired host lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            tracing::warn!(path = %self.path.display(), "failed to release host lock: {e}");
        }
    }
}

/// Whether some process currently holds the lock at `path`.
///
/// A missing file means no host. Anything other than a clean "we could lock
/// it" counts as held, so an unreadable lock never triggers a second launch.
pub fn is_held(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %path.display(), "cannot open lock file, assuming held: {e}");
            return true;
        }
    };

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => {
            let _ = flock(file.as_raw_fd(), FlockArg::Unlock);
            false
        }
        Err(Errno::EWOULDBLOCK) => true,
        Err(e) => {
            tracing::debug!(path = %path.display(), "flock probe failed, assuming held: {e}");
            true
        }
    }
}

/// PID recorded by the current or last lock holder, if readable
pub fn holder_pid(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

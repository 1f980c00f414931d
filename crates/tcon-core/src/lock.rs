//! Process-exclusive instance lock.
//!
//! Only one control process may own the physical link. Ownership is an
//! advisory `flock(LOCK_EX | LOCK_NB)` on a well-known file, tied to the
//! lifetime of the open descriptor: the kernel drops the lock when the holder
//! exits for any reason, crashes included, so a leftover lock file never
//! blocks later instances.
//!
//! The holder writes its pid into the file purely for diagnostics; a blocked
//! competitor reads it back for its refusal message.
//!
//! ```rust,ignore
//! let mut lock = InstanceLock::new("/tmp/tcon.lock");
//! match lock.acquire()? {
//!     LockStatus::Acquired => { /* open the transport */ }
//!     LockStatus::AlreadyHeld { holder_pid } => { /* exit before opening */ }
//! }
//! ```

use crate::error::{StageError, StageResult};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Result of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// This process now owns the device.
    Acquired,
    /// Another live process owns the device.
    AlreadyHeld {
        /// Pid recorded in the lock file, if it could be read.
        holder_pid: Option<u32>,
    },
}

/// Advisory single-instance lock over a lock-file path.
///
/// Released on [`InstanceLock::release`] or on drop, whichever comes first.
pub struct InstanceLock {
    path: PathBuf,
    guard: Option<Flock<File>>,
}

impl std::fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLock")
            .field("path", &self.path)
            .field("held", &self.guard.is_some())
            .finish()
    }
}

impl InstanceLock {
    /// Create an unacquired lock for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: None,
        }
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while this instance holds the lock.
    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Try to take the lock without blocking.
    ///
    /// Calling this again while already holding the lock returns
    /// [`LockStatus::Acquired`] without touching the file.
    ///
    /// # Errors
    /// Returns [`StageError::Io`] if the lock file cannot be opened or
    /// written, or if `flock` fails for a reason other than contention.
    pub fn acquire(&mut self) -> StageResult<LockStatus> {
        if self.guard.is_some() {
            return Ok(LockStatus::Acquired);
        }

        // No truncation on open: the current holder's pid must survive a
        // failed attempt.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(&self.path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(mut locked) => {
                record_pid(&mut locked)?;
                tracing::info!(path = %self.path.display(), pid = std::process::id(), "Instance lock acquired");
                self.guard = Some(locked);
                Ok(LockStatus::Acquired)
            }
            Err((mut file, errno)) if errno == Errno::EWOULDBLOCK => {
                let holder_pid = read_pid(&mut file);
                tracing::warn!(path = %self.path.display(), ?holder_pid, "Instance lock already held");
                Ok(LockStatus::AlreadyHeld { holder_pid })
            }
            Err((_, errno)) => Err(StageError::Io(std::io::Error::from(errno))),
        }
    }

    /// Acquire or fail with [`StageError::LockHeld`].
    pub fn acquire_exclusive(&mut self) -> StageResult<()> {
        match self.acquire()? {
            LockStatus::Acquired => Ok(()),
            LockStatus::AlreadyHeld { holder_pid } => Err(StageError::LockHeld {
                path: self.path.clone(),
                holder_pid,
            }),
        }
    }

    /// Release the lock. Idempotent; safe when acquisition failed or was
    /// never attempted.
    pub fn release(&mut self) {
        if let Some(locked) = self.guard.take() {
            match locked.unlock() {
                Ok(_file) => {
                    tracing::info!(path = %self.path.display(), "Instance lock released");
                }
                Err((locked, errno)) => {
                    // Dropping the descriptor releases the lock regardless.
                    tracing::warn!(path = %self.path.display(), %errno, "Explicit unlock failed; closing descriptor");
                    drop(locked);
                }
            }
        }
    }

    /// Read the pid recorded in a lock file without taking the lock.
    pub fn recorded_pid(path: impl AsRef<Path>) -> Option<u32> {
        let mut file = File::open(path).ok()?;
        read_pid(&mut file)
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn record_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.rewind().ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

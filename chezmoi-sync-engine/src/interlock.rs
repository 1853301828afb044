//! Cross-direction interlock.
//!
//! An in-process holder slot backed by an advisory `flock(LOCK_EX | LOCK_NB)`
//! on `<state_dir>/interlock.lock`. Each acquisition opens its own file
//! description, so the lock also excludes a second task of the same process.
//! The holder record (`{direction, pid, acquired_at}`) is written into the
//! lock file while held and truncated on release.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;

use chezmoi_sync_core::{paths::ensure_dir, Direction, InterlockHolder};

use crate::cancel::CancelToken;
use crate::error::{io_err, SyncError};

pub const ACQUIRE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct State {
    holder: Option<InterlockHolder>,
    last_release: Option<(Direction, Instant)>,
}

#[derive(Debug, Clone)]
pub struct Interlock {
    path: PathBuf,
    state: Arc<Mutex<State>>,
}

/// Held interlock. Dropping it releases both the slot and the file lock.
#[derive(Debug)]
pub struct InterlockGuard {
    file: File,
    holder: InterlockHolder,
    state: Arc<Mutex<State>>,
}

impl InterlockGuard {
    pub fn holder(&self) -> &InterlockHolder {
        &self.holder
    }
}

impl Drop for InterlockGuard {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        unlock(&self.file);
        let mut state = lock_state(&self.state);
        state.holder = None;
        state.last_release = Some((self.holder.direction, Instant::now()));
        tracing::debug!(direction = %self.holder.direction, "interlock released");
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Interlock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire without blocking. `Ok(None)` means another holder exists.
    pub fn try_acquire(&self, direction: Direction) -> Result<Option<InterlockGuard>, SyncError> {
        let mut state = lock_state(&self.state);
        if state.holder.is_some() {
            return Ok(None);
        }

        if let Some(dir) = self.path.parent() {
            ensure_dir(dir)?;
        }
        let mut file = open_lock_file(&self.path).map_err(|e| io_err(&self.path, e))?;
        if !try_flock_exclusive(&file).map_err(|e| io_err(&self.path, e))? {
            return Ok(None);
        }

        let holder = InterlockHolder {
            direction,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        if let Err(e) = write_holder(&mut file, &holder) {
            // Lock is still ours; an unreadable holder record only hurts diagnostics.
            tracing::warn!(path = %self.path.display(), error = %e, "could not record interlock holder");
        }

        state.holder = Some(holder.clone());
        tracing::debug!(direction = %direction, "interlock acquired");
        Ok(Some(InterlockGuard {
            file,
            holder,
            state: Arc::clone(&self.state),
        }))
    }

    /// Poll [`Self::try_acquire`] every [`ACQUIRE_POLL`] until `timeout`.
    ///
    /// `Ok(None)` on timeout; `Err(Cancelled)` once the stop flag is raised.
    pub fn acquire(
        &self,
        direction: Direction,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<InterlockGuard>, SyncError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire(direction)? {
                return Ok(Some(guard));
            }
            cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(ACQUIRE_POLL.min(deadline - now));
        }
    }

    /// Current holder: the in-process slot first, then the lock file.
    pub fn holder(&self) -> Option<InterlockHolder> {
        if let Some(holder) = lock_state(&self.state).holder.clone() {
            return Some(holder);
        }
        Self::inspect(&self.path).ok().flatten()
    }

    /// Direction and instant of the most recent in-process release.
    pub fn last_release(&self) -> Option<(Direction, Instant)> {
        lock_state(&self.state).last_release
    }

    /// Read the holder recorded in a lock file.
    ///
    /// Records left behind by a process that no longer exists are ignored.
    pub fn inspect(path: &Path) -> Result<Option<InterlockHolder>, SyncError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(path, err)),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let holder: InterlockHolder =
            serde_json::from_str(contents.trim()).map_err(|e| SyncError::LockFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        if !process_alive(holder.pid) {
            return Ok(None);
        }
        Ok(Some(holder))
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn write_holder(file: &mut File, holder: &InterlockHolder) -> io::Result<()> {
    let json = serde_json::to_string(holder).map_err(io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()
}

/// `Ok(true)` if acquired, `Ok(false)` if another description holds it.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the fd is owned by `file` and valid for this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

fn unlock(file: &File) {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: as above; closing the file would release the lock anyway.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
    #[cfg(not(unix))]
    let _ = file;
}

fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs only the existence/permission check.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

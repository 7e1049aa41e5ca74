/// Single-instance coordination over a well-known lock file.
///
/// The first process to win an exclusive advisory lock on the file becomes
/// the owner: it records its pid in the file and keeps the file open so the
/// lock is held for its whole life. The operating system drops the lock
/// when the process exits or crashes, which makes the mechanism
/// self-healing. A process that loses the lock race reads the recorded pid
/// and delegates its invocation intent to the owner as an OS signal
/// instead of starting a second instance.
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Cross-process command intents, each bound to one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Bring all notes to the front (SIGUSR1).
    Show,
    /// Reload the shared document and reconcile (SIGUSR2).
    Reload,
    /// Save and exit (SIGTERM).
    Terminate,
}

#[cfg(unix)]
impl Intent {
    fn signal(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Intent::Show => Signal::SIGUSR1,
            Intent::Reload => Signal::SIGUSR2,
            Intent::Terminate => Signal::SIGTERM,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("cannot open lock file {path:?}: {source}")]
    LockUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("lock file {0:?} holds no readable pid")]
    BadPidFile(PathBuf),

    #[error("owning process {0} no longer exists")]
    OwnerGone(i32),

    #[error("signals are not supported on this platform")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the exclusive lock on the pid file. The lock is released when
/// this is dropped or when the process exits.
pub struct OwnerLock {
    _file: File,
    path: PathBuf,
}

impl OwnerLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of a coordinator start attempt.
pub enum Ownership {
    /// This process holds the lock and owns the live document.
    Owned(OwnerLock),
    /// Another process owns the document; delegate intents to this pid.
    Delegated(i32),
}

/// Attempt to become the owning instance.
///
/// A lock file naming a dead process is treated as unowned: the lock
/// itself is gone with the dead owner, so a second attempt succeeds
/// rather than waiting on a corpse.
pub fn acquire(lock_path: &Path) -> Result<Ownership, InstanceError> {
    if let Some(lock) = try_lock(lock_path)? {
        return Ok(Ownership::Owned(lock));
    }

    let pid = read_owner_pid_with_retry(lock_path)?;
    if process_alive(pid) {
        log::debug!("[pinnote.instance] Instance already running as pid {}", pid);
        return Ok(Ownership::Delegated(pid));
    }

    // The recorded owner died between our lock attempt and the pid read;
    // its lock is released, so one retry settles the race.
    log::info!(
        "[pinnote.instance] Lock file names dead pid {}, taking over",
        pid
    );
    if let Some(lock) = try_lock(lock_path)? {
        return Ok(Ownership::Owned(lock));
    }
    let pid = read_owner_pid_with_retry(lock_path)?;
    if process_alive(pid) {
        return Ok(Ownership::Delegated(pid));
    }
    Err(InstanceError::OwnerGone(pid))
}

/// Send an intent signal to the owning process.
#[cfg(unix)]
pub fn send_intent(pid: i32, intent: Intent) -> Result<(), InstanceError> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), intent.signal()).map_err(|errno| match errno {
        nix::errno::Errno::ESRCH => InstanceError::OwnerGone(pid),
        other => InstanceError::Io(std::io::Error::other(other)),
    })
}

#[cfg(not(unix))]
pub fn send_intent(_pid: i32, _intent: Intent) -> Result<(), InstanceError> {
    Err(InstanceError::Unsupported)
}

fn try_lock(lock_path: &Path) -> Result<Option<OwnerLock>, InstanceError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|source| InstanceError::LockUnavailable {
            path: lock_path.to_path_buf(),
            source,
        })?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            file.set_len(0)?;
            file.write_all(std::process::id().to_string().as_bytes())?;
            file.sync_all()?;
            log::info!(
                "[pinnote.instance] Acquired ownership of {:?} as pid {}",
                lock_path,
                std::process::id()
            );
            Ok(Some(OwnerLock {
                _file: file,
                path: lock_path.to_path_buf(),
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(InstanceError::LockUnavailable {
            path: lock_path.to_path_buf(),
            source: e,
        }),
    }
}

/// Read the owner's pid, allowing one short grace period: a contender can
/// lose the lock race and read the file before the fresh owner's pid
/// write has landed.
fn read_owner_pid_with_retry(lock_path: &Path) -> Result<i32, InstanceError> {
    match read_owner_pid(lock_path) {
        Err(InstanceError::BadPidFile(_)) => {
            std::thread::sleep(std::time::Duration::from_millis(50));
            read_owner_pid(lock_path)
        }
        other => other,
    }
}

fn read_owner_pid(lock_path: &Path) -> Result<i32, InstanceError> {
    let raw = fs::read_to_string(lock_path)?;
    raw.trim()
        .parse()
        .map_err(|_| InstanceError::BadPidFile(lock_path.to_path_buf()))
}

/// Probe whether a process exists (signal 0, no delivery).
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
pub fn process_alive(_pid: i32) -> bool {
    false
}

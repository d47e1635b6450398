//! Per-instance claims so concurrent controllers sharing a results
//! directory never run the same instance twice.
//!
//! A claim is an exclusive `flock` on `<stub>.lock`. The kernel drops it
//! when the owning process exits, however it exits, so a lock file left
//! behind by an interrupted controller never blocks a later run. The
//! owner payload inside the file is informational only.

use crate::store::StorageError;
use chrono::Utc;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::unistd::gethostname;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::debug;

const CLAIM_ATTEMPTS: usize = 3;

pub fn local_hostname() -> String {
    gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOwner {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: String,
}

/// Held claim on one instance. Dropping it unlinks the lock file while the
/// lock is still held, then releases the lock.
pub struct InstanceClaim {
    path: PathBuf,
    lock: Option<Flock<File>>,
}

impl fmt::Debug for InstanceClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceClaim")
            .field("path", &self.path)
            .field("held", &self.lock.is_some())
            .finish()
    }
}

impl Drop for InstanceClaim {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        if let Some(lock) = self.lock.take() {
            let _ = lock.unlock();
        }
    }
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Acquired(InstanceClaim),
    /// `None` when the owner payload is missing or still being written.
    HeldBy(Option<ClaimOwner>),
}

fn read_owner(path: &Path) -> Option<ClaimOwner> {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<ClaimOwner>(&bytes).ok())
}

/// The lock only counts if `path` still names the inode we locked; a
/// releasing owner may have unlinked it after we opened it.
fn still_linked(path: &Path, file: &File) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_owner(mut file: &File, hostname: &str) -> io::Result<()> {
    let owner = ClaimOwner {
        pid: std::process::id(),
        hostname: hostname.to_string(),
        acquired_at: Utc::now().to_rfc3339(),
    };
    file.set_len(0)?;
    file.write_all(&serde_json::to_vec(&owner)?)?;
    file.sync_all()
}

pub fn try_claim(path: &Path, hostname: &str) -> Result<ClaimOutcome, StorageError> {
    let lock_err = |source: io::Error| StorageError::Lock {
        path: path.to_path_buf(),
        source,
    };
    for _ in 0..CLAIM_ATTEMPTS {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(lock_err)?;
        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Ok(ClaimOutcome::HeldBy(read_owner(path)));
            }
            Err((_, errno)) => return Err(lock_err(io::Error::from(errno))),
        };
        if !still_linked(path, &lock).map_err(lock_err)? {
            debug!(lock = %path.display(), "lock file replaced while claiming, retrying");
            continue;
        }
        let claim = InstanceClaim {
            path: path.to_path_buf(),
            lock: Some(lock),
        };
        if let Some(lock) = &claim.lock {
            write_owner(lock, hostname).map_err(lock_err)?;
        }
        return Ok(ClaimOutcome::Acquired(claim));
    }
    Ok(ClaimOutcome::HeldBy(read_owner(path)))
}

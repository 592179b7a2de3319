//! Cross-process retrain lock.
//!
//! Retrains against one state store are serialized with `flock()` on a lock
//! file next to it, so a CLI trigger and a running daemon never run the
//! training job side by side. The lock is released on drop.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::core::errors::{Result, RgError};

/// Held exclusive lock. Dropping it unlocks.
pub struct RetrainLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl RetrainLock {
    /// Take the lock without blocking. A held lock is `RetrainInProgress`.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::fcntl::{Flock, FlockArg};

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => Ok(Self { _flock: flock }),
                Err((_file, errno)) if errno == Errno::EWOULDBLOCK => {
                    Err(RgError::RetrainInProgress)
                }
                Err((_file, errno)) => Err(RgError::Runtime {
                    details: format!("failed to lock {}: {errno}", path.display()),
                }),
            }
        }

        #[cfg(not(unix))]
        {
            Ok(Self { _file: file })
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| RgError::io(parent, source))?;
    }
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        opts.mode(0o600);
    }
    opts.open(path).map_err(|source| RgError::io(path, source))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/retrain_state.json.lock");

        let first = RetrainLock::try_acquire(&path).unwrap();
        let Err(err) = RetrainLock::try_acquire(&path) else {
            panic!("lock acquired twice");
        };
        assert_eq!(err.code(), "RG-2002");

        drop(first);
        assert!(RetrainLock::try_acquire(&path).is_ok());
    }

    #[test]
    fn distinct_files_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = RetrainLock::try_acquire(&dir.path().join("a.lock")).unwrap();
        assert!(RetrainLock::try_acquire(&dir.path().join("b.lock")).is_ok());
    }
}

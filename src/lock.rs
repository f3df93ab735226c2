use std::fs::File;
use std::os::fd::AsRawFd;

use camino::Utf8Path;
use nix::fcntl::{FlockArg, flock};

use crate::db;
use crate::error::{Error, Result};

/// An acquired advisory lock on the database directory.
///
/// Mutators take the exclusive flavour, readers the shared one. Acquisition
/// never blocks: a held conflicting lock fails construction with
/// [`Error::DatabaseBusy`]. The lock is released when the guard is dropped
/// and the underlying handle closes.
#[derive(Debug)]
pub struct DbLock {
    _file: File,
}

impl DbLock {
    pub fn exclusive(root: &Utf8Path) -> Result<Self> {
        Self::acquire(root, FlockArg::LockExclusiveNonblock)
    }

    pub fn shared(root: &Utf8Path) -> Result<Self> {
        Self::acquire(root, FlockArg::LockSharedNonblock)
    }

    fn acquire(root: &Utf8Path, arg: FlockArg) -> Result<Self> {
        let dir = root.join(db::PKG_DIR);
        let file = File::open(&dir).map_err(|source| Error::DatabaseIo {
            op: "open",
            path: dir.to_string(),
            source,
        })?;
        match flock(file.as_raw_fd(), arg) {
            Ok(()) => Ok(Self { _file: file }),
            Err(nix::errno::Errno::EWOULDBLOCK) => Err(Error::DatabaseBusy),
            Err(errno) => Err(Error::DatabaseIo {
                op: "lock",
                path: dir.to_string(),
                source: errno.into(),
            }),
        }
    }
}

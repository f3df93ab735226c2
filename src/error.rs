use std::collections::BTreeSet;
use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything the engine can report to a front-end. Per-file cleanup and
/// upgrade-time extraction failures are logged and absorbed instead of
/// surfacing here; see the install and remove modules.
#[derive(Debug, Error)]
pub enum Error {
    #[error("package database is locked by another process")]
    DatabaseBusy,

    #[error("could not {op} {path}")]
    DatabaseIo {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid package name '{0}' (expected <name>#<version>.pkg.tar[.gz|.bz2|.xz|.lz|.zst])")]
    BadPackageName(String),

    #[error("could not open {path}")]
    ArchiveOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not read {path}")]
    ArchiveRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("empty package {0}")]
    EmptyPackage(String),

    #[error("package {0} already installed (use -u to upgrade)")]
    AlreadyInstalled(String),

    #[error("package {0} not previously installed (skip -u to install)")]
    NotInstalled(String),

    /// The conflicting paths; front-ends print them one per line before
    /// the message itself.
    #[error("listed file(s) already installed (use -f to ignore and overwrite)")]
    FileConflicts(BTreeSet<String>),

    #[error("could not extract {path}")]
    ExtractError {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{file}:{line}: {reason}")]
    ConfigParse {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("only root can install or remove packages")]
    PermissionDenied,
}

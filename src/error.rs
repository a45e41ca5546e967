//! Errors surfaced by the hosts file façade.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::backup::BackupError;
use crate::model::EntryId;
use crate::reconcile::{ConflictKind, ConflictReport};
use crate::writer::WriteError;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("hosts file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied reading {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => ReadError::NotFound(path),
            io::ErrorKind::PermissionDenied => ReadError::PermissionDenied(path),
            _ => ReadError::Unreadable { path, source },
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("hosts file changed on disk since it was loaded; reload and retry")]
    StaleSnapshot,

    #[error("system-owned entries conflict: {0}")]
    SystemConflict(ConflictReport),

    #[error("hosts file was edited concurrently: {0}")]
    LostUpdateConflict(ConflictReport),

    #[error("backup failed, hosts file left untouched: {0}")]
    BackupFailed(#[source] BackupError),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid entry {id}: {reason}")]
    InvalidEntry { id: EntryId, reason: String },

    #[error(transparent)]
    Read(#[from] ReadError),
}

impl From<ConflictReport> for SaveError {
    fn from(report: ConflictReport) -> Self {
        match report.kind {
            ConflictKind::System => SaveError::SystemConflict(report),
            ConflictKind::LostUpdate => SaveError::LostUpdateConflict(report),
        }
    }
}

impl From<WriteError> for SaveError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::StaleSnapshot => SaveError::StaleSnapshot,
            WriteError::BackupFailed(b) => SaveError::BackupFailed(b),
            WriteError::PermissionDenied(m) => SaveError::PermissionDenied(m),
            WriteError::WriteFailed { path, source } => SaveError::WriteFailed { path, source },
            WriteError::Unreadable { path, source } => {
                SaveError::Read(ReadError::Unreadable { path, source })
            }
        }
    }
}

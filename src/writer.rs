//! Serialization and the atomic, backed-up commit to disk.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupError, BackupId, BackupManager};
use crate::model::{Fingerprint, HostEntry, LineEnding, LineRecord};
use crate::platform::{PrivilegeGateway, WriteHandle};
use crate::reconcile::TargetState;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("hosts file changed on disk since it was read")]
    StaleSnapshot,

    #[error("backup failed: {0}")]
    BackupFailed(#[source] BackupError),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot re-read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Target serialized identically to the file on disk; nothing was written or backed up.
    Unchanged,
    Written { backup: BackupId },
}

/// Join records with `\n`; output always ends with a newline unless there are no lines.
pub fn serialize(lines: &[LineRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lines.iter().map(|l| l.raw.len() + 1).sum());
    for line in lines {
        out.extend_from_slice(&line.raw);
        out.push(b'\n');
    }
    out
}

/// `<ip>\t<hostname...>`, prefixed with the disable marker when disabled.
pub fn render_entry(entry: &HostEntry, marker: &str, ending: LineEnding) -> Vec<u8> {
    let mut s = String::new();
    if !entry.enabled {
        s.push_str(marker);
    }
    s.push_str(&entry.ip);
    s.push('\t');
    s.push_str(&entry.hostnames.join(" "));
    if let Some(c) = &entry.comment {
        s.push_str(" # ");
        s.push_str(c);
    }
    if ending == LineEnding::CrLf {
        s.push('\r');
    }
    s.into_bytes()
}

/// Add or strip the disable marker, keeping the rest of the line as it was.
pub fn toggle_line(raw: &[u8], enable: bool, marker: &str) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(raw).ok()?;
    let rest = text.trim_start();
    let indent = &text[..text.len() - rest.len()];
    let toggled = if enable {
        format!("{indent}{}", rest.strip_prefix(marker)?)
    } else {
        if marker.is_empty() {
            return None;
        }
        format!("{indent}{marker}{rest}")
    };
    Some(toggled.into_bytes())
}

/// Writes a target state over the hosts file.
pub struct Writer<'a> {
    target: &'a Path,
    backups: &'a BackupManager,
    gateway: &'a dyn PrivilegeGateway,
}

impl<'a> Writer<'a> {
    pub fn new(
        target: &'a Path,
        backups: &'a BackupManager,
        gateway: &'a dyn PrivilegeGateway,
    ) -> Self {
        Self {
            target,
            backups,
            gateway,
        }
    }

    pub fn commit(&self, state: &TargetState) -> Result<CommitOutcome, WriteError> {
        self.commit_bytes(&state.to_bytes(), state.expected_fingerprint())
    }

    /// Replace the file with `bytes`, provided it still has fingerprint `expected`.
    ///
    /// Order: stale check, no-op short circuit, privilege, stale check again
    /// (the prompt may have blocked for a long time), backup, staged write,
    /// atomic rename. Nothing touches the hosts file before the rename.
    pub fn commit_bytes(
        &self,
        bytes: &[u8],
        expected: &Fingerprint,
    ) -> Result<CommitOutcome, WriteError> {
        let on_disk = self.read_expected(expected)?;
        if on_disk == bytes {
            debug!(path = %self.target.display(), "no changes to write");
            return Ok(CommitOutcome::Unchanged);
        }

        let mut handle = self
            .gateway
            .acquire(self.target)
            .map_err(|e| WriteError::PermissionDenied(e.to_string()))?;

        let on_disk = self.read_expected(expected)?;
        let backup = self
            .backups
            .snapshot(&on_disk)
            .map_err(WriteError::BackupFailed)?;

        if let Err(e) = self.replace(handle.as_mut(), bytes, &on_disk) {
            self.release_backup(&e, &backup, &on_disk);
            return Err(e);
        }
        info!(
            path = %self.target.display(),
            backup = %backup,
            bytes = bytes.len(),
            "hosts file written"
        );
        Ok(CommitOutcome::Written { backup })
    }

    /// A write refused for lack of privilege before the file changed gives its
    /// backup back.
    fn release_backup(&self, e: &WriteError, backup: &BackupId, on_disk: &[u8]) {
        if !matches!(e, WriteError::PermissionDenied(_)) {
            return;
        }
        if !std::fs::read(self.target).is_ok_and(|now| now == on_disk) {
            return;
        }
        match self.backups.discard(backup) {
            Ok(()) => debug!(backup = %backup, "write refused, backup dropped"),
            Err(err) => warn!(backup = %backup, error = %err, "could not drop unused backup"),
        }
    }

    fn read_expected(&self, expected: &Fingerprint) -> Result<Vec<u8>, WriteError> {
        let bytes = match std::fs::read(self.target) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(WriteError::StaleSnapshot),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(WriteError::PermissionDenied(format!(
                    "cannot read {}: {e}",
                    self.target.display()
                )))
            }
            Err(source) => {
                return Err(WriteError::Unreadable {
                    path: self.target.to_path_buf(),
                    source,
                })
            }
        };
        if Fingerprint::of(&bytes) != *expected {
            warn!(path = %self.target.display(), "hosts file changed since it was read");
            return Err(WriteError::StaleSnapshot);
        }
        Ok(bytes)
    }

    fn replace(
        &self,
        handle: &mut dyn WriteHandle,
        bytes: &[u8],
        previous: &[u8],
    ) -> Result<(), WriteError> {
        let staged = staging_path(self.target);
        if let Err(e) = handle.stage(&staged, bytes) {
            handle.discard(&staged);
            return Err(self.io_failure(e));
        }
        match handle.promote(&staged, self.target) {
            Ok(()) => Ok(()),
            Err(e) if rename_unsupported(&e) => {
                warn!(
                    path = %self.target.display(),
                    error = %e,
                    "atomic rename unavailable, overwriting in place"
                );
                handle.discard(&staged);
                self.overwrite_verified(handle, bytes, previous)
            }
            Err(e) => {
                handle.discard(&staged);
                Err(self.io_failure(e))
            }
        }
    }

    /// Non-atomic fallback: overwrite, re-read, put the previous bytes back on mismatch.
    fn overwrite_verified(
        &self,
        handle: &mut dyn WriteHandle,
        bytes: &[u8],
        previous: &[u8],
    ) -> Result<(), WriteError> {
        let result = handle.overwrite(self.target, bytes).and_then(|()| {
            let written = std::fs::read(self.target)?;
            if written == bytes {
                Ok(())
            } else {
                Err(io::Error::other("content read back differs from what was written"))
            }
        });
        if let Err(e) = result {
            warn!(path = %self.target.display(), "restoring pre-write content");
            if let Err(restore) = handle.overwrite(self.target, previous) {
                error!(
                    path = %self.target.display(),
                    error = %restore,
                    "could not restore pre-write content; recover from the latest backup"
                );
            }
            return Err(self.io_failure(e));
        }
        Ok(())
    }

    fn io_failure(&self, e: io::Error) -> WriteError {
        if e.kind() == io::ErrorKind::PermissionDenied {
            WriteError::PermissionDenied(format!("{}: {e}", self.target.display()))
        } else {
            WriteError::WriteFailed {
                path: self.target.to_path_buf(),
                source: e,
            }
        }
    }
}

/// Temporary file next to the target so the rename stays on one filesystem.
pub fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hosts".to_string());
    target.with_file_name(format!(".{name}.hostsync-tmp"))
}

#[cfg(unix)]
fn rename_unsupported(e: &io::Error) -> bool {
    // EXDEV: staged file on another device. EBUSY: target is a bind mount (containers).
    matches!(e.raw_os_error(), Some(libc::EXDEV) | Some(libc::EBUSY))
}

#[cfg(not(unix))]
fn rename_unsupported(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Unsupported
}

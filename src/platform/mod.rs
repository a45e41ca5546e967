//! Privilege gateway: how the writer obtains the right to replace the hosts file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("elevation was denied")]
    Denied,
    #[error("elevation prompt was cancelled")]
    Cancelled,
    #[error("elevation unavailable: {0}")]
    Unavailable(String),
}

/// One-time elevated write capability for a single commit.
pub trait WriteHandle {
    /// Write `bytes` to `staged` and flush them to disk.
    fn stage(&mut self, staged: &Path, bytes: &[u8]) -> io::Result<()>;
    /// Atomically rename `staged` over `target`.
    fn promote(&mut self, staged: &Path, target: &Path) -> io::Result<()>;
    /// Overwrite `target` in place (non-atomic fallback).
    fn overwrite(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()>;
    /// Best-effort removal of a staged file.
    fn discard(&mut self, staged: &Path);
}

/// Grants write handles. Called once per save, right before the destructive
/// write; nothing is cached across calls.
pub trait PrivilegeGateway: Send + Sync {
    fn acquire(&self, target: &Path) -> Result<Box<dyn WriteHandle>, PrivilegeError>;
}

/// Gateway for a process that can already write the target (root, or a test file).
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectGateway;

impl PrivilegeGateway for DirectGateway {
    fn acquire(&self, target: &Path) -> Result<Box<dyn WriteHandle>, PrivilegeError> {
        if !can_write(target) {
            return Err(PrivilegeError::Denied);
        }
        Ok(Box::new(DirectHandle))
    }
}

/// Plain `std::fs` file operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectHandle;

impl WriteHandle for DirectHandle {
    fn stage(&mut self, staged: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut f = fs::File::create(staged)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staged, fs::Permissions::from_mode(0o644))?;
        }
        Ok(())
    }

    fn promote(&mut self, staged: &Path, target: &Path) -> io::Result<()> {
        fs::rename(staged, target)
    }

    fn overwrite(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut f = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(target)?;
        f.write_all(bytes)?;
        f.sync_all()
    }

    fn discard(&mut self, staged: &Path) {
        let _ = fs::remove_file(staged);
    }
}

/// Whether the target can be replaced (directory writable) or overwritten
/// (file writable) without elevation.
pub fn can_write(target: &Path) -> bool {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    writable(dir) || writable(target)
}

#[cfg(unix)]
fn writable(path: &Path) -> bool {
    unix::access_writable(path)
}

#[cfg(not(unix))]
fn writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

/// Platform location of the hosts file.
pub fn default_hosts_path() -> PathBuf {
    #[cfg(windows)]
    {
        let root = std::env::var_os("SystemRoot").unwrap_or_else(|| r"C:\Windows".into());
        return PathBuf::from(root)
            .join("System32")
            .join("drivers")
            .join("etc")
            .join("hosts");
    }
    #[cfg(not(windows))]
    return PathBuf::from("/etc/hosts");
}

/// Get the platform gateway.
/// If HOSTSYNC_HOSTS_FILE is set (e.g. in tests), writes go straight to that file.
pub fn default_gateway() -> Box<dyn PrivilegeGateway> {
    if std::env::var_os(crate::config::HOSTS_FILE_ENV).is_some() {
        return Box::new(DirectGateway);
    }
    #[cfg(unix)]
    if unix::is_root() {
        return Box::new(DirectGateway);
    }
    #[cfg(unix)]
    return Box::new(unix::PkexecGateway::new());

    #[cfg(windows)]
    return Box::new(windows::WindowsGateway);
}

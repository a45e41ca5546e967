//! Shared test helpers.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use hostsync::backup::BackupManager;
use hostsync::platform::{DirectHandle, PrivilegeError, PrivilegeGateway, WriteHandle};
use hostsync::HostsFile;

/// Create a temp directory for use as HOSTSYNC_HOME.
/// Uses current dir (workspace) so sandbox allows full access.
pub fn temp_home() -> TempDir {
    tempfile::Builder::new()
        .prefix("hostsync_test_")
        .tempdir_in(std::env::current_dir().unwrap_or_else(|_| Path::new(".").into()))
        .expect("temp dir")
}

/// Write `content` to `<dir>/hosts` and return its path.
pub fn write_hosts(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("hosts");
    fs::write(&path, content).expect("write hosts");
    path
}

pub fn read_hosts(path: &Path) -> String {
    fs::read_to_string(path).expect("read hosts")
}

/// Engine over `<dir>/hosts` (seeded with `content`) with backups in `<dir>/backups`.
pub fn engine(dir: &Path, content: &str) -> HostsFile {
    let path = write_hosts(dir, content);
    HostsFile::new(path, BackupManager::new(dir.join("backups"), 10))
}

pub fn backup_count(hosts: &HostsFile) -> usize {
    hosts.backups().list().expect("list backups").len()
}

/// How a mock gateway or its handle should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Deny,
    Cancel,
    /// Rename fails with a plain I/O error, as if the process died mid-commit.
    PromoteFails,
    /// Rename fails with this raw OS error.
    PromoteOsError(i32),
    /// Rename is refused for lack of privilege.
    PromoteRefused,
}

/// Gateway that hands out `DirectHandle`-backed handles and records calls.
#[derive(Clone)]
pub struct MockGateway {
    fault: Fault,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::failing(Fault::None)
    }

    pub fn failing(fault: Fault) -> Self {
        Self {
            fault,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn acquired(&self) -> usize {
        self.calls().iter().filter(|c| *c == "acquire").count()
    }
}

impl PrivilegeGateway for MockGateway {
    fn acquire(&self, _target: &Path) -> Result<Box<dyn WriteHandle>, PrivilegeError> {
        self.calls.lock().unwrap().push("acquire".to_string());
        match self.fault {
            Fault::Deny => Err(PrivilegeError::Denied),
            Fault::Cancel => Err(PrivilegeError::Cancelled),
            _ => Ok(Box::new(MockHandle {
                fault: self.fault,
                calls: Arc::clone(&self.calls),
            })),
        }
    }
}

struct MockHandle {
    fault: Fault,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockHandle {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl WriteHandle for MockHandle {
    fn stage(&mut self, staged: &Path, bytes: &[u8]) -> io::Result<()> {
        self.record("stage");
        DirectHandle.stage(staged, bytes)
    }

    fn promote(&mut self, staged: &Path, target: &Path) -> io::Result<()> {
        self.record("promote");
        match self.fault {
            Fault::PromoteFails => Err(io::Error::other("simulated crash before rename")),
            Fault::PromoteOsError(code) => Err(io::Error::from_raw_os_error(code)),
            Fault::PromoteRefused => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "authorization refused",
            )),
            _ => DirectHandle.promote(staged, target),
        }
    }

    fn overwrite(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        self.record("overwrite");
        DirectHandle.overwrite(target, bytes)
    }

    fn discard(&mut self, staged: &Path) {
        self.record("discard");
        DirectHandle.discard(staged)
    }
}

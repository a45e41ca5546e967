//! Windows: the hosts file is writable only from an elevated process.

use std::fs;
use std::io;
use std::path::Path;

use super::{DirectHandle, PrivilegeError, PrivilegeGateway, WriteHandle};

pub struct WindowsGateway;

impl PrivilegeGateway for WindowsGateway {
    fn acquire(&self, target: &Path) -> Result<Box<dyn WriteHandle>, PrivilegeError> {
        match fs::OpenOptions::new().append(true).open(target) {
            Ok(_) => Ok(Box::new(DirectHandle)),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(PrivilegeError::Denied),
            Err(e) => Err(PrivilegeError::Unavailable(format!(
                "open {}: {e}",
                target.display()
            ))),
        }
    }
}

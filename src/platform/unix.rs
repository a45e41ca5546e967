//! Unix (macOS, Linux) privilege elevation through pkexec.
//!
//! One commit runs one root shell: the user authenticates once, in `acquire`,
//! before any backup is taken, and every file operation of that commit goes
//! through the same shell.

use std::ffi::{CString, OsString};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use super::{PrivilegeError, PrivilegeGateway, WriteHandle};

/// pkexec exit status when the authentication dialog was dismissed.
const PKEXEC_DISMISSED: i32 = 126;
/// pkexec exit status when the user is not authorized.
const PKEXEC_NOT_AUTHORIZED: i32 = 127;

const READY: &str = "hostsync-ready";
const STATUS: &str = "hostsync-status ";

static SCRATCH_SEQ: AtomicUsize = AtomicUsize::new(0);

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// access(2) with W_OK for the real uid.
pub fn access_writable(path: &Path) -> bool {
    let Ok(c) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c.as_ptr(), libc::W_OK) == 0 }
}

#[derive(Debug, Clone)]
pub struct PkexecGateway {
    program: OsString,
    args: Vec<OsString>,
}

impl Default for PkexecGateway {
    fn default() -> Self {
        Self::with_command("pkexec", ["/bin/sh"])
    }
}

impl PkexecGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the shell with `program args...` instead of `pkexec /bin/sh`.
    pub fn with_command<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl PrivilegeGateway for PkexecGateway {
    fn acquire(&self, target: &Path) -> Result<Box<dyn WriteHandle>, PrivilegeError> {
        let mut shell = RootShell::spawn(&self.program, &self.args).map_err(|e| {
            PrivilegeError::Unavailable(format!("{}: {e}", self.program.to_string_lossy()))
        })?;
        if let Err(e) = shell.handshake() {
            debug!(error = %e, "elevated shell did not start");
            return Err(shell.refusal());
        }
        debug!(target = %target.display(), "elevation granted");
        Ok(Box::new(PkexecHandle::new(shell)))
    }
}

/// Long-lived shell reading commands from a pipe. Command output goes to
/// stderr; stdout only carries status lines.
struct RootShell {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl RootShell {
    fn spawn(program: &OsString, args: &[OsString]) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => Ok(Self {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            }),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(io::Error::other("shell started without pipes"))
            }
        }
    }

    /// Blocks until authentication is done and the shell answers.
    fn handshake(&mut self) -> io::Result<()> {
        self.send(format!("echo {READY}\n").as_bytes())?;
        let line = self.read_line()?;
        if line == READY {
            Ok(())
        } else {
            Err(io::Error::other(format!("unexpected shell output {line:?}")))
        }
    }

    /// Why the shell went away before answering.
    fn refusal(&mut self) -> PrivilegeError {
        drop(self.stdin.take());
        match self.child.wait() {
            Ok(status) => match status.code() {
                Some(PKEXEC_DISMISSED) => PrivilegeError::Cancelled,
                Some(PKEXEC_NOT_AUTHORIZED) => PrivilegeError::Denied,
                _ => PrivilegeError::Unavailable(format!("elevated shell exited with {status}")),
            },
            Err(e) => PrivilegeError::Unavailable(e.to_string()),
        }
    }

    /// Run one command line and return its exit status.
    fn run(&mut self, command: &[u8]) -> io::Result<i32> {
        let mut line = b"{ ".to_vec();
        line.extend_from_slice(command);
        line.extend_from_slice(format!("; }} 1>&2; echo \"{STATUS}$?\"\n").as_bytes());
        self.send(&line)?;
        loop {
            let out = self.read_line()?;
            if let Some(code) = out.strip_prefix(STATUS) {
                return code
                    .parse()
                    .map_err(|_| io::Error::other(format!("bad status line {out:?}")));
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "elevated shell closed"))?;
        stdin.write_all(bytes)?;
        stdin.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "elevated shell exited",
            ));
        }
        Ok(line.trim_end().to_string())
    }
}

impl Drop for RootShell {
    fn drop(&mut self) {
        let _ = self.send(b"exit\n");
        drop(self.stdin.take());
        if let Err(e) = self.child.wait() {
            warn!(error = %e, "elevated shell did not exit cleanly");
        }
    }
}

/// File operations run as root in the session's shell; content travels
/// through a user-owned scratch file.
pub struct PkexecHandle {
    shell: RootShell,
    scratch: PathBuf,
}

impl PkexecHandle {
    fn new(shell: RootShell) -> Self {
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            shell,
            scratch: std::env::temp_dir().join(format!(
                "hostsync-{}-{seq}.tmp",
                std::process::id()
            )),
        }
    }

    fn exec(&mut self, what: &str, parts: &[&[u8]]) -> io::Result<()> {
        match self.shell.run(&parts.join(&b' '))? {
            0 => Ok(()),
            code => Err(io::Error::other(format!("{what} exited with {code}"))),
        }
    }
}

impl WriteHandle for PkexecHandle {
    fn stage(&mut self, staged: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(&self.scratch, bytes)?;
        // install does not fsync.
        let (scratch, staged) = (quote(&self.scratch), quote(staged));
        let command = [
            b"install -m 0644".as_slice(),
            scratch.as_slice(),
            staged.as_slice(),
            b"&& sync".as_slice(),
        ];
        self.exec("install", &command)
    }

    fn promote(&mut self, staged: &Path, target: &Path) -> io::Result<()> {
        // mv would fall back to copying; report what rename(2) would say instead.
        if is_mount_point(target)? {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        let (staged, target) = (quote(staged), quote(target));
        self.exec("mv", &[b"mv -f".as_slice(), staged.as_slice(), target.as_slice()])
    }

    fn overwrite(&mut self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::write(&self.scratch, bytes)?;
        // cp keeps the target inode, which is what bind-mounted files need.
        let (scratch, target) = (quote(&self.scratch), quote(target));
        let command = [
            b"cp".as_slice(),
            scratch.as_slice(),
            target.as_slice(),
            b"&& sync".as_slice(),
        ];
        self.exec("cp", &command)
    }

    fn discard(&mut self, staged: &Path) {
        let staged = quote(staged);
        let _ = self.exec("rm", &[b"rm -f".as_slice(), staged.as_slice()]);
    }
}

impl Drop for PkexecHandle {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.scratch);
    }
}

/// A bind-mounted file lives on a different device than its directory.
fn is_mount_point(path: &Path) -> io::Result<bool> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(fs::metadata(path)?.dev() != fs::metadata(dir)?.dev())
}

/// Single-quote a path for sh.
fn quote(path: &Path) -> Vec<u8> {
    let mut out = vec![b'\''];
    for &b in path.as_os_str().as_bytes() {
        if b == b'\'' {
            out.extend_from_slice(b"'\\''");
        } else {
            out.push(b);
        }
    }
    out.push(b'\'');
    out
}

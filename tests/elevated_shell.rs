//! Commits through the pkexec session, with a plain shell standing in for pkexec.
#![cfg(unix)]

mod common;

use hostsync::platform::unix::PkexecGateway;
use hostsync::platform::{PrivilegeError, PrivilegeGateway};
use hostsync::writer::staging_path;
use hostsync::{HostEntry, SaveError};

const INPUT: &str = "127.0.0.1 localhost\n10.0.0.1 a.local\n";

fn plain_shell() -> PkexecGateway {
    PkexecGateway::with_command("/bin/sh", Vec::<String>::new())
}

fn exiting_with(code: i32) -> PkexecGateway {
    PkexecGateway::with_command("/bin/sh", ["-c".to_string(), format!("exit {code}")])
}

#[test]
fn one_session_stages_and_promotes() {
    let dir = common::temp_home();
    let hosts = common::engine(dir.path(), INPUT);
    let base = hosts.read().unwrap();
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.2", vec!["b.local".to_string()]));

    let outcome = hosts.save(&base, &edits, &plain_shell()).unwrap();
    assert!(outcome.written);
    assert_eq!(
        common::read_hosts(hosts.path()),
        "127.0.0.1 localhost\n10.0.0.2\tb.local\n10.0.0.1 a.local\n"
    );
    assert_eq!(common::backup_count(&hosts), 1);
    assert!(!staging_path(hosts.path()).exists());
}

#[test]
fn paths_are_quoted_for_the_shell() {
    let dir = common::temp_home();
    let odd = dir.path().join("it's a dir");
    std::fs::create_dir(&odd).unwrap();
    let hosts = common::engine(&odd, INPUT);
    let base = hosts.read().unwrap();
    let edits: Vec<HostEntry> = base
        .entries()
        .iter()
        .filter(|e| !e.has_hostname("a.local"))
        .cloned()
        .collect();

    hosts.save(&base, &edits, &plain_shell()).unwrap();
    assert_eq!(common::read_hosts(hosts.path()), "127.0.0.1 localhost\n");
}

#[test]
fn dismissed_prompt_is_cancelled() {
    let dir = common::temp_home();
    let target = common::write_hosts(dir.path(), INPUT);
    assert!(matches!(
        exiting_with(126).acquire(&target),
        Err(PrivilegeError::Cancelled)
    ));
    assert!(matches!(
        exiting_with(127).acquire(&target),
        Err(PrivilegeError::Denied)
    ));
    assert!(matches!(
        exiting_with(1).acquire(&target),
        Err(PrivilegeError::Unavailable(_))
    ));
}

#[test]
fn cancelled_session_uses_no_backup_slot() {
    let dir = common::temp_home();
    let hosts = common::engine(dir.path(), INPUT);
    let base = hosts.read().unwrap();
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.2", vec!["b.local".to_string()]));

    let err = hosts.save(&base, &edits, &exiting_with(126)).unwrap_err();
    assert!(matches!(err, SaveError::PermissionDenied(_)));
    assert_eq!(common::read_hosts(hosts.path()), INPUT);
    assert_eq!(common::backup_count(&hosts), 0);
}

#[test]
fn missing_program_is_unavailable() {
    let dir = common::temp_home();
    let target = common::write_hosts(dir.path(), INPUT);
    let gateway = PkexecGateway::with_command("/nonexistent/pkexec", ["/bin/sh"]);
    assert!(matches!(
        gateway.acquire(&target),
        Err(PrivilegeError::Unavailable(_))
    ));
}

//! Merging base, current and edits.

use hostsync::classify::{classify, ClassifierPolicy};
use hostsync::parser::{parse, ParserOptions};
use hostsync::reconcile::{
    reconcile, Conflict, ConflictKind, InsertPosition, LostUpdatePolicy, ReconcilePolicy,
    SystemConflictPolicy, SystemEdit, SystemEditPolicy,
};
use hostsync::{HostEntry, Snapshot};

fn load(content: &str) -> Snapshot {
    classify(
        &parse(content.as_bytes(), &ParserOptions::default()),
        &ClassifierPolicy::default(),
    )
}

fn merged(base: &Snapshot, current: &Snapshot, edits: &[HostEntry], policy: &ReconcilePolicy) -> String {
    let r = reconcile(base, current, edits, policy).unwrap();
    String::from_utf8(r.target.to_bytes()).unwrap()
}

fn find<'a>(edits: &'a mut [HostEntry], host: &str) -> &'a mut HostEntry {
    edits.iter_mut().find(|e| e.has_hostname(host)).unwrap()
}

const BASE: &str = "127.0.0.1 localhost\n\n# dev\n10.0.0.1 a.local\n10.0.0.2 b.local\n";

#[test]
fn unchanged_edits_reproduce_the_file() {
    let base = load(BASE);
    let current = load(BASE);
    let r = reconcile(&base, &current, base.entries(), &ReconcilePolicy::default()).unwrap();
    assert_eq!(r.target.to_bytes(), BASE.as_bytes());
    assert!(r.conflicts.is_empty());
    assert_eq!(r.target.expected_fingerprint(), current.fingerprint());
}

#[test]
fn missing_user_entry_is_deleted() {
    let base = load(BASE);
    let edits: Vec<HostEntry> = base
        .entries()
        .iter()
        .filter(|e| !e.has_hostname("a.local"))
        .cloned()
        .collect();
    let out = merged(&base, &load(BASE), &edits, &ReconcilePolicy::default());
    assert_eq!(out, "127.0.0.1 localhost\n\n# dev\n10.0.0.2 b.local\n");
}

#[test]
fn new_entries_go_to_top_of_user_region_in_edit_order() {
    let base = load(BASE);
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.8", vec!["x.local".to_string()]));
    edits.push(HostEntry::new("10.0.0.9", vec!["y.local".to_string()]));
    let out = merged(&base, &load(BASE), &edits, &ReconcilePolicy::default());
    assert_eq!(
        out,
        "127.0.0.1 localhost\n\n# dev\n10.0.0.8\tx.local\n10.0.0.9\ty.local\n10.0.0.1 a.local\n10.0.0.2 b.local\n"
    );
}

#[test]
fn new_entries_at_bottom() {
    let base = load(BASE);
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.8", vec!["x.local".to_string()]));
    let policy = ReconcilePolicy {
        insert_position: InsertPosition::Bottom,
        ..ReconcilePolicy::default()
    };
    let out = merged(&base, &load(BASE), &edits, &policy);
    assert!(out.ends_with("10.0.0.2 b.local\n10.0.0.8\tx.local\n"));
}

#[test]
fn duplicates_are_kept() {
    let base = load(BASE);
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.1", vec!["a.local".to_string()]));
    let out = merged(&base, &load(BASE), &edits, &ReconcilePolicy::default());
    assert_eq!(out.matches("a.local").count(), 2);
}

#[test]
fn toggle_keeps_original_spacing_and_comment() {
    let content = "10.0.0.1   a.local   # note\n";
    let base = load(content);
    let mut edits = base.entries().to_vec();
    find(&mut edits, "a.local").enabled = false;
    let out = merged(&base, &load(content), &edits, &ReconcilePolicy::default());
    assert_eq!(out, "#10.0.0.1   a.local   # note\n");

    let base = load(&out);
    let mut edits = base.entries().to_vec();
    find(&mut edits, "a.local").enabled = true;
    let back = merged(&base, &load(&out), &edits, &ReconcilePolicy::default());
    assert_eq!(back, content);
}

#[test]
fn edited_entry_is_rendered_with_tab() {
    let content = "10.0.0.1   a.local   # note\n";
    let base = load(content);
    let mut edits = base.entries().to_vec();
    find(&mut edits, "a.local").ip = "10.0.0.2".to_string();
    let out = merged(&base, &load(content), &edits, &ReconcilePolicy::default());
    assert_eq!(out, "10.0.0.2\ta.local # note\n");
}

#[test]
fn new_lines_follow_crlf_files() {
    let content = "127.0.0.1 localhost\r\n10.0.0.1 a.local\r\n";
    let base = load(content);
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.8", vec!["x.local".to_string()]));
    let out = merged(&base, &load(content), &edits, &ReconcilePolicy::default());
    assert_eq!(out, "127.0.0.1 localhost\r\n10.0.0.8\tx.local\r\n10.0.0.1 a.local\r\n");
}

#[test]
fn current_system_lines_win_by_default() {
    let base = load(BASE);
    let current = load("127.0.0.1 localhost myhost\n\n# dev\n10.0.0.1 a.local\n10.0.0.2 b.local\n");
    let r = reconcile(&base, &current, base.entries(), &ReconcilePolicy::default()).unwrap();
    let out = String::from_utf8(r.target.to_bytes()).unwrap();
    assert!(out.starts_with("127.0.0.1 localhost myhost\n"));
    assert!(matches!(
        &r.conflicts[..],
        [Conflict::SystemContentChanged { removed, added }]
            if removed == &["127.0.0.1 localhost"] && added == &["127.0.0.1 localhost myhost"]
    ));
}

#[test]
fn system_change_refused_by_policy() {
    let base = load(BASE);
    let current = load("127.0.0.1 localhost myhost\n\n# dev\n10.0.0.1 a.local\n10.0.0.2 b.local\n");
    let policy = ReconcilePolicy {
        system_conflict: SystemConflictPolicy::Refuse,
        ..ReconcilePolicy::default()
    };
    let report = reconcile(&base, &current, base.entries(), &policy).unwrap_err();
    assert_eq!(report.kind, ConflictKind::System);
}

#[test]
fn system_block_added_on_disk_is_kept() {
    let base = load("10.0.0.1 a.local\n");
    let current = load("10.0.0.1 a.local\n\n# Added by Docker Desktop\n192.168.65.2 host.docker.internal\n");
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.8", vec!["x.local".to_string()]));
    let r = reconcile(&base, &current, &edits, &ReconcilePolicy::default()).unwrap();
    let out = String::from_utf8(r.target.to_bytes()).unwrap();
    assert!(out.contains("# Added by Docker Desktop\n192.168.65.2 host.docker.internal\n"));
    assert!(out.contains("10.0.0.8\tx.local\n"));
}

#[test]
fn lost_update_is_reported_and_edits_win() {
    let base = load(BASE);
    let current = load(&format!("{BASE}10.0.0.9 other.local\n"));
    let r = reconcile(&base, &current, base.entries(), &ReconcilePolicy::default()).unwrap();
    assert_eq!(r.target.to_bytes(), BASE.as_bytes());
    assert!(matches!(
        &r.conflicts[..],
        [Conflict::UserContentChanged { removed, added }]
            if removed.is_empty() && added == &["10.0.0.9 other.local"]
    ));
}

#[test]
fn lost_update_refused_by_policy() {
    let base = load(BASE);
    let current = load(&format!("{BASE}10.0.0.9 other.local\n"));
    let policy = ReconcilePolicy {
        lost_update: LostUpdatePolicy::Refuse,
        ..ReconcilePolicy::default()
    };
    let report = reconcile(&base, &current, base.entries(), &policy).unwrap_err();
    assert_eq!(report.kind, ConflictKind::LostUpdate);
}

#[test]
fn deleting_a_system_entry_is_rejected() {
    let base = load(BASE);
    let edits: Vec<HostEntry> = base.entries().iter().filter(|e| !e.is_system).cloned().collect();
    let report = reconcile(&base, &load(BASE), &edits, &ReconcilePolicy::default()).unwrap_err();
    assert_eq!(report.kind, ConflictKind::System);
    assert!(matches!(
        &report.conflicts[..],
        [Conflict::SystemEntryEdit { change: SystemEdit::Removed, ip, .. }] if ip == "127.0.0.1"
    ));
}

#[test]
fn restore_policy_puts_system_entries_back() {
    let base = load(BASE);
    let mut edits = base.entries().to_vec();
    find(&mut edits, "localhost").hostnames = vec!["hijacked.local".to_string()];
    let policy = ReconcilePolicy {
        system_edits: SystemEditPolicy::Restore,
        ..ReconcilePolicy::default()
    };
    let r = reconcile(&base, &load(BASE), &edits, &policy).unwrap();
    assert_eq!(r.target.to_bytes(), BASE.as_bytes());
    assert!(matches!(
        &r.conflicts[..],
        [Conflict::SystemEntryEdit { change: SystemEdit::Modified, .. }]
    ));
}

#[test]
fn toggling_system_entry_needs_permission() {
    let base = load(BASE);
    let mut edits = base.entries().to_vec();
    find(&mut edits, "localhost").enabled = false;

    let report = reconcile(&base, &load(BASE), &edits, &ReconcilePolicy::default()).unwrap_err();
    assert!(matches!(
        &report.conflicts[..],
        [Conflict::SystemEntryEdit { change: SystemEdit::Toggled, .. }]
    ));

    let policy = ReconcilePolicy {
        allow_system_toggle: true,
        ..ReconcilePolicy::default()
    };
    let out = merged(&base, &load(BASE), &edits, &policy);
    assert!(out.starts_with("#127.0.0.1 localhost\n"));
}

#[test]
fn toggle_of_vanished_system_entry_is_dropped() {
    let base = load(BASE);
    let current = load("127.0.0.1 localhost.localdomain\n\n# dev\n10.0.0.1 a.local\n10.0.0.2 b.local\n");
    let mut edits = base.entries().to_vec();
    find(&mut edits, "localhost").enabled = false;
    let policy = ReconcilePolicy {
        allow_system_toggle: true,
        ..ReconcilePolicy::default()
    };
    let r = reconcile(&base, &current, &edits, &policy).unwrap();
    let out = String::from_utf8(r.target.to_bytes()).unwrap();
    assert!(out.starts_with("127.0.0.1 localhost.localdomain\n"));
    assert!(r
        .conflicts
        .iter()
        .any(|c| matches!(c, Conflict::SystemEntryVanished { .. })));
}

#[test]
fn new_entry_after_marker_block_is_kept_out_of_it() {
    let content = "127.0.0.1 localhost\n\n# Added by Docker Desktop\n192.168.65.2 host.docker.internal\n";
    let base = load(content);
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.8", vec!["x.local".to_string()]));
    let out = merged(&base, &load(content), &edits, &ReconcilePolicy::default());
    assert_eq!(out, format!("{content}\n10.0.0.8\tx.local\n"));

    let reread = load(&out);
    let added = reread.entries().iter().find(|e| e.has_hostname("x.local")).unwrap();
    assert!(!added.is_system);
}

#[test]
fn separator_follows_crlf_files() {
    let content = "# Added by Docker Desktop\r\n192.168.65.2 host.docker.internal\r\n";
    let base = load(content);
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.8", vec!["x.local".to_string()]));
    let out = merged(&base, &load(content), &edits, &ReconcilePolicy::default());
    assert_eq!(out, format!("{content}\r\n10.0.0.8\tx.local\r\n"));
}

#[test]
fn protected_entry_needs_no_separator() {
    let base = load("127.0.0.1 localhost\n");
    let mut edits = base.entries().to_vec();
    edits.push(HostEntry::new("10.0.0.8", vec!["x.local".to_string()]));
    let out = merged(&base, &load("127.0.0.1 localhost\n"), &edits, &ReconcilePolicy::default());
    assert_eq!(out, "127.0.0.1 localhost\n10.0.0.8\tx.local\n");
}

#[test]
fn target_lines_carry_entry_ids() {
    let base = load(BASE);
    let mut edits = base.entries().to_vec();
    let added = HostEntry::new("10.0.0.8", vec!["x.local".to_string()]);
    edits.push(added.clone());
    // Re-read from disk: same text, fresh ids.
    let current = load(BASE);
    let r = reconcile(&base, &current, &edits, &ReconcilePolicy::default()).unwrap();

    let id_of = |host: &str| {
        let index = r
            .target
            .lines()
            .iter()
            .position(|l| l.text().is_some_and(|t| t.contains(host)))
            .unwrap();
        r.target.entry_id(index)
    };
    let base_id = |host: &str| base.entries().iter().find(|e| e.has_hostname(host)).map(|e| e.id);
    assert_eq!(id_of("localhost"), base_id("localhost"));
    assert_eq!(id_of("a.local"), base_id("a.local"));
    assert_eq!(id_of("x.local"), Some(added.id));
    assert_eq!(id_of("# dev"), None);
}

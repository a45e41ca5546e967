//! Merge base snapshot, fresh on-disk snapshot and caller edits into the lines to write.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

use crate::model::{EntryId, Fingerprint, HostEntry, LineEnding, LineKind, LineRecord, Snapshot};
use crate::writer;

/// What to do when system-owned lines changed on disk since the base was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemConflictPolicy {
    /// Keep the on-disk system lines verbatim and report the change.
    #[default]
    CurrentWins,
    Refuse,
}

/// What to do when user-owned lines changed on disk since the base was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LostUpdatePolicy {
    /// The caller's edits replace the concurrent changes; the conflict is still reported.
    #[default]
    LastWriterWins,
    Refuse,
}

/// What to do when edits delete or alter a system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemEditPolicy {
    #[default]
    Reject,
    /// Write the system entry back unchanged and report the attempt.
    Restore,
}

/// Where new entries go within the user region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsertPosition {
    #[default]
    Top,
    Bottom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilePolicy {
    pub system_conflict: SystemConflictPolicy,
    pub lost_update: LostUpdatePolicy,
    pub system_edits: SystemEditPolicy,
    pub insert_position: InsertPosition,
    /// Permit enabling/disabling system entries (their IP and hostnames stay fixed).
    pub allow_system_toggle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemEdit {
    Removed,
    Modified,
    Toggled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Conflict {
    /// System-owned lines differ between base and disk.
    SystemContentChanged { removed: Vec<String>, added: Vec<String> },
    /// User-owned lines differ between base and disk.
    UserContentChanged { removed: Vec<String>, added: Vec<String> },
    /// Edits tried to change a system entry.
    SystemEntryEdit {
        id: EntryId,
        ip: String,
        hostnames: Vec<String>,
        change: SystemEdit,
    },
    /// A toggled system entry is no longer on disk; the toggle was dropped.
    SystemEntryVanished {
        id: EntryId,
        ip: String,
        hostnames: Vec<String>,
    },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::SystemContentChanged { removed, added } => write!(
                f,
                "system-owned lines changed on disk ({} removed, {} added)",
                removed.len(),
                added.len()
            ),
            Conflict::UserContentChanged { removed, added } => write!(
                f,
                "entries were edited elsewhere since load ({} removed, {} added)",
                removed.len(),
                added.len()
            ),
            Conflict::SystemEntryEdit {
                ip,
                hostnames,
                change,
                ..
            } => {
                let what = match change {
                    SystemEdit::Removed => "removed",
                    SystemEdit::Modified => "modified",
                    SystemEdit::Toggled => "enabled or disabled",
                };
                write!(f, "system entry {ip} {} cannot be {what}", hostnames.join(" "))
            }
            Conflict::SystemEntryVanished { ip, hostnames, .. } => write!(
                f,
                "system entry {ip} {} is no longer on disk",
                hostnames.join(" ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    System,
    LostUpdate,
}

/// Conflicts that stopped a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub kind: ConflictKind,
    pub conflicts: Vec<Conflict>,
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.conflicts.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ConflictReport {}

/// Full line sequence to write, tied to the on-disk state it was computed against.
#[derive(Debug, Clone)]
pub struct TargetState {
    lines: Vec<LineRecord>,
    /// Entry each line was written for, parallel to `lines`.
    ids: Vec<Option<EntryId>>,
    expected: Fingerprint,
}

impl TargetState {
    pub fn lines(&self) -> &[LineRecord] {
        &self.lines
    }

    /// Id of the edit or base entry line `index` was written for.
    pub fn entry_id(&self, index: usize) -> Option<EntryId> {
        self.ids.get(index).copied().flatten()
    }

    /// Fingerprint the file must still have when the write happens.
    pub fn expected_fingerprint(&self) -> &Fingerprint {
        &self.expected
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        writer::serialize(&self.lines)
    }
}

/// Successful reconciliation plus the conflicts resolved by policy.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub target: TargetState,
    pub conflicts: Vec<Conflict>,
}

/// Merge `edits` (keyed against `base`) with the freshly read `current`.
pub fn reconcile(
    base: &Snapshot,
    current: &Snapshot,
    edits: &[HostEntry],
    policy: &ReconcilePolicy,
) -> Result<Reconciled, ConflictReport> {
    let mut edits_by_id: HashMap<EntryId, &HostEntry> = HashMap::new();
    for e in edits {
        edits_by_id.entry(e.id).or_insert(e);
    }
    let mut conflicts = Vec::new();

    let base_sys: Vec<&[u8]> = base.system_lines().map(|l| l.raw.as_slice()).collect();
    let cur_sys: Vec<&[u8]> = current.system_lines().map(|l| l.raw.as_slice()).collect();
    if base_sys != cur_sys {
        let (removed, added) = line_diff(&base_sys, &cur_sys);
        let c = Conflict::SystemContentChanged { removed, added };
        warn!(conflict = %c, "external change to system-owned lines");
        conflicts.push(c);
        if policy.system_conflict == SystemConflictPolicy::Refuse {
            return Err(ConflictReport {
                kind: ConflictKind::System,
                conflicts,
            });
        }
    }

    // System entries may only be toggled, and only when the policy allows it.
    let mut toggles: Vec<(&HostEntry, bool)> = Vec::new();
    let mut violations = Vec::new();
    for entry in base.entries().iter().filter(|e| e.is_system) {
        let change = match edits_by_id.get(&entry.id) {
            None => Some(SystemEdit::Removed),
            Some(edit) if !edit.same_mapping(entry) => Some(SystemEdit::Modified),
            Some(edit) if edit.enabled != entry.enabled => {
                if policy.allow_system_toggle {
                    toggles.push((entry, edit.enabled));
                    None
                } else {
                    Some(SystemEdit::Toggled)
                }
            }
            Some(_) => None,
        };
        if let Some(change) = change {
            violations.push(Conflict::SystemEntryEdit {
                id: entry.id,
                ip: entry.ip.clone(),
                hostnames: entry.hostnames.clone(),
                change,
            });
        }
    }
    if !violations.is_empty() {
        conflicts.extend(violations);
        if policy.system_edits == SystemEditPolicy::Reject {
            return Err(ConflictReport {
                kind: ConflictKind::System,
                conflicts,
            });
        }
        warn!("restoring system entries the edits tried to change");
    }

    let base_user: Vec<&[u8]> = base.user_lines().map(|l| l.raw.as_slice()).collect();
    let cur_user: Vec<&[u8]> = current.user_lines().map(|l| l.raw.as_slice()).collect();
    if base_user != cur_user {
        let (removed, added) = line_diff(&base_user, &cur_user);
        let c = Conflict::UserContentChanged { removed, added };
        warn!(conflict = %c, "lost update: hosts file edited concurrently");
        conflicts.push(c);
        if policy.lost_update == LostUpdatePolicy::Refuse {
            return Err(ConflictReport {
                kind: ConflictKind::LostUpdate,
                conflicts,
            });
        }
    }

    let marker = base.disable_marker();
    let ending = current.line_ending();

    let mut blocks = system_blocks(base, current);
    apply_toggles(&mut blocks, &toggles, marker, &mut conflicts);
    let runs = user_runs(base, &edits_by_id, marker, ending);

    let mut slots = interleave(blocks, runs);

    let base_ids: HashSet<EntryId> = base.entries().iter().map(|e| e.id).collect();
    let mut inserted = HashSet::new();
    let mut new_slots: Vec<Slot> = edits
        .iter()
        .filter(|e| !base_ids.contains(&e.id) && inserted.insert(e.id))
        .map(|e| {
            let line = LineRecord {
                index: 0,
                kind: LineKind::Entry,
                raw: writer::render_entry(e, marker, ending),
                system: false,
            };
            (line, Some(e.id))
        })
        .collect();
    if !new_slots.is_empty() {
        let at = insertion_point(&slots, policy.insert_position);
        // A marker block runs until a blank line; new entries must not join it.
        if ends_in_marker_block(&slots[..at]) {
            let raw = match ending {
                LineEnding::CrLf => b"\r".to_vec(),
                LineEnding::Lf => Vec::new(),
            };
            let blank = LineRecord {
                index: 0,
                kind: LineKind::Blank,
                raw,
                system: false,
            };
            new_slots.insert(0, (blank, None));
        }
        slots.splice(at..at, new_slots);
    }

    let (mut lines, ids): (Vec<LineRecord>, Vec<Option<EntryId>>) = slots.into_iter().unzip();
    for (i, line) in lines.iter_mut().enumerate() {
        line.index = i;
    }
    debug!(
        lines = lines.len(),
        conflicts = conflicts.len(),
        "reconciled target state"
    );

    Ok(Reconciled {
        target: TargetState {
            lines,
            ids,
            expected: *current.fingerprint(),
        },
        conflicts,
    })
}

/// Multiset difference: lines only in `before`, lines only in `after`.
fn line_diff(before: &[&[u8]], after: &[&[u8]]) -> (Vec<String>, Vec<String>) {
    let mut counts: HashMap<&[u8], isize> = HashMap::new();
    for l in before {
        *counts.entry(l).or_default() += 1;
    }
    for l in after {
        *counts.entry(l).or_default() -= 1;
    }
    let mut removed = Vec::new();
    let mut added = Vec::new();
    for l in before {
        if let Some(n) = counts.get_mut(l) {
            if *n > 0 {
                *n -= 1;
                removed.push(String::from_utf8_lossy(l).into_owned());
            }
        }
    }
    for l in after {
        if let Some(n) = counts.get_mut(l) {
            if *n < 0 {
                *n += 1;
                added.push(String::from_utf8_lossy(l).into_owned());
            }
        }
    }
    (removed, added)
}

/// An output line and the entry it was written for.
type Slot = (LineRecord, Option<EntryId>);

/// Contiguous runs of system-owned lines in `current`, in file order.
///
/// An entry line keeps the id of the base system entry with the same text, so
/// callers holding the base see the same ids after the save.
fn system_blocks(base: &Snapshot, current: &Snapshot) -> Vec<Vec<Slot>> {
    let mut base_entries: Vec<(&[u8], EntryId)> = base
        .entries()
        .iter()
        .filter(|e| e.is_system)
        .filter_map(|e| base.line_of(&e.id).map(|l| (l.raw.as_slice(), e.id)))
        .collect();

    let mut blocks: Vec<Vec<Slot>> = Vec::new();
    let mut prev_system = false;
    for line in current.lines() {
        if line.system {
            if !prev_system {
                blocks.push(Vec::new());
            }
            let id = current.entry_at_line(line.index).map(|entry| {
                match base_entries.iter().position(|(raw, _)| *raw == line.raw.as_slice()) {
                    Some(i) => base_entries.remove(i).1,
                    None => entry.id,
                }
            });
            if let Some(block) = blocks.last_mut() {
                block.push((line.clone(), id));
            }
        }
        prev_system = line.system;
    }
    blocks
}

fn apply_toggles(
    blocks: &mut [Vec<Slot>],
    toggles: &[(&HostEntry, bool)],
    marker: &str,
    conflicts: &mut Vec<Conflict>,
) {
    for (entry, enable) in toggles {
        let slot = blocks
            .iter_mut()
            .flatten()
            .find(|(l, id)| l.kind == LineKind::Entry && *id == Some(entry.id));
        match slot {
            Some((line, _)) => {
                if let Some(raw) = writer::toggle_line(&line.raw, *enable, marker) {
                    line.raw = raw;
                }
            }
            None => {
                let c = Conflict::SystemEntryVanished {
                    id: entry.id,
                    ip: entry.ip.clone(),
                    hostnames: entry.hostnames.clone(),
                };
                warn!(conflict = %c, "dropping toggle");
                conflicts.push(c);
            }
        }
    }
}

/// Run of user-owned lines from the base, placed after `anchor` system blocks.
struct UserRun {
    anchor: usize,
    lines: Vec<Slot>,
}

fn user_runs(
    base: &Snapshot,
    edits: &HashMap<EntryId, &HostEntry>,
    marker: &str,
    ending: LineEnding,
) -> Vec<UserRun> {
    let mut runs: Vec<UserRun> = Vec::new();
    let mut blocks_seen = 0;
    let mut prev_system = false;
    for line in base.lines() {
        if line.system {
            if !prev_system {
                blocks_seen += 1;
            }
            prev_system = true;
            continue;
        }
        if prev_system || runs.is_empty() {
            runs.push(UserRun {
                anchor: blocks_seen,
                lines: Vec::new(),
            });
        }
        prev_system = false;

        let emitted = match (line.kind, base.entry_at_line(line.index)) {
            (LineKind::Entry, Some(entry)) => match edits.get(&entry.id) {
                // Missing from the edit set: deleted.
                None => None,
                Some(edit) => {
                    let line = LineRecord {
                        index: 0,
                        kind: LineKind::Entry,
                        raw: edited_line(line, entry, edit, marker, ending),
                        system: false,
                    };
                    Some((line, Some(entry.id)))
                }
            },
            _ => {
                let line = LineRecord {
                    system: false,
                    ..line.clone()
                };
                Some((line, None))
            }
        };
        if let (Some(slot), Some(run)) = (emitted, runs.last_mut()) {
            run.lines.push(slot);
        }
    }
    runs
}

/// Keep the original text when nothing changed, flip the marker when only the
/// enabled flag changed, otherwise render the entry afresh.
fn edited_line(
    line: &LineRecord,
    original: &HostEntry,
    edit: &HostEntry,
    marker: &str,
    ending: LineEnding,
) -> Vec<u8> {
    if edit.same_mapping(original) {
        if edit.enabled == original.enabled {
            return line.raw.clone();
        }
        if let Some(raw) = writer::toggle_line(&line.raw, edit.enabled, marker) {
            return raw;
        }
    }
    let ending = if line.raw.last() == Some(&b'\r') {
        LineEnding::CrLf
    } else {
        ending
    };
    writer::render_entry(edit, marker, ending)
}

fn interleave(blocks: Vec<Vec<Slot>>, runs: Vec<UserRun>) -> Vec<Slot> {
    let mut runs = runs.into_iter().peekable();
    let mut out = Vec::new();
    for (i, block) in blocks.into_iter().enumerate() {
        while let Some(run) = runs.next_if(|r| r.anchor <= i) {
            out.extend(run.lines);
        }
        out.extend(block);
    }
    // Runs anchored past the last current block (or all runs, when there are no blocks).
    for run in runs {
        out.extend(run.lines);
    }
    out
}

fn insertion_point(slots: &[Slot], position: InsertPosition) -> usize {
    let is_user_entry = |(l, _): &Slot| l.kind == LineKind::Entry && !l.system;
    match position {
        InsertPosition::Top => slots.iter().position(is_user_entry),
        InsertPosition::Bottom => slots.iter().rposition(is_user_entry).map(|i| i + 1),
    }
    .unwrap_or(slots.len())
}

/// Whether `before` ends inside a marker block: the trailing run of non-blank
/// system lines holds a comment. Runs of protected entries alone do not count.
fn ends_in_marker_block(before: &[Slot]) -> bool {
    before
        .iter()
        .rev()
        .take_while(|(l, _)| l.system && l.kind != LineKind::Blank)
        .any(|(l, _)| matches!(l.kind, LineKind::Comment | LineKind::Malformed))
}

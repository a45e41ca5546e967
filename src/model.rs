//! Line records, host entries and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// What a physical line of the hosts file turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    Entry,
    Comment,
    Blank,
    Malformed,
}

/// One physical line as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub index: usize,
    pub kind: LineKind,
    /// Line bytes without the terminating `\n`. A `\r` is kept.
    pub raw: Vec<u8>,
    /// Set by the classifier.
    pub system: bool,
}

impl LineRecord {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.raw).ok()
    }

    pub fn display(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }
}

/// Opaque per-session entry identifier, minted when a line is parsed or an entry is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Editable mapping surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEntry {
    pub id: EntryId,
    pub ip: String,
    pub hostnames: Vec<String>,
    pub enabled: bool,
    pub is_system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl HostEntry {
    /// New enabled, user-owned entry with a fresh id.
    pub fn new(ip: impl Into<String>, hostnames: Vec<String>) -> Self {
        Self {
            id: EntryId::mint(),
            ip: ip.into(),
            hostnames,
            enabled: true,
            is_system: false,
            comment: None,
        }
    }

    /// Hostnames joined the way they appear on one line.
    pub fn domain(&self) -> String {
        self.hostnames.join(" ")
    }

    pub fn has_hostname(&self, name: &str) -> bool {
        self.hostnames.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Same IP, hostnames and comment; ignores `enabled` and ownership.
    pub fn same_mapping(&self, other: &HostEntry) -> bool {
        self.ip == other.ip && self.hostnames == other.hostnames && self.comment == other.comment
    }

    /// Check the entry can be written back as a single well-formed line.
    pub fn validate(&self) -> Result<(), String> {
        if self.ip.parse::<IpAddr>().is_err() {
            return Err(format!("invalid IP address {:?}", self.ip));
        }
        if self.hostnames.is_empty() {
            return Err("at least one hostname is required".to_string());
        }
        for h in &self.hostnames {
            if h.is_empty() {
                return Err("empty hostname".to_string());
            }
            if h.chars().any(|c| c.is_whitespace() || c == '#') {
                return Err(format!("hostname {h:?} contains whitespace or '#'"));
            }
        }
        if let Some(c) = &self.comment {
            if c.contains(['\n', '\r']) {
                return Err("comment spans multiple lines".to_string());
            }
        }
        Ok(())
    }
}

/// SHA-256 of the raw file bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// Dominant ending among the given lines (ties go to LF).
    pub fn detect(lines: &[LineRecord]) -> Self {
        let crlf = lines.iter().filter(|l| l.raw.last() == Some(&b'\r')).count();
        if crlf * 2 > lines.len() {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }
}

/// Immutable parse of the whole file at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) lines: Vec<LineRecord>,
    pub(crate) entries: Vec<HostEntry>,
    /// `entries[i]` was derived from `lines[entry_lines[i]]`; ascending.
    pub(crate) entry_lines: Vec<usize>,
    pub(crate) fingerprint: Fingerprint,
    pub(crate) read_at: DateTime<Utc>,
    pub(crate) line_ending: LineEnding,
    pub(crate) disable_marker: String,
}

impl Snapshot {
    pub fn lines(&self) -> &[LineRecord] {
        &self.lines
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn disable_marker(&self) -> &str {
        &self.disable_marker
    }

    pub fn entry(&self, id: &EntryId) -> Option<&HostEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Line an entry was parsed from.
    pub fn line_of(&self, id: &EntryId) -> Option<&LineRecord> {
        let pos = self.entries.iter().position(|e| &e.id == id)?;
        self.lines.get(self.entry_lines[pos])
    }

    /// Entry parsed from the line at `index`, if that line is an entry.
    pub fn entry_at_line(&self, index: usize) -> Option<&HostEntry> {
        self.entry_lines
            .binary_search(&index)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    pub fn system_lines(&self) -> impl Iterator<Item = &LineRecord> {
        self.lines.iter().filter(|l| l.system)
    }

    pub fn user_lines(&self) -> impl Iterator<Item = &LineRecord> {
        self.lines.iter().filter(|l| !l.system)
    }

    pub fn malformed_lines(&self) -> impl Iterator<Item = &LineRecord> {
        self.lines.iter().filter(|l| l.kind == LineKind::Malformed)
    }

    /// Give entries the ids of the lines they were written from, so a save's
    /// result carries the caller's ids forward. Lines without one keep theirs.
    pub(crate) fn adopt_ids(&mut self, id_at: impl Fn(usize) -> Option<EntryId>) {
        let mut taken = HashSet::new();
        for (entry, &line) in self.entries.iter_mut().zip(self.entry_lines.iter()) {
            if let Some(id) = id_at(line).filter(|id| taken.insert(*id)) {
                entry.id = id;
            }
        }
    }

    /// Serialize the unmodified snapshot.
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::writer::serialize(&self.lines)
    }
}

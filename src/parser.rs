//! Hosts file line parser.
//!
//! Parsing never fails: anything that is not a blank line, a comment or a
//! recognizable mapping is kept as a `Malformed` record and written back
//! byte-for-byte.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::debug;

use crate::model::{EntryId, Fingerprint, HostEntry, LineEnding, LineKind, LineRecord, Snapshot};

/// Prefix that turns a mapping into a disabled entry.
pub const DEFAULT_DISABLE_MARKER: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Prefix of a disabled mapping. `#10.0.0.1 a.local` is a disabled entry,
    /// `# 10.0.0.1 a.local` (space after the marker) stays an ordinary comment.
    pub disable_marker: String,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            disable_marker: DEFAULT_DISABLE_MARKER.to_string(),
        }
    }
}

/// Mapping fields found on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub ip: String,
    pub hostnames: Vec<String>,
    pub comment: Option<String>,
}

/// Parse raw file bytes into a snapshot. All entries come out user-owned;
/// run the classifier to mark system entries.
pub fn parse(bytes: &[u8], options: &ParserOptions) -> Snapshot {
    let mut raws: Vec<&[u8]> = bytes.split(|b| *b == b'\n').collect();
    // `split` yields a trailing empty slice after the final newline (or for empty input).
    if raws.last().is_some_and(|l| l.is_empty()) {
        raws.pop();
    }

    let mut lines = Vec::with_capacity(raws.len());
    let mut entries = Vec::new();
    let mut entry_lines = Vec::new();

    for (index, raw) in raws.into_iter().enumerate() {
        let (kind, parsed) = parse_line(raw, &options.disable_marker);
        if let Some((mapping, enabled)) = parsed {
            entries.push(HostEntry {
                id: EntryId::mint(),
                ip: mapping.ip,
                hostnames: mapping.hostnames,
                enabled,
                is_system: false,
                comment: mapping.comment,
            });
            entry_lines.push(index);
        }
        lines.push(LineRecord {
            index,
            kind,
            raw: raw.to_vec(),
            system: false,
        });
    }

    debug!(
        lines = lines.len(),
        entries = entries.len(),
        malformed = lines.iter().filter(|l| l.kind == LineKind::Malformed).count(),
        "parsed hosts file"
    );

    let line_ending = LineEnding::detect(&lines);
    Snapshot {
        lines,
        entries,
        entry_lines,
        fingerprint: Fingerprint::of(bytes),
        read_at: Utc::now(),
        line_ending,
        disable_marker: options.disable_marker.clone(),
    }
}

/// Kind of a single line plus its mapping (and enabled flag) when it is an entry.
pub fn parse_line(raw: &[u8], disable_marker: &str) -> (LineKind, Option<(Mapping, bool)>) {
    let Ok(text) = std::str::from_utf8(raw) else {
        return (LineKind::Malformed, None);
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (LineKind::Blank, None);
    }

    if !disable_marker.is_empty() {
        if let Some(rest) = trimmed.strip_prefix(disable_marker) {
            if !rest.starts_with(char::is_whitespace) {
                if let Some(mapping) = parse_mapping(rest) {
                    return (LineKind::Entry, Some((mapping, false)));
                }
            }
        }
    }

    if trimmed.starts_with('#') {
        return (LineKind::Comment, None);
    }

    match parse_mapping(trimmed) {
        Some(mapping) => (LineKind::Entry, Some((mapping, true))),
        None => (LineKind::Malformed, None),
    }
}

/// `<ip> <hostname>... [# comment]`
pub fn parse_mapping(s: &str) -> Option<Mapping> {
    let (body, comment) = match s.split_once('#') {
        Some((body, comment)) => {
            let comment = comment.trim();
            (body, (!comment.is_empty()).then(|| comment.to_string()))
        }
        None => (s, None),
    };
    let mut tokens = body.split_whitespace();
    let ip = tokens.next()?;
    ip.parse::<IpAddr>().ok()?;
    let hostnames: Vec<String> = tokens.map(String::from).collect();
    if hostnames.is_empty() {
        return None;
    }
    Some(Mapping {
        ip: ip.to_string(),
        hostnames,
        comment,
    })
}

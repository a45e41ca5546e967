//! System vs user ownership of hosts entries.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::{debug, warn};

use crate::model::{LineKind, Snapshot};

/// Sentinels written by tools that manage a block of the hosts file.
pub const DEFAULT_SYSTEM_MARKERS: &[&str] = &[
    "# Added by Docker Desktop",
    "# The following lines are desirable for IPv6 capable hosts",
];

/// Loopback and broadcast addresses whose first mapping must survive.
pub const DEFAULT_PROTECTED_ADDRESSES: &[&str] = &["127.0.0.1", "::1", "255.255.255.255"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierPolicy {
    /// Comment lines that open a system-owned block. The block runs until the
    /// next blank line or the next marker.
    pub system_markers: Vec<String>,
    /// First entry mapping each of these addresses is system-owned.
    pub protected_addresses: Vec<String>,
    /// Leading lines that are system-owned unconditionally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_n_lines_protected: Option<usize>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            system_markers: DEFAULT_SYSTEM_MARKERS.iter().map(|s| s.to_string()).collect(),
            protected_addresses: DEFAULT_PROTECTED_ADDRESSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            first_n_lines_protected: None,
        }
    }
}

impl ClassifierPolicy {
    /// Policy that protects nothing.
    pub fn none() -> Self {
        Self {
            system_markers: Vec::new(),
            protected_addresses: Vec::new(),
            first_n_lines_protected: None,
        }
    }

    fn is_marker(&self, text: &str) -> bool {
        let text = text.trim();
        self.system_markers.iter().any(|m| m.trim() == text)
    }
}

/// Return a copy of `snapshot` with system-owned lines and entries flagged.
pub fn classify(snapshot: &Snapshot, policy: &ClassifierPolicy) -> Snapshot {
    let protected: Vec<IpAddr> = policy
        .protected_addresses
        .iter()
        .filter_map(|a| match a.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(address = %a, "ignoring unparsable protected address");
                None
            }
        })
        .collect();

    let mut out = snapshot.clone();
    let mut seen_protected: HashSet<IpAddr> = HashSet::new();
    let mut in_block = false;

    for line in out.lines.iter_mut() {
        let mut system = policy
            .first_n_lines_protected
            .is_some_and(|n| line.index < n);

        match line.kind {
            LineKind::Blank => in_block = false,
            LineKind::Comment | LineKind::Malformed => {
                if line.text().is_some_and(|t| policy.is_marker(t)) {
                    in_block = true;
                    system = true;
                } else if in_block {
                    system = true;
                }
            }
            LineKind::Entry => {
                if in_block {
                    system = true;
                }
                let ip = snapshot
                    .entry_at_line(line.index)
                    .and_then(|e| e.ip.parse::<IpAddr>().ok());
                if let Some(ip) = ip {
                    // Only the first textual occurrence of a protected address counts.
                    if protected.contains(&ip) && seen_protected.insert(ip) {
                        system = true;
                    }
                }
            }
        }
        line.system = system;
    }

    for (entry, &line) in out.entries.iter_mut().zip(out.entry_lines.iter()) {
        entry.is_system = out.lines[line].system;
    }

    debug!(
        system = out.entries.iter().filter(|e| e.is_system).count(),
        user = out.entries.iter().filter(|e| !e.is_system).count(),
        "classified entries"
    );
    out
}

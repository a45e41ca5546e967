//! Check command: health checks for the hosts file, config and backups.

use crate::config::{Config, Paths};
use crate::hosts::HostsFile;

/// Result of a single check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub ok: bool,
    pub message: String,
}

impl CheckResult {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Run all checks. Individual failures are reported as results, never as errors.
pub fn run_checks(paths: &Paths) -> Vec<CheckResult> {
    let mut results = Vec::new();

    // 1. Config parses
    let config = match Config::load(paths) {
        Ok(c) => {
            let what = if paths.config_file.is_file() {
                format!("Config {} is valid", paths.config_file.display())
            } else {
                "No config file, using defaults. Run 'hostsync init' to write one.".to_string()
            };
            results.push(CheckResult::pass(what));
            c
        }
        Err(e) => {
            results.push(CheckResult::fail(format!(
                "Config {} is invalid: {e:#}",
                paths.config_file.display()
            )));
            Config::default()
        }
    };
    let hosts = HostsFile::from_config(&config, paths);
    let path = hosts.path().display().to_string();

    // 2. Hosts file readable and parsed
    let bytes = match std::fs::read(hosts.path()) {
        Ok(b) => b,
        Err(e) => {
            results.push(CheckResult::fail(format!("Cannot read {path}: {e}")));
            return results;
        }
    };
    let snapshot = hosts.load(&bytes);
    let system = snapshot.entries().iter().filter(|e| e.is_system).count();
    results.push(CheckResult::pass(format!(
        "{path}: {} entries ({system} system, {} user)",
        snapshot.entries().len(),
        snapshot.entries().len() - system
    )));

    // 3. Lines the parser does not understand are kept, but worth knowing about
    let malformed: Vec<String> = snapshot
        .malformed_lines()
        .map(|l| (l.index + 1).to_string())
        .collect();
    if !malformed.is_empty() {
        results.push(CheckResult::pass(format!(
            "{} unrecognized line(s) will be kept verbatim: line {}",
            malformed.len(),
            malformed.join(", ")
        )));
    }

    // 4. Unmodified snapshot serializes back to the same bytes
    let round_trip = snapshot.to_bytes();
    if round_trip == bytes {
        results.push(CheckResult::pass("Round-trip is lossless"));
    } else if bytes.last() != Some(&b'\n') && round_trip[..round_trip.len() - 1] == bytes[..] {
        results.push(CheckResult::pass(
            "File lacks a trailing newline; the next save will add one",
        ));
    } else {
        results.push(CheckResult::fail(
            "Round-trip differs from the file on disk; saving may rewrite unrelated lines",
        ));
    }

    // 5. Backups
    match hosts.backups().list() {
        Ok(list) => {
            let newest = list
                .first()
                .map(|b| format!(", newest {}", b.id))
                .unwrap_or_default();
            results.push(CheckResult::pass(format!(
                "{} of {} backup(s) kept in {}{newest}",
                list.len(),
                hosts.backups().retention(),
                hosts.backups().dir().display()
            )));
        }
        Err(e) => results.push(CheckResult::fail(format!("Cannot list backups: {e}"))),
    }

    // 6. Whether saves will need elevation
    if crate::platform::can_write(hosts.path()) {
        results.push(CheckResult::pass(format!("{path} is writable")));
    } else {
        results.push(CheckResult::pass(format!(
            "{path} is not writable by this user; saves will ask for elevation"
        )));
    }

    results
}

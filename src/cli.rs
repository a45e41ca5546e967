//! CLI definitions and command routing.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::backup::BackupId;
use crate::config::Paths;
use crate::hosts::{HostsFile, SaveOutcome};
use crate::model::{EntryId, HostEntry, Snapshot};
use crate::store;

#[derive(Parser)]
#[command(name = "hostsync")]
#[command(about = "Safe, backed-up edits to the system hosts file")]
pub struct Cli {
    /// Debug logging on stderr (HOSTSYNC_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory and write a default config.toml
    Init,

    /// List hosts entries (system entries are marked)
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a mapping of an IP to one or more hostnames
    Add {
        ip: String,
        #[arg(required = true, num_args = 1..)]
        hostnames: Vec<String>,
        /// Write the entry commented out
        #[arg(long)]
        disabled: bool,
        /// Trailing comment for the line
        #[arg(long)]
        comment: Option<String>,
    },

    /// Remove a hostname; entries left without hostnames are deleted
    Remove { hostname: String },

    /// Enable every entry mapping a hostname
    Enable { hostname: String },

    /// Disable (comment out) every entry mapping a hostname
    Disable { hostname: String },

    /// Manage backups of the hosts file (list, restore)
    Backup {
        #[command(subcommand)]
        cmd: BackupCmd,
    },

    /// Check the hosts file, config and backups
    Check,
}

#[derive(Subcommand)]
pub enum BackupCmd {
    /// List backups, most recent first
    List,
    /// Write a backup back over the hosts file
    Restore { id: String },
}

/// Run CLI and dispatch to handlers.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::logging::init(cli.verbose);
    let paths = Paths::default_paths();

    match cli.command {
        Commands::Init => cmd_init(&paths),
        Commands::List { json } => cmd_list(&paths, json),
        Commands::Add {
            ip,
            hostnames,
            disabled,
            comment,
        } => {
            let hosts = store::open_hosts(&paths)?;
            let base = read(&hosts)?;
            let mut entry = HostEntry::new(ip, hostnames);
            entry.enabled = !disabled;
            entry.comment = comment;
            let summary = format!("{}\t{}", entry.ip, entry.domain());
            let mut edits = base.entries().to_vec();
            edits.push(entry);
            let outcome = save(&hosts, &base, &edits)?;
            report(&outcome, &format!("Added: {summary}"));
            Ok(())
        }
        Commands::Remove { hostname } => {
            let hosts = store::open_hosts(&paths)?;
            let base = read(&hosts)?;
            let matched = matching(&base, &hostname)?;
            let edits: Vec<HostEntry> = base
                .entries()
                .iter()
                .filter_map(|e| {
                    if !matched.contains(&e.id) {
                        return Some(e.clone());
                    }
                    let mut e = e.clone();
                    e.hostnames.retain(|h| !h.eq_ignore_ascii_case(&hostname));
                    (!e.hostnames.is_empty()).then_some(e)
                })
                .collect();
            let outcome = save(&hosts, &base, &edits)?;
            report(&outcome, &format!("Removed: {hostname}"));
            Ok(())
        }
        Commands::Enable { hostname } => cmd_toggle(&paths, &hostname, true),
        Commands::Disable { hostname } => cmd_toggle(&paths, &hostname, false),
        Commands::Backup { cmd } => cmd_backup(&paths, cmd),
        Commands::Check => {
            let results = crate::doctor::run_checks(&paths);
            for r in &results {
                let mark = if r.ok { "ok" } else { "FAIL" };
                println!("[{mark}] {}", r.message);
            }
            if results.iter().any(|r| !r.ok) {
                bail!("some checks failed");
            }
            Ok(())
        }
    }
}

fn cmd_init(paths: &Paths) -> Result<()> {
    store::ensure_dirs(paths)?;
    if !paths.config_file.is_file() {
        let config = store::load_config(paths)?;
        store::save_config(paths, &config)?;
        println!("Wrote default config: {}", paths.config_file.display());
    }
    let config = store::load_config(paths)?;
    println!("Hosts file: {}", config.hosts_path().display());
    println!("hostsync initialised at {}", paths.data_dir.display());
    Ok(())
}

fn cmd_list(paths: &Paths, json: bool) -> Result<()> {
    let hosts = store::open_hosts(paths)?;
    let snapshot = read(&hosts)?;
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot.entries())?);
        return Ok(());
    }
    for e in snapshot.entries() {
        let state = if e.enabled { "on" } else { "off" };
        let owner = if e.is_system { "\t(system)" } else { "" };
        println!("{state}\t{}\t{}{owner}", e.ip, e.domain());
    }
    Ok(())
}

fn cmd_toggle(paths: &Paths, hostname: &str, enable: bool) -> Result<()> {
    let hosts = store::open_hosts(paths)?;
    let base = read(&hosts)?;
    let matched = matching(&base, hostname)?;
    let edits: Vec<HostEntry> = base
        .entries()
        .iter()
        .cloned()
        .map(|mut e| {
            if matched.contains(&e.id) {
                e.enabled = enable;
            }
            e
        })
        .collect();
    let outcome = save(&hosts, &base, &edits)?;
    let verb = if enable { "Enabled" } else { "Disabled" };
    report(&outcome, &format!("{verb}: {hostname}"));
    Ok(())
}

fn cmd_backup(paths: &Paths, cmd: BackupCmd) -> Result<()> {
    let hosts = store::open_hosts(paths)?;
    match cmd {
        BackupCmd::List => {
            for b in hosts.backups().list()? {
                println!("{}\t{}\t{} bytes", b.id, b.created_at.to_rfc3339(), b.bytes.len());
            }
            Ok(())
        }
        BackupCmd::Restore { id } => {
            let id: BackupId = id.parse()?;
            let base = read(&hosts)?;
            let gateway = crate::platform::default_gateway();
            let outcome = hosts.restore(&id, &base, gateway.as_ref())?;
            report(&outcome, &format!("Restored backup {id}"));
            Ok(())
        }
    }
}

fn read(hosts: &HostsFile) -> Result<Snapshot> {
    Ok(hosts.read()?)
}

fn save(hosts: &HostsFile, base: &Snapshot, edits: &[HostEntry]) -> Result<SaveOutcome> {
    let gateway = crate::platform::default_gateway();
    Ok(hosts.save(base, edits, gateway.as_ref())?)
}

/// Ids of entries mapping `hostname`; fails when there are none.
fn matching(snapshot: &Snapshot, hostname: &str) -> Result<Vec<EntryId>> {
    let ids: Vec<_> = snapshot
        .entries()
        .iter()
        .filter(|e| e.has_hostname(hostname))
        .map(|e| e.id)
        .collect();
    if ids.is_empty() {
        bail!("no entry maps {hostname}");
    }
    Ok(ids)
}

fn report(outcome: &SaveOutcome, done: &str) {
    for c in &outcome.conflicts {
        eprintln!("Warning: {c}");
    }
    match &outcome.backup {
        Some(b) => println!("{done} (backup {b})"),
        None if !outcome.written => println!("No changes"),
        None => println!("{done}"),
    }
}

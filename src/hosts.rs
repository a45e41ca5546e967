//! Hosts file engine: read, save and restore.
//!
//! The engine keeps no state between calls. `read` hands out a [`Snapshot`];
//! the caller edits its entries and passes both back to `save`.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::backup::{BackupId, BackupManager};
use crate::classify::{self, ClassifierPolicy};
use crate::config::{Config, Paths};
use crate::error::{ReadError, SaveError};
use crate::model::{HostEntry, Snapshot};
use crate::parser::{self, ParserOptions};
use crate::platform::PrivilegeGateway;
use crate::reconcile::{self, Conflict, ReconcilePolicy};
use crate::writer::{CommitOutcome, Writer};

/// Result of a successful save or restore.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// False when the file already had the target content.
    pub written: bool,
    pub backup: Option<BackupId>,
    /// Conflicts that were resolved by policy rather than failing the save.
    pub conflicts: Vec<Conflict>,
    /// The file as it now is on disk; use it as the base for the next save.
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
    parser: ParserOptions,
    classifier: ClassifierPolicy,
    reconcile: ReconcilePolicy,
    backups: BackupManager,
}

impl HostsFile {
    /// Engine over `path` with default policies.
    pub fn new(path: impl Into<PathBuf>, backups: BackupManager) -> Self {
        Self {
            path: path.into(),
            parser: ParserOptions::default(),
            classifier: ClassifierPolicy::default(),
            reconcile: ReconcilePolicy::default(),
            backups,
        }
    }

    pub fn from_config(config: &Config, paths: &Paths) -> Self {
        Self::new(
            config.hosts_path(),
            BackupManager::new(&paths.backups_dir, config.backup.retention),
        )
        .with_parser(config.parser.clone())
        .with_classifier(config.classifier.clone())
        .with_reconcile(config.reconcile.clone())
    }

    pub fn with_parser(mut self, parser: ParserOptions) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierPolicy) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_reconcile(mut self, reconcile: ReconcilePolicy) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn reconcile_policy(&self) -> &ReconcilePolicy {
        &self.reconcile
    }

    /// Parse and classify bytes with this engine's options.
    pub fn load(&self, bytes: &[u8]) -> Snapshot {
        classify::classify(&parser::parse(bytes, &self.parser), &self.classifier)
    }

    pub fn read(&self) -> Result<Snapshot, ReadError> {
        let bytes = std::fs::read(&self.path).map_err(|e| ReadError::from_io(&self.path, e))?;
        Ok(self.load(&bytes))
    }

    /// Apply `edits`, keyed by id against `base`, to the file on disk.
    ///
    /// Every entry the caller wants to keep must be in `edits`; base entries
    /// missing from it are deleted. A fresh privilege grant is requested from
    /// `gateway` on every call that has something to write.
    pub fn save(
        &self,
        base: &Snapshot,
        edits: &[HostEntry],
        gateway: &dyn PrivilegeGateway,
    ) -> Result<SaveOutcome, SaveError> {
        for entry in edits {
            entry.validate().map_err(|reason| SaveError::InvalidEntry {
                id: entry.id,
                reason,
            })?;
        }

        let current = match self.read() {
            Ok(s) => s,
            Err(ReadError::NotFound(_)) => return Err(SaveError::StaleSnapshot),
            Err(ReadError::PermissionDenied(p)) => {
                return Err(SaveError::PermissionDenied(format!(
                    "cannot read {}",
                    p.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let reconciled = reconcile::reconcile(base, &current, edits, &self.reconcile)?;
        let bytes = reconciled.target.to_bytes();
        let outcome = Writer::new(&self.path, &self.backups, gateway).commit(&reconciled.target)?;
        let mut result = self.outcome(outcome, reconciled.conflicts, &bytes);
        result
            .snapshot
            .adopt_ids(|line| reconciled.target.entry_id(line));
        Ok(result)
    }

    /// Write a backup's bytes back over the file. `base` must match the file on
    /// disk, exactly as for `save`; the content being replaced is itself backed up.
    pub fn restore(
        &self,
        id: &BackupId,
        base: &Snapshot,
        gateway: &dyn PrivilegeGateway,
    ) -> Result<SaveOutcome, SaveError> {
        let bytes = self.backups.restore(id).map_err(SaveError::BackupFailed)?;
        let outcome = Writer::new(&self.path, &self.backups, gateway)
            .commit_bytes(&bytes, base.fingerprint())?;
        if matches!(outcome, CommitOutcome::Written { .. }) {
            info!(id = %id, path = %self.path.display(), "restored backup");
        }
        Ok(self.outcome(outcome, Vec::new(), &bytes))
    }

    fn outcome(&self, outcome: CommitOutcome, conflicts: Vec<Conflict>, bytes: &[u8]) -> SaveOutcome {
        let (written, backup) = match outcome {
            CommitOutcome::Unchanged => (false, None),
            CommitOutcome::Written { backup } => (true, Some(backup)),
        };
        SaveOutcome {
            written,
            backup,
            conflicts,
            snapshot: self.load(bytes),
        }
    }
}

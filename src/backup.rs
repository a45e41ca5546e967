//! Rotating history of pre-write hosts file copies.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

const ID_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const EXTENSION: &str = "bak";
const LOCK_FILE: &str = ".lock";

pub const DEFAULT_RETENTION: usize = 10;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup {0} not found")]
    NotFound(BackupId),

    #[error("invalid backup id {0:?}")]
    InvalidId(String),
}

/// `<UTC timestamp>-<sequence>`; sorts chronologically as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    fn new(at: DateTime<Utc>, seq: u32) -> Self {
        Self(format!("{}-{seq:04}", at.format(ID_TIME_FORMAT)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the id.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let (ts, seq) = self.0.rsplit_once('-')?;
        if seq.len() != 4 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveDateTime::parse_from_str(ts, ID_TIME_FORMAT)
            .ok()
            .map(|n| n.and_utc())
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BackupId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = BackupId(s.to_string());
        if id.created_at().is_none() {
            return Err(BackupError::InvalidId(s.to_string()));
        }
        Ok(id)
    }
}

/// A full copy of the hosts file taken before a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: BackupId,
    pub created_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// Backups live as `<id>.bak` files in one directory; access is serialized with
/// an advisory lock on `<dir>/.lock`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    /// `retention` is floored at 1 so the newest backup is never evicted.
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Store `bytes` as the newest backup, then evict beyond the retention cap.
    pub fn snapshot(&self, bytes: &[u8]) -> Result<BackupId, BackupError> {
        fs::create_dir_all(&self.dir).map_err(|e| self.io(&self.dir, e))?;
        let _lock = self.lock(true)?;

        let now = Utc::now();
        let mut seq = 0;
        let mut id = BackupId::new(now, seq);
        while self.path_for(&id).exists() {
            seq += 1;
            id = BackupId::new(now, seq);
        }

        let path = self.path_for(&id);
        let tmp = path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            fs::rename(&tmp, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(self.io(&path, e));
        }
        info!(id = %id, bytes = bytes.len(), "backup taken");

        self.evict()?;
        Ok(id)
    }

    /// All backups, most recent first.
    pub fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let _lock = self.lock(false)?;
        self.ids()?
            .into_iter()
            .map(|(id, created_at)| {
                let path = self.path_for(&id);
                let bytes = fs::read(&path).map_err(|e| self.io(&path, e))?;
                Ok(BackupRecord {
                    id,
                    created_at,
                    bytes,
                })
            })
            .collect()
    }

    /// Bytes of one backup.
    pub fn restore(&self, id: &BackupId) -> Result<Vec<u8>, BackupError> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Err(BackupError::NotFound(id.clone()));
        }
        let _lock = self.lock(false)?;
        fs::read(&path).map_err(|e| self.io(&path, e))
    }

    /// Delete one backup. Used when the write it preceded never happened.
    pub fn discard(&self, id: &BackupId) -> Result<(), BackupError> {
        let path = self.path_for(id);
        let _lock = self.lock(true)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackupError::NotFound(id.clone()))
            }
            Err(e) => Err(self.io(&path, e)),
        }
    }

    fn path_for(&self, id: &BackupId) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", id.as_str()))
    }

    /// Ids in the directory, newest first. Foreign files are skipped.
    fn ids(&self) -> Result<Vec<(BackupId, DateTime<Utc>)>, BackupError> {
        let mut ids = Vec::new();
        for e in fs::read_dir(&self.dir).map_err(|e| self.io(&self.dir, e))? {
            let e = e.map_err(|e| self.io(&self.dir, e))?;
            let path = e.path();
            if path.extension().and_then(|x| x.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<BackupId>() {
                Ok(id) => {
                    if let Some(at) = id.created_at() {
                        ids.push((id, at));
                    }
                }
                Err(_) => debug!(path = %path.display(), "skipping foreign file in backup dir"),
            }
        }
        ids.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(ids)
    }

    fn evict(&self) -> Result<(), BackupError> {
        let ids = self.ids()?;
        for (id, _) in ids.iter().skip(self.retention) {
            let path = self.path_for(id);
            fs::remove_file(&path).map_err(|e| self.io(&path, e))?;
            debug!(id = %id, "evicted backup");
        }
        Ok(())
    }

    fn lock(&self, exclusive: bool) -> Result<fs::File, BackupError> {
        let path = self.dir.join(LOCK_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| self.io(&path, e))?;
        let locked = if exclusive {
            fs2::FileExt::lock_exclusive(&file)
        } else {
            fs2::FileExt::lock_shared(&file)
        };
        locked.map_err(|e| self.io(&path, e))?;
        Ok(file)
    }

    fn io(&self, path: &Path, source: std::io::Error) -> BackupError {
        BackupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

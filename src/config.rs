//! Configuration loading and path resolution.
//!
//! Supports HOSTSYNC_HOME and HOSTSYNC_HOSTS_FILE env var overrides for testing.

use anyhow::{Context, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::backup::DEFAULT_RETENTION;
use crate::classify::ClassifierPolicy;
use crate::parser::ParserOptions;
use crate::reconcile::ReconcilePolicy;

pub const HOME_ENV: &str = "HOSTSYNC_HOME";
pub const HOSTS_FILE_ENV: &str = "HOSTSYNC_HOSTS_FILE";

/// Paths for the hostsync data store.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub backups_dir: PathBuf,
}

impl Paths {
    /// Build paths from base directory (e.g. ProjectDirs data dir or HOSTSYNC_HOME).
    pub fn from_base(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.toml"),
            backups_dir: base.join("backups"),
            data_dir: base,
        }
    }

    pub fn for_test(base: impl AsRef<Path>) -> Self {
        Self::from_base(base.as_ref().to_path_buf())
    }

    /// Default paths (respects HOSTSYNC_HOME).
    pub fn default_paths() -> Self {
        let base = if let Ok(home) = std::env::var(HOME_ENV) {
            PathBuf::from(home)
        } else if let Some(dirs) = directories::ProjectDirs::from("dev", "hostsync", "hostsync") {
            dirs.data_dir().to_path_buf()
        } else {
            PathBuf::from(".hostsync")
        };
        Self::from_base(base)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backups kept; values below 1 are treated as 1.
    pub retention: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Main config.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts_file: Option<PathBuf>,
    pub parser: ParserOptions,
    pub classifier: ClassifierPolicy,
    pub reconcile: ReconcilePolicy,
    pub backup: BackupConfig,
}

impl Config {
    /// Load config from paths (with shared lock when file exists).
    pub fn load(paths: &Paths) -> Result<Config> {
        if !paths.config_file.is_file() {
            return Ok(Config::default());
        }
        let mut file = fs::File::open(&paths.config_file)
            .with_context(|| format!("open {}", paths.config_file.display()))?;
        fs2::FileExt::lock_shared(&file)?;
        let mut s = String::new();
        file.read_to_string(&mut s)?;
        toml::from_str(&s).with_context(|| format!("parse {}", paths.config_file.display()))
    }

    /// Save config to paths (with exclusive lock). Creates parent dirs if needed.
    pub fn save(&self, paths: &Paths) -> Result<()> {
        if let Some(p) = paths.config_file.parent() {
            fs::create_dir_all(p)?;
        }
        let s = toml::to_string_pretty(self)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&paths.config_file)
            .with_context(|| format!("open {}", paths.config_file.display()))?;
        fs2::FileExt::lock_exclusive(&file)?;
        // Truncate only once the lock is held so readers never see an empty file.
        file.set_len(0)?;
        file.write_all(s.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Hosts file to manage: HOSTSYNC_HOSTS_FILE, then `hosts_file`, then the OS default.
    pub fn hosts_path(&self) -> PathBuf {
        if let Some(p) = std::env::var_os(HOSTS_FILE_ENV) {
            return PathBuf::from(p);
        }
        self.hosts_file
            .clone()
            .unwrap_or_else(crate::platform::default_hosts_path)
    }
}

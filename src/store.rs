//! Data store operations and directory layout.

use anyhow::Result;

use crate::config::{Config, Paths};
use crate::hosts::HostsFile;

/// Ensure the data and backup directories exist.
pub fn ensure_dirs(paths: &Paths) -> Result<()> {
    std::fs::create_dir_all(&paths.data_dir)?;
    std::fs::create_dir_all(&paths.backups_dir)?;
    Ok(())
}

pub fn load_config(paths: &Paths) -> Result<Config> {
    Config::load(paths)
}

pub fn save_config(paths: &Paths, config: &Config) -> Result<()> {
    config.save(paths)
}

/// Engine configured from `config.toml`.
pub fn open_hosts(paths: &Paths) -> Result<HostsFile> {
    let config = load_config(paths)?;
    Ok(HostsFile::from_config(&config, paths))
}

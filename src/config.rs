// src/config.rs

//! Configuration loading utilities.
//!
//! Convenience functions shared by the CLI and the Lambda entry point:
//! locating the config file, applying environment overrides, and opening
//! the configured store.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::storage::{KvStore, LocalStore};

/// Config file used when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "storage/config.toml";

/// Load, override from the environment, and validate.
///
/// A missing file means defaults; an unreadable or invalid one is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        log::warn!("Config file {} not found, using defaults", path.display());
        Config::default()
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// The file-backed store under `storage.root_dir`.
pub fn open_store(config: &Config) -> Arc<dyn KvStore> {
    Arc::new(LocalStore::new(&config.storage.root_dir))
}

/// Read a JSON document from disk.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("cannot read {}: {e}", path.display())))?;
    Ok(serde_json::from_str(&content)?)
}

//! Database location resolution.
//!
//! Precedence: `--db` flag, then `HUDDLE_DB`, then `db_path` from the user
//! config file, then a per-user data directory. The core never sees anything
//! but the resolved path.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

const ENV_DB: &str = "HUDDLE_DB";
const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "huddle.db";

/// User configuration file contents.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Database file location.
    pub db_path: Option<PathBuf>,
}

impl Config {
    /// Parse a TOML config document.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not valid TOML.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid config file")
    }
}

/// Resolve the database path from flag, environment, config file, and the
/// per-user default, in that order.
///
/// # Errors
///
/// Returns an error when the config file exists but cannot be read or
/// parsed, or when no user directory can be determined for the default.
pub fn resolve_db_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }

    if let Ok(env) = std::env::var(ENV_DB) {
        if !env.is_empty() {
            return Ok(PathBuf::from(env));
        }
    }

    if let Some(path) = config_file_db_path()? {
        return Ok(path);
    }

    default_db_path()
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "huddle")
}

fn config_file_db_path() -> Result<Option<PathBuf>> {
    let Some(dirs) = project_dirs() else {
        return Ok(None);
    };
    let path = dirs.config_dir().join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = Config::from_toml(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config.db_path)
}

fn default_db_path() -> Result<PathBuf> {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(DB_FILE))
        .ok_or_else(|| anyhow!("no user data directory available; pass --db or set {ENV_DB}"))
}

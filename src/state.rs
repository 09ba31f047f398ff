//! Process-wide state: the loaded config and where it lives on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db::{CrmDb, DbError};
use crate::types::Config;

pub struct AppState {
    /// Config as stored on disk, without environment overrides.
    pub config: Mutex<Config>,
    config_path: PathBuf,
}

impl AppState {
    /// Load `~/.policydesk/config.json` (defaults if it does not exist yet).
    pub fn new() -> Result<Self, String> {
        Self::at(config_path()?)
    }

    pub fn at(config_path: PathBuf) -> Result<Self, String> {
        let config = load_config_from(&config_path)?;
        Ok(Self {
            config: Mutex::new(config),
            config_path,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Stored config with environment overrides applied.
    pub fn effective_config(&self) -> Result<Config, String> {
        let guard = self.config.lock().map_err(|_| "Lock poisoned")?;
        Ok(guard.clone().with_env_overrides(|k| std::env::var(k).ok()))
    }

    /// Open the configured database, or the default one.
    pub fn open_db(&self) -> Result<CrmDb, DbError> {
        let db_path = self
            .config
            .lock()
            .ok()
            .and_then(|c| c.db_path.clone());
        match db_path {
            Some(p) => CrmDb::open_at(crate::util::expand_home(&p)),
            None => CrmDb::open(),
        }
    }
}

/// `~/.policydesk/config.json`
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".policydesk").join("config.json"))
}

/// Load the config from the default location with environment overrides.
pub fn load_config() -> Result<Config, String> {
    let config = load_config_from(&config_path()?)?;
    Ok(config.with_env_overrides(|k| std::env::var(k).ok()))
}

/// Read a config file. A missing file yields defaults; a malformed one is an
/// error.
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::debug!("Config not found at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `mutator` to the stored config, write it atomically, and update the
/// in-memory copy.
pub fn create_or_update_config(
    state: &AppState,
    mutator: impl FnOnce(&mut Config),
) -> Result<Config, String> {
    let mut guard = state.config.lock().map_err(|_| "Lock poisoned")?;
    let mut config = guard.clone();
    mutator(&mut config);

    let content = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    crate::util::atomic_write_str(&state.config_path, &content)?;

    *guard = config.clone();
    Ok(config)
}

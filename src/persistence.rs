//! Persistence of runtime overrides
//!
//! Power limit, target SoC, force-charge and pause overrides set through the
//! API survive restarts. They are stored as a small JSON document next to
//! the configuration; nothing else about run-to-run state is persisted.

use crate::coordinator::Overrides;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persistent state structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentState {
    /// Runtime overrides applied on top of the configuration
    pub overrides: Overrides,

    /// When the state was last written
    pub saved_at: Option<DateTime<Utc>>,
}

/// Persistence manager
pub struct PersistenceManager {
    file_path: String,
    state: PersistentState,
    logger: StructuredLogger,
}

impl PersistenceManager {
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            state: PersistentState::default(),
            logger: get_logger("persistence"),
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Load state from disk; a missing file leaves the defaults in place
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No persistent state file found, using defaults");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        self.state = serde_json::from_str(&contents)?;
        self.logger.info(&format!(
            "Loaded persistent state from {}",
            self.file_path
        ));

        Ok(())
    }

    /// Save state to disk, creating the parent directory if needed
    pub fn save(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        self.state.saved_at = Some(Utc::now());
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(path, contents)?;
        self.logger.debug("Saved persistent state to disk");

        Ok(())
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn overrides(&self) -> &Overrides {
        &self.state.overrides
    }

    pub fn set_overrides(&mut self, overrides: Overrides) {
        self.state.overrides = overrides;
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("file_path", &self.file_path)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let mut pm = PersistenceManager::new(path.to_str().unwrap());
        pm.load().unwrap();
        assert_eq!(pm.overrides(), &Overrides::default());
    }

    #[test]
    fn save_and_reload_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let path = path.to_str().unwrap();

        let mut overrides = Overrides::default();
        overrides.power_limit_kw = Some(7.5);
        overrides.pause_all = true;
        overrides.target_soc_pct.insert("tesla".into(), 70);

        let mut pm = PersistenceManager::new(path);
        pm.set_overrides(overrides.clone());
        pm.save().unwrap();
        assert!(pm.state().saved_at.is_some());

        let mut reloaded = PersistenceManager::new(path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.overrides(), &overrides);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let mut pm = PersistenceManager::new(path.to_str().unwrap());
        assert!(pm.load().is_err());
        assert_eq!(pm.overrides(), &Overrides::default());
    }
}

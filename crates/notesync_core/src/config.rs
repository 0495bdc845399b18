//! Configuration types for notesync.
//!
//! This module provides the [`Config`] struct which stores user preferences
//! and repository settings. Configuration is persisted as TOML (typically at
//! `~/.config/notesync/config.toml` on Unix systems).
//!
//! # Key Configuration Fields
//!
//! - `notebooks_dir`: Directory holding the local notebooks
//! - `state_dir`: Where the notebook index and link table live
//! - `default_extension`: Extension appended to notebook names without one
//! - `sync`: Reconciler behavior (deletions, conflict copies, parallelism)
//! - `retry`: Transport retry policy handed to every backend
//! - `link_storage`: Where the link table is persisted (`json` or `sqlite`)
//! - `repositories`: Configured repositories and their credentials
//!
//! # Example
//!
//! ```ignore
//! use notesync_core::config::Config;
//! use std::path::PathBuf;
//!
//! let mut config = Config::new(PathBuf::from("/home/user/org"));
//! config.add_repository(RepositorySettings::new("dropbox:/org"));
//! config.save()?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{NotesyncError, Result};
use crate::fs::FileSystem;
use crate::naming::DEFAULT_EXTENSION;
use crate::repo::{RepositorySettings, RetryPolicy};
use crate::sync::SyncOptions;

/// Name of the state directory created inside the notebooks directory.
pub const STATE_DIR_NAME: &str = ".notesync";

/// User-configurable settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one file per notebook
    pub notebooks_dir: PathBuf,

    /// Directory for the notebook index, link table and scratch files.
    /// Defaults to `<notebooks_dir>/.notesync`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Extension appended to notebook names that have none
    #[serde(default = "default_extension")]
    pub default_extension: String,

    /// Reconciler behavior
    #[serde(default)]
    pub sync: SyncOptions,

    /// Transport retry policy for backends
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Link table persistence
    #[serde(default)]
    pub link_storage: LinkStorageKind,

    /// Configured repositories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepositorySettings>,
}

/// Where the link table is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStorageKind {
    /// `links.json` in the state directory
    #[default]
    Json,
    /// `links.db` in the state directory (feature `sqlite`)
    Sqlite,
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

impl Config {
    /// Create a new config for the given notebooks directory
    pub fn new(notebooks_dir: PathBuf) -> Self {
        Self {
            notebooks_dir,
            state_dir: None,
            default_extension: default_extension(),
            sync: SyncOptions::default(),
            retry: RetryPolicy::default(),
            link_storage: LinkStorageKind::default(),
            repositories: Vec::new(),
        }
    }

    /// Resolved state directory
    pub fn state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => self.notebooks_dir.join(STATE_DIR_NAME),
        }
    }

    /// Path of the notebook identity index
    pub fn notebook_index_path(&self) -> PathBuf {
        self.state_dir().join("notebooks.json")
    }

    /// Path of the JSON link table
    pub fn link_table_path(&self) -> PathBuf {
        self.state_dir().join("links.json")
    }

    /// Path of the SQLite link table
    pub fn link_database_path(&self) -> PathBuf {
        self.state_dir().join("links.db")
    }

    /// Directory for scratch files used during fetch/store
    pub fn scratch_dir(&self) -> PathBuf {
        self.state_dir().join("scratch")
    }

    /// Add a repository, replacing any entry with the same normalized address.
    ///
    /// Returns `false` if the address is malformed.
    pub fn add_repository(&mut self, settings: RepositorySettings) -> bool {
        let Some(address) = settings.parsed_address() else {
            return false;
        };
        self.repositories
            .retain(|r| r.parsed_address().as_ref() != Some(&address));
        self.repositories.push(settings);
        true
    }

    /// Remove a repository by address. Returns whether one was removed.
    pub fn remove_repository(&mut self, address: &str) -> bool {
        let before = self.repositories.len();
        match crate::address::RepositoryAddress::parse(address) {
            Ok(address) => self
                .repositories
                .retain(|r| r.parsed_address().as_ref() != Some(&address)),
            Err(_) => self.repositories.retain(|r| r.address != address),
        }
        self.repositories.len() != before
    }

    /// Load config from a specific path.
    pub fn load_from<FS: FileSystem>(fs: &FS, path: &Path) -> Result<Self> {
        let contents = fs
            .read_text(path)
            .map_err(|e| NotesyncError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to<FS: FileSystem>(&self, fs: &FS, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs.create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs.write_text(path, &contents)
            .map_err(|e| NotesyncError::FileWrite {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(())
    }

    /// Load config from a path, returning a default if it cannot be read.
    pub fn load_from_or_default<FS: FileSystem>(
        fs: &FS,
        path: &Path,
        notebooks_dir: PathBuf,
    ) -> Self {
        match Self::load_from(fs, path) {
            Ok(config) => config,
            Err(_) => Self::new(notebooks_dir),
        }
    }
}

// ============================================================================
// Native-only implementation
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
impl Default for Config {
    fn default() -> Self {
        let default_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notebooks");
        Self::new(default_dir)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Config {
    /// Get the config file path (~/.config/notesync/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("notesync").join("config.toml"))
    }

    /// Load config from default location, or return default if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            let contents = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&contents)?;
            return Ok(config);
        }

        Ok(Config::default())
    }

    /// Save config to default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(NotesyncError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        Ok(())
    }

    /// Initialize and save a config for the given notebooks directory
    pub fn init(notebooks_dir: PathBuf) -> Result<Self> {
        let config = Config::new(notebooks_dir);
        config.save()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: Config = toml::from_str("notebooks_dir = \"/org\"\n").unwrap();
        assert_eq!(config.default_extension, "org");
        assert_eq!(config.state_dir(), PathBuf::from("/org/.notesync"));
        assert!(!config.sync.push_deletions);
        assert!(config.sync.conflict_copies);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.repositories.is_empty());
        assert_eq!(config.link_storage, LinkStorageKind::Json);

        let config: Config =
            toml::from_str("notebooks_dir = \"/org\"\nlink_storage = \"sqlite\"\n").unwrap();
        assert_eq!(config.link_storage, LinkStorageKind::Sqlite);
    }

    #[test]
    fn test_round_trip_through_filesystem() {
        let fs = InMemoryFileSystem::new();
        let path = Path::new("/home/me/.config/notesync/config.toml");

        let mut config = Config::new(PathBuf::from("/org"));
        config.sync.push_deletions = true;
        assert!(config.add_repository(RepositorySettings::new("dropbox:/org").with_token("secret")));
        config.save_to(&fs, path).unwrap();

        let loaded = Config::load_from(&fs, path).unwrap();
        assert!(loaded.sync.push_deletions);
        assert_eq!(loaded.repositories.len(), 1);
        assert_eq!(loaded.repositories[0].token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_add_repository_replaces_same_address() {
        let mut config = Config::new(PathBuf::from("/org"));
        assert!(config.add_repository(RepositorySettings::new("mock:/a")));
        assert!(config.add_repository(RepositorySettings::new("mock:/a/").with_token("t")));
        assert!(!config.add_repository(RepositorySettings::new("nonsense")));
        assert_eq!(config.repositories.len(), 1);
        assert_eq!(config.repositories[0].token.as_deref(), Some("t"));

        assert!(config.remove_repository("MOCK:/a"));
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_load_missing_falls_back_to_default() {
        let fs = InMemoryFileSystem::new();
        let config =
            Config::load_from_or_default(&fs, Path::new("/nope.toml"), PathBuf::from("/org"));
        assert_eq!(config.notebooks_dir, PathBuf::from("/org"));
    }
}

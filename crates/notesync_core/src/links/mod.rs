//! Link table: which notebook is linked to which repository, and what was
//! last synced.
//!
//! The [`LinkTable`] keeps entries in memory behind a short-lived lock and
//! writes every change through a [`LinkStorage`] before updating its cache,
//! so a crash never leaves the cache ahead of what is persisted.
//!
//! Storages:
//! - [`MemoryLinkStorage`]: tests
//! - [`JsonLinkStorage`]: `links.json` in the state directory (default)
//! - `SqliteLinkStorage`: `links.db` (feature `sqlite`)

mod json_storage;
mod memory_storage;
#[cfg(feature = "sqlite")]
mod sqlite_storage;

pub use json_storage::JsonLinkStorage;
pub use memory_storage::MemoryLinkStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteLinkStorage;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::RepositoryAddress;
#[cfg(not(target_arch = "wasm32"))]
use crate::config::{Config, LinkStorageKind};
use crate::error::{NotesyncError, Result};
use crate::naming::names_collide;
use crate::revision::VersionedRevision;
use crate::store::NotebookId;

/// Link of one notebook to one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    /// Linked notebook
    pub notebook_id: NotebookId,
    /// Repository the notebook is linked to
    pub repository: RepositoryAddress,
    /// Remote filename the notebook is stored under
    pub linked_filename: String,
    /// Revision as of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<VersionedRevision>,
    /// Local modification marker recorded together with `last_synced`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_synced_at: Option<i64>,
    /// Wall clock of the last successful action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl LinkEntry {
    /// Fresh, never-synced link.
    pub fn new(
        notebook_id: NotebookId,
        repository: RepositoryAddress,
        linked_filename: impl Into<String>,
    ) -> Self {
        Self {
            notebook_id,
            repository,
            linked_filename: linked_filename.into(),
            last_synced: None,
            local_synced_at: None,
            synced_at: None,
        }
    }

    /// Record a successful sync at `revision`.
    pub fn mark_synced(&mut self, revision: VersionedRevision, local_modified_at: i64) {
        self.linked_filename = revision.filename().to_string();
        self.last_synced = Some(revision);
        self.local_synced_at = Some(local_modified_at);
        self.synced_at = Some(Utc::now());
    }

    /// Whether the local side changed since the last sync.
    ///
    /// Compares modification markers only; touching a file without changing
    /// it counts as a change.
    pub fn local_changed(&self, local_modified_at: i64) -> bool {
        match self.local_synced_at {
            Some(synced) => local_modified_at > synced,
            None => true,
        }
    }
}

/// Persistence backend for link entries.
pub trait LinkStorage: Send + Sync {
    /// Every stored entry.
    fn load_all(&self) -> Result<Vec<LinkEntry>>;

    /// Insert or replace the entry for `entry.notebook_id`.
    ///
    /// Any link of the same notebook to another repository is replaced.
    fn save(&self, entry: &LinkEntry) -> Result<()>;

    /// Remove the entry for a notebook. Removing a missing entry succeeds.
    fn remove(&self, notebook_id: &NotebookId) -> Result<()>;
}

/// The link table.
pub struct LinkTable {
    storage: Box<dyn LinkStorage>,
    entries: Mutex<BTreeMap<NotebookId, LinkEntry>>,
}

impl LinkTable {
    /// Load the table from a storage.
    pub fn open(storage: Box<dyn LinkStorage>) -> Result<Self> {
        let entries = storage
            .load_all()?
            .into_iter()
            .map(|e| (e.notebook_id.clone(), e))
            .collect();
        Ok(Self {
            storage,
            entries: Mutex::new(entries),
        })
    }

    /// Empty table that persists nowhere.
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(MemoryLinkStorage::new()),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open the table persisted in the config's state directory.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_config(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(config.state_dir())?;
        let storage: Box<dyn LinkStorage> = match config.link_storage {
            LinkStorageKind::Json => Box::new(JsonLinkStorage::open(
                crate::fs::RealFileSystem,
                config.link_table_path(),
            )?),
            #[cfg(feature = "sqlite")]
            LinkStorageKind::Sqlite => Box::new(SqliteLinkStorage::open(config.link_database_path())?),
            #[cfg(not(feature = "sqlite"))]
            LinkStorageKind::Sqlite => {
                log::warn!("[Links] Built without SQLite support, using {}", config.link_table_path().display());
                Box::new(JsonLinkStorage::open(
                    crate::fs::RealFileSystem,
                    config.link_table_path(),
                )?)
            }
        };
        Self::open(storage)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NotebookId, LinkEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry of one notebook.
    pub fn get(&self, notebook_id: &NotebookId) -> Option<LinkEntry> {
        self.lock().get(notebook_id).cloned()
    }

    /// All entries.
    pub fn entries(&self) -> Vec<LinkEntry> {
        self.lock().values().cloned().collect()
    }

    /// Entries linked to `repository`.
    pub fn entries_for(&self, repository: &RepositoryAddress) -> Vec<LinkEntry> {
        self.lock()
            .values()
            .filter(|e| &e.repository == repository)
            .cloned()
            .collect()
    }

    /// Whether another notebook in `repository` already uses `filename`.
    pub fn filename_taken(
        &self,
        repository: &RepositoryAddress,
        filename: &str,
        except: Option<&NotebookId>,
    ) -> bool {
        self.lock().values().any(|e| {
            &e.repository == repository
                && Some(&e.notebook_id) != except
                && names_collide(&e.linked_filename, filename)
        })
    }

    /// Link a notebook, replacing any previous link of that notebook.
    ///
    /// Re-linking to the same repository and filename keeps the existing
    /// entry (and its sync state). Fails with `NameCollision` when another
    /// notebook in the same repository uses a colliding filename.
    pub fn link(
        &self,
        notebook_id: &NotebookId,
        repository: &RepositoryAddress,
        filename: &str,
    ) -> Result<LinkEntry> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(notebook_id)
            && &existing.repository == repository
            && existing.linked_filename == filename
        {
            return Ok(existing.clone());
        }

        let collides = entries.values().any(|e| {
            &e.repository == repository
                && &e.notebook_id != notebook_id
                && names_collide(&e.linked_filename, filename)
        });
        if collides {
            return Err(NotesyncError::NameCollision(
                repository.join(filename).to_string(),
            ));
        }

        let entry = LinkEntry::new(notebook_id.clone(), repository.clone(), filename);
        self.storage.save(&entry)?;
        entries.insert(notebook_id.clone(), entry.clone());
        log::info!("[Links] Linked {} to {}", notebook_id, repository.join(filename));
        Ok(entry)
    }

    /// Remove the link of a notebook, returning the removed entry.
    pub fn unlink(&self, notebook_id: &NotebookId) -> Result<Option<LinkEntry>> {
        let mut entries = self.lock();
        if !entries.contains_key(notebook_id) {
            return Ok(None);
        }
        self.storage.remove(notebook_id)?;
        let removed = entries.remove(notebook_id);
        if let Some(entry) = &removed {
            log::info!("[Links] Unlinked {} from {}", notebook_id, entry.repository);
        }
        Ok(removed)
    }

    /// Persist an updated entry.
    pub fn update(&self, entry: LinkEntry) -> Result<()> {
        let mut entries = self.lock();
        self.storage.save(&entry)?;
        entries.insert(entry.notebook_id.clone(), entry);
        Ok(())
    }
}

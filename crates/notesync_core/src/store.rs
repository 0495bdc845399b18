//! Local notebook store.
//!
//! The reconciler only sees notebooks through the [`NotebookStore`] trait.
//! [`FsNotebookStore`] keeps one file per notebook in a directory and
//! remembers stable identities in a JSON index, so a notebook keeps its id
//! across renames.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{NotesyncError, Result};
use crate::fs::FileSystem;
use crate::naming::{display_name_for, filename_for, is_notebook_file, names_collide, validate_name};

/// Stable local identifier of a notebook (a UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotebookId(String);

impl NotebookId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NotebookId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for NotebookId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NotebookId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NotebookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A notebook as the store knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookIdentity {
    /// Stable id
    pub id: NotebookId,
    /// Display name, used to derive the remote filename
    pub name: String,
}

/// Content of a local notebook plus its modification marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalContent {
    /// Raw bytes
    pub bytes: Vec<u8>,
    /// Monotonic modification marker (milliseconds on real filesystems)
    pub modified_at: i64,
}

/// Local side of synchronization.
pub trait NotebookStore: Send + Sync {
    /// Every local notebook, sorted by name.
    fn list_local_notebooks(&self) -> Result<Vec<NotebookIdentity>>;

    /// Content of a notebook, or `None` if it no longer exists locally.
    fn read_local(&self, id: &NotebookId) -> Result<Option<LocalContent>>;

    /// Replace a notebook's content, returning the new modification marker.
    fn write_local(&self, id: &NotebookId, bytes: &[u8]) -> Result<i64>;

    /// Rename a notebook. Fails with `NameCollision` if the name is taken.
    fn rename_local(&self, id: &NotebookId, new_name: &str) -> Result<()>;

    /// Create a notebook. Fails with `NameCollision` if the name is taken.
    fn create_local(&self, name: &str, bytes: &[u8]) -> Result<NotebookIdentity>;

    /// Delete a notebook. Deleting an unknown id succeeds.
    fn delete_local(&self, id: &NotebookId) -> Result<()>;

    /// Look up one notebook by id.
    fn get(&self, id: &NotebookId) -> Result<Option<NotebookIdentity>> {
        Ok(self
            .list_local_notebooks()?
            .into_iter()
            .find(|n| &n.id == id))
    }

    /// Look up one notebook by (normalized) name.
    fn find_by_name(&self, name: &str) -> Result<Option<NotebookIdentity>> {
        Ok(self
            .list_local_notebooks()?
            .into_iter()
            .find(|n| names_collide(&n.name, name)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NotebookIndex {
    version: u32,
    #[serde(default)]
    notebooks: BTreeMap<NotebookId, IndexEntry>,
}

impl Default for NotebookIndex {
    fn default() -> Self {
        Self {
            version: NotebookIndex::CURRENT_VERSION,
            notebooks: BTreeMap::new(),
        }
    }
}

impl NotebookIndex {
    const CURRENT_VERSION: u32 = 1;

    fn name_taken(&self, name: &str, except: Option<&NotebookId>) -> bool {
        self.notebooks
            .iter()
            .any(|(id, entry)| Some(id) != except && names_collide(&entry.name, name))
    }
}

/// Directory-backed [`NotebookStore`].
pub struct FsNotebookStore<FS: FileSystem> {
    fs: FS,
    dir: PathBuf,
    index_path: PathBuf,
    default_extension: String,
    index: Mutex<NotebookIndex>,
}

impl<FS: FileSystem> FsNotebookStore<FS> {
    /// Open a store over `dir`, loading the index at `index_path` if present.
    pub fn open(
        fs: FS,
        dir: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
        default_extension: &str,
    ) -> Result<Self> {
        let index_path = index_path.into();
        let index = if fs.exists(&index_path) {
            let raw = fs
                .read_text(&index_path)
                .map_err(|e| NotesyncError::FileRead {
                    path: index_path.clone(),
                    source: e,
                })?;
            serde_json::from_str(&raw)?
        } else {
            NotebookIndex::default()
        };

        Ok(Self {
            fs,
            dir: dir.into(),
            index_path,
            default_extension: default_extension.to_string(),
            index: Mutex::new(index),
        })
    }

    /// Open the store described by `config`.
    pub fn from_config(fs: FS, config: &Config) -> Result<Self> {
        Self::open(
            fs,
            config.notebooks_dir.clone(),
            config.notebook_index_path(),
            &config.default_extension,
        )
    }

    /// Directory holding the notebook files.
    pub fn notebooks_dir(&self) -> &Path {
        &self.dir
    }

    /// On-disk path of a notebook.
    pub fn path_of(&self, id: &NotebookId) -> Option<PathBuf> {
        self.lock()
            .notebooks
            .get(id)
            .map(|entry| self.dir.join(&entry.filename))
    }

    fn lock(&self) -> MutexGuard<'_, NotebookIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, index: &NotebookIndex) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(index)?;
        self.fs
            .write_text(&self.index_path, &json)
            .map_err(|e| NotesyncError::FileWrite {
                path: self.index_path.clone(),
                source: e,
            })
    }

    /// Bring the index in line with the directory.
    ///
    /// Notebook files nobody indexed get fresh ids; entries whose file is
    /// gone are dropped. Returns whether the index changed.
    fn rescan(&self, index: &mut NotebookIndex) -> Result<bool> {
        let mut changed = false;

        let before = index.notebooks.len();
        index
            .notebooks
            .retain(|_, entry| self.fs.exists(&self.dir.join(&entry.filename)));
        changed |= index.notebooks.len() != before;

        if !self.fs.is_dir(&self.dir) {
            return Ok(changed);
        }

        let mut on_disk: Vec<String> = self
            .fs
            .list_files(&self.dir)?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .filter(|name| is_notebook_file(name))
            .collect();
        on_disk.sort();

        for filename in on_disk {
            if index.notebooks.values().any(|e| e.filename == filename) {
                continue;
            }
            log::debug!("[Store] Indexing new notebook file {}", filename);
            index.notebooks.insert(
                NotebookId::new(),
                IndexEntry {
                    name: display_name_for(&filename),
                    filename,
                },
            );
            changed = true;
        }
        Ok(changed)
    }
}

impl<FS: FileSystem> NotebookStore for FsNotebookStore<FS> {
    fn list_local_notebooks(&self) -> Result<Vec<NotebookIdentity>> {
        let mut index = self.lock();
        if self.rescan(&mut index)? {
            self.persist(&index)?;
        }
        let mut notebooks: Vec<NotebookIdentity> = index
            .notebooks
            .iter()
            .map(|(id, entry)| NotebookIdentity {
                id: id.clone(),
                name: entry.name.clone(),
            })
            .collect();
        notebooks.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(notebooks)
    }

    fn read_local(&self, id: &NotebookId) -> Result<Option<LocalContent>> {
        let Some(path) = self.path_of(id) else {
            return Ok(None);
        };
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let bytes = self
            .fs
            .read_binary(&path)
            .map_err(|e| NotesyncError::FileRead {
                path: path.clone(),
                source: e,
            })?;
        Ok(Some(LocalContent {
            bytes,
            modified_at: self.fs.modified_at(&path).unwrap_or(0),
        }))
    }

    fn write_local(&self, id: &NotebookId, bytes: &[u8]) -> Result<i64> {
        let path = self
            .path_of(id)
            .ok_or_else(|| NotesyncError::NotebookNotFound(id.to_string()))?;
        self.fs
            .write_binary(&path, bytes)
            .map_err(|e| NotesyncError::FileWrite {
                path: path.clone(),
                source: e,
            })?;
        Ok(self.fs.modified_at(&path).unwrap_or(0))
    }

    fn rename_local(&self, id: &NotebookId, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        validate_name(new_name)?;
        let mut index = self.lock();
        let Some(entry) = index.notebooks.get(id).cloned() else {
            return Err(NotesyncError::NotebookNotFound(id.to_string()));
        };
        if entry.name == new_name {
            return Ok(());
        }
        if index.name_taken(new_name, Some(id)) {
            return Err(NotesyncError::NameCollision(new_name.to_string()));
        }

        let filename = filename_for(new_name, &self.default_extension);
        if filename != entry.filename {
            let from = self.dir.join(&entry.filename);
            let to = self.dir.join(&filename);
            if self.fs.exists(&to) && !names_collide(&filename, &entry.filename) {
                return Err(NotesyncError::NameCollision(filename));
            }
            self.fs.rename_file(&from, &to)?;
        }

        index.notebooks.insert(
            id.clone(),
            IndexEntry {
                name: new_name.to_string(),
                filename,
            },
        );
        self.persist(&index)
    }

    fn create_local(&self, name: &str, bytes: &[u8]) -> Result<NotebookIdentity> {
        let name = name.trim();
        validate_name(name)?;
        let mut index = self.lock();
        self.rescan(&mut index)?;
        if index.name_taken(name, None) {
            return Err(NotesyncError::NameCollision(name.to_string()));
        }

        let filename = filename_for(name, &self.default_extension);
        let path = self.dir.join(&filename);
        self.fs.create_dir_all(&self.dir)?;
        self.fs.create_exclusive(&path, bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                NotesyncError::NameCollision(filename.clone())
            } else {
                NotesyncError::FileWrite {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;

        let id = NotebookId::new();
        index.notebooks.insert(
            id.clone(),
            IndexEntry {
                name: name.to_string(),
                filename,
            },
        );
        self.persist(&index)?;
        Ok(NotebookIdentity {
            id,
            name: name.to_string(),
        })
    }

    fn delete_local(&self, id: &NotebookId) -> Result<()> {
        let mut index = self.lock();
        let Some(entry) = index.notebooks.remove(id) else {
            return Ok(());
        };
        let path = self.dir.join(&entry.filename);
        if self.fs.exists(&path) {
            self.fs.delete_file(&path)?;
        }
        self.persist(&index)
    }

    fn get(&self, id: &NotebookId) -> Result<Option<NotebookIdentity>> {
        let index = self.lock();
        Ok(index.notebooks.get(id).map(|entry| NotebookIdentity {
            id: id.clone(),
            name: entry.name.clone(),
        }))
    }
}

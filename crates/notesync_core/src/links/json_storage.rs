//! Link storage in a single JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LinkEntry, LinkStorage};
use crate::error::{NotesyncError, Result};
use crate::fs::FileSystem;
use crate::store::NotebookId;

/// On-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkFile {
    /// Format version
    version: u32,
    /// When the file was last written
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    /// Entries keyed by notebook id
    #[serde(default)]
    links: BTreeMap<NotebookId, LinkEntry>,
}

impl LinkFile {
    const CURRENT_VERSION: u32 = 1;

    fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            updated_at: None,
            links: BTreeMap::new(),
        }
    }
}

/// Link storage backed by a JSON file, rewritten on every change.
pub struct JsonLinkStorage<FS: FileSystem> {
    fs: FS,
    path: PathBuf,
    file: Mutex<LinkFile>,
}

impl<FS: FileSystem> JsonLinkStorage<FS> {
    /// Open the file at `path`, starting empty if it does not exist.
    pub fn open(fs: FS, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = if fs.exists(&path) {
            let raw = fs.read_text(&path).map_err(|e| NotesyncError::FileRead {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&raw)?
        } else {
            LinkFile::new()
        };
        Ok(Self {
            fs,
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, LinkFile> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, file: &mut LinkFile) -> Result<()> {
        file.updated_at = Some(Utc::now());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            self.fs.create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        self.fs
            .write_text(&self.path, &json)
            .map_err(|e| NotesyncError::FileWrite {
                path: self.path.clone(),
                source: e,
            })
    }
}

impl<FS: FileSystem> LinkStorage for JsonLinkStorage<FS> {
    fn load_all(&self) -> Result<Vec<LinkEntry>> {
        Ok(self.lock().links.values().cloned().collect())
    }

    fn save(&self, entry: &LinkEntry) -> Result<()> {
        let mut file = self.lock();
        let mut next = file.clone();
        next.links.insert(entry.notebook_id.clone(), entry.clone());
        self.write(&mut next)?;
        *file = next;
        Ok(())
    }

    fn remove(&self, notebook_id: &NotebookId) -> Result<()> {
        let mut file = self.lock();
        if !file.links.contains_key(notebook_id) {
            return Ok(());
        }
        let mut next = file.clone();
        next.links.remove(notebook_id);
        self.write(&mut next)?;
        *file = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::RepositoryAddress;
    use crate::fs::InMemoryFileSystem;
    use crate::revision::VersionedRevision;

    #[test]
    fn test_entries_survive_reopen() {
        let fs = InMemoryFileSystem::new();
        let path = Path::new("/org/.notesync/links.json");
        let repo = RepositoryAddress::parse("dropbox:/org").unwrap();

        let storage = JsonLinkStorage::open(fs.clone(), path).unwrap();
        let mut entry = LinkEntry::new(NotebookId::from("nb-1"), repo.clone(), "booky.org");
        entry.mark_synced(VersionedRevision::new(repo.join("booky.org"), "015a", Utc::now()), 99);
        storage.save(&entry).unwrap();
        storage
            .save(&LinkEntry::new(NotebookId::from("nb-2"), repo.clone(), "other.org"))
            .unwrap();
        storage.remove(&NotebookId::from("nb-2")).unwrap();

        let reopened = JsonLinkStorage::open(fs.clone(), path).unwrap();
        let loaded = reopened.load_all().unwrap();
        assert_eq!(loaded, vec![entry]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let fs = InMemoryFileSystem::new();
        let storage = JsonLinkStorage::open(fs, "/none/links.json").unwrap();
        assert!(storage.load_all().unwrap().is_empty());
    }
}

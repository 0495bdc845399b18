//! In-memory filesystem.
//!
//! Files live in a shared map, so clones see the same contents. Modification
//! times come from a logical clock that ticks on every write, which makes
//! "was this file modified since X" checks deterministic in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::FileSystem;

#[derive(Debug, Clone)]
struct MemoryFile {
    content: Vec<u8>,
    modified_at: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, MemoryFile>,
    dirs: BTreeSet<PathBuf>,
}

/// A filesystem that keeps everything in memory.
#[derive(Clone, Default)]
pub struct InMemoryFileSystem {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<AtomicI64>,
}

impl InMemoryFileSystem {
    /// Create a new empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (builder pattern).
    pub fn with_file(self, path: impl AsRef<Path>, content: &str) -> Self {
        // Writing to an in-memory map cannot fail
        let _ = self.write_text(path.as_ref(), content);
        self
    }

    /// Bump the modification time of a file without changing its content.
    pub fn touch(&self, path: &Path) -> Result<()> {
        let tick = self.tick();
        let mut state = self.lock();
        match state.files.get_mut(path) {
            Some(file) => {
                file.modified_at = tick;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn put(&self, path: &Path, content: Vec<u8>) {
        let tick = self.tick();
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            insert_dir_chain(&mut state.dirs, parent);
        }
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                content,
                modified_at: tick,
            },
        );
    }
}

fn insert_dir_chain(dirs: &mut BTreeSet<PathBuf>, dir: &Path) {
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        dirs.insert(ancestor.to_path_buf());
    }
}

fn not_found(path: &Path) -> Error {
    Error::new(ErrorKind::NotFound, format!("File not found: {:?}", path))
}

impl FileSystem for InMemoryFileSystem {
    fn read_text(&self, path: &Path) -> Result<String> {
        let bytes = self.read_binary(path)?;
        String::from_utf8(bytes).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        self.put(path, content.as_bytes().to_vec());
        Ok(())
    }

    fn create_exclusive(&self, path: &Path, content: &[u8]) -> Result<()> {
        if self.exists(path) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("File exists: {:?}", path),
            ));
        }
        self.put(path, content.to_vec());
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        match self.lock().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(not_found(path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.lock();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        insert_dir_chain(&mut self.lock().dirs, path);
        Ok(())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.lock().dirs.contains(path)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        let tick = self.tick();
        let mut state = self.lock();

        if state.files.contains_key(to) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("Destination already exists: {:?}", to),
            ));
        }
        let mut file = state.files.remove(from).ok_or_else(|| not_found(from))?;
        // Renames count as a modification, like ctime on a real filesystem
        file.modified_at = tick;
        if let Some(parent) = to.parent() {
            insert_dir_chain(&mut state.dirs, parent);
        }
        state.files.insert(to.to_path_buf(), file);
        Ok(())
    }

    fn read_binary(&self, path: &Path) -> Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .map(|f| f.content.clone())
            .ok_or_else(|| not_found(path))
    }

    fn write_binary(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.put(path, content.to_vec());
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let state = self.lock();
        let files = state.files.keys().filter(|p| p.parent() == Some(dir));
        let dirs = state.dirs.iter().filter(|p| p.parent() == Some(dir));
        Ok(files.chain(dirs).cloned().collect())
    }

    fn modified_at(&self, path: &Path) -> Option<i64> {
        self.lock().files.get(path).map(|f| f.modified_at)
    }
}

//! In-process repository for tests and dry runs (`mock:` scheme).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use super::{BoxFuture, Repository, RepositoryCapabilities, check_location, require_path_only};
use crate::address::{Location, RepositoryAddress};
use crate::error::{NotesyncError, Result};
use crate::naming::{names_collide, validate_name};
use crate::revision::VersionedRevision;

#[derive(Debug, Clone)]
struct StoredBook {
    content: Vec<u8>,
    revision: u64,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    books: BTreeMap<String, StoredBook>,
    next_revision: u64,
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

/// Repository that keeps every notebook in memory.
///
/// Behaves like a remote that requires a connection: it can be taken
/// offline with [`MemoryRepository::set_reachable`], after which every
/// operation fails with `RepositoryUnavailable`. Revision markers are an
/// increasing counter.
#[derive(Debug)]
pub struct MemoryRepository {
    address: RepositoryAddress,
    state: Mutex<MemoryState>,
    reachable: AtomicBool,
}

impl MemoryRepository {
    /// Build from a `mock:` address.
    pub fn from_address(address: &RepositoryAddress) -> Result<Self> {
        require_path_only(address, "mock")?;
        Ok(Self {
            address: address.clone(),
            state: Mutex::new(MemoryState::default()),
            reachable: AtomicBool::new(true),
        })
    }

    /// Build from an address string.
    pub fn new(address: &str) -> Result<Self> {
        Self::from_address(&RepositoryAddress::parse(address)?)
    }

    /// Simulate connectivity loss or recovery.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Write a notebook directly, as another device would.
    pub fn put_book(&self, filename: &str, content: &str) -> VersionedRevision {
        let mut state = self.lock();
        let revision = state.bump();
        let book = StoredBook {
            content: content.as_bytes().to_vec(),
            revision,
            modified_at: Utc::now(),
        };
        state.books.insert(filename.to_string(), book.clone());
        self.describe(filename, &book)
    }

    /// Remove a notebook directly, as another device would.
    pub fn remove_book(&self, filename: &str) -> bool {
        self.lock().books.remove(filename).is_some()
    }

    /// Current content of `filename`.
    pub fn book_content(&self, filename: &str) -> Option<String> {
        self.lock()
            .books
            .get(filename)
            .map(|b| String::from_utf8_lossy(&b.content).into_owned())
    }

    /// Sorted filenames currently stored.
    pub fn filenames(&self) -> Vec<String> {
        self.lock().books.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn online(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NotesyncError::RepositoryUnavailable(self.address.to_string()))
        }
    }

    fn describe(&self, filename: &str, book: &StoredBook) -> VersionedRevision {
        VersionedRevision::new(
            self.address.join(filename),
            book.revision.to_string(),
            book.modified_at,
        )
    }

    fn list_now(&self) -> Result<Vec<VersionedRevision>> {
        self.online()?;
        Ok(self
            .lock()
            .books
            .iter()
            .map(|(name, book)| self.describe(name, book))
            .collect())
    }

    fn fetch_now(&self, location: &Location, destination: &Path) -> Result<VersionedRevision> {
        self.online()?;
        check_location(&self.address, location)?;
        let book = self
            .lock()
            .books
            .get(location.filename())
            .cloned()
            .ok_or_else(|| NotesyncError::NotFound(location.to_string()))?;
        std::fs::write(destination, &book.content).map_err(|e| NotesyncError::FileWrite {
            path: destination.to_path_buf(),
            source: e,
        })?;
        Ok(self.describe(location.filename(), &book))
    }

    fn store_now(&self, local_file: &Path, filename: &str) -> Result<VersionedRevision> {
        self.online()?;
        validate_name(filename)?;
        let content = std::fs::read(local_file).map_err(|e| NotesyncError::FileRead {
            path: local_file.to_path_buf(),
            source: e,
        })?;
        let mut state = self.lock();
        let book = StoredBook {
            content,
            revision: state.bump(),
            modified_at: Utc::now(),
        };
        state.books.insert(filename.to_string(), book.clone());
        Ok(self.describe(filename, &book))
    }

    fn rename_now(&self, location: &Location, new_name: &str) -> Result<VersionedRevision> {
        self.online()?;
        check_location(&self.address, location)?;
        validate_name(new_name)?;
        let mut state = self.lock();
        if location.filename() == new_name {
            let book = state
                .books
                .get(new_name)
                .ok_or_else(|| NotesyncError::NotFound(location.to_string()))?;
            return Ok(self.describe(new_name, book));
        }
        // A case-only rename of the book itself is allowed
        let taken = state
            .books
            .keys()
            .any(|k| k != location.filename() && names_collide(k, new_name));
        if taken {
            return Err(NotesyncError::NameCollision(
                self.address.join(new_name).to_string(),
            ));
        }
        let book = state
            .books
            .remove(location.filename())
            .ok_or_else(|| NotesyncError::NotFound(location.to_string()))?;
        state.books.insert(new_name.to_string(), book.clone());
        Ok(self.describe(new_name, &book))
    }

    fn delete_now(&self, location: &Location) -> Result<()> {
        self.online()?;
        check_location(&self.address, location)?;
        self.lock().books.remove(location.filename());
        Ok(())
    }
}

impl Repository for MemoryRepository {
    fn is_connected(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        RepositoryCapabilities {
            requires_connection: true,
            supports_directories: false,
            concurrent_access: true,
        }
    }

    fn address(&self) -> &RepositoryAddress {
        &self.address
    }

    fn list_books(&self) -> BoxFuture<'_, Result<Vec<VersionedRevision>>> {
        Box::pin(async move { self.list_now() })
    }

    fn fetch<'a>(
        &'a self,
        location: &'a Location,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.fetch_now(location, destination) })
    }

    fn store<'a>(
        &'a self,
        local_file: &'a Path,
        filename: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.store_now(local_file, filename) })
    }

    fn rename<'a>(
        &'a self,
        location: &'a Location,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.rename_now(location, new_name) })
    }

    fn delete<'a>(&'a self, location: &'a Location) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.delete_now(location) })
    }
}

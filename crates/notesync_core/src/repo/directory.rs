//! Repository backed by a plain directory (`file:` scheme).
//!
//! Useful for a folder kept in sync by some other tool (an SD card, a
//! Syncthing share). Every notebook is one file directly under the root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{
    BoxFuture, Repository, RepositoryCapabilities, RetryPolicy, check_location, require_path_only,
};
use crate::address::{Location, RepositoryAddress};
use crate::error::{NotesyncError, Result};
use crate::naming::{is_notebook_file, validate_name};
use crate::revision::VersionedRevision;

/// Directory-backed repository.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    address: RepositoryAddress,
    root: PathBuf,
    retry: RetryPolicy,
}

impl DirectoryRepository {
    /// Build from a `file:` address. The directory is not touched.
    pub fn from_address(address: &RepositoryAddress, retry: RetryPolicy) -> Result<Self> {
        require_path_only(address, "file")?;
        Ok(Self {
            address: address.clone(),
            root: PathBuf::from(address.location()),
            retry,
        })
    }

    /// Root directory on disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it is missing.
    pub fn create_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Path of a notebook file directly under the root.
    fn path_of(&self, filename: &str) -> Result<PathBuf> {
        validate_name(filename)?;
        Ok(self.root.join(filename))
    }

    fn check_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(NotesyncError::RepositoryUnavailable(self.address.to_string()))
        }
    }

    fn describe(&self, filename: &str, meta: &fs::Metadata) -> VersionedRevision {
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let nanos = modified.timestamp_nanos_opt().unwrap_or_default();
        VersionedRevision::new(
            self.address.join(filename),
            format!("{:x}-{:x}", nanos, meta.len()),
            modified,
        )
    }

    fn list_now(&self) -> Result<Vec<VersionedRevision>> {
        self.check_root()?;
        let mut books = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| self.transport(e, "list"))? {
            let entry = entry.map_err(|e| self.transport(e, "list"))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_notebook_file(&name) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| self.transport(e, &name))?;
            if meta.is_file() {
                books.push(self.describe(&name, &meta));
            }
        }
        books.sort_by(|a, b| a.filename().cmp(b.filename()));
        Ok(books)
    }

    fn fetch_now(&self, location: &Location, destination: &Path) -> Result<VersionedRevision> {
        check_location(&self.address, location)?;
        self.check_root()?;
        let source = self.path_of(location.filename())?;

        let before = fs::metadata(&source).map_err(|e| self.transport(e, location.filename()))?;
        let content = fs::read(&source).map_err(|e| self.transport(e, location.filename()))?;
        let after = fs::metadata(&source).map_err(|e| self.transport(e, location.filename()))?;

        let revision = self.describe(location.filename(), &before);
        if revision.revision() != self.describe(location.filename(), &after).revision() {
            return Err(NotesyncError::Transport(format!(
                "{} changed while being read",
                location
            )));
        }

        fs::write(destination, content).map_err(|e| NotesyncError::FileWrite {
            path: destination.to_path_buf(),
            source: e,
        })?;
        Ok(revision)
    }

    fn store_now(&self, local_file: &Path, filename: &str) -> Result<VersionedRevision> {
        let target = self.path_of(filename)?;
        self.check_root()?;
        let content = fs::read(local_file).map_err(|e| NotesyncError::FileRead {
            path: local_file.to_path_buf(),
            source: e,
        })?;

        // Write next to the target, then rename over it
        let temp = self
            .root
            .join(format!(".{}.{}.tmp", filename, uuid::Uuid::new_v4().simple()));
        let written = fs::write(&temp, &content).and_then(|_| fs::rename(&temp, &target));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(self.transport(e, filename));
        }

        let meta = fs::metadata(&target).map_err(|e| self.transport(e, filename))?;
        log::debug!("[Directory repo] Stored {}", target.display());
        Ok(self.describe(filename, &meta))
    }

    fn rename_now(&self, location: &Location, new_name: &str) -> Result<VersionedRevision> {
        check_location(&self.address, location)?;
        self.check_root()?;
        let from = self.path_of(location.filename())?;
        let to = self.path_of(new_name)?;

        if !from.exists() {
            return Err(NotesyncError::NotFound(location.to_string()));
        }
        if location.filename() != new_name {
            if to.exists() {
                return Err(NotesyncError::NameCollision(
                    self.address.join(new_name).to_string(),
                ));
            }
            fs::rename(&from, &to).map_err(|e| self.transport(e, location.filename()))?;
        }

        let meta = fs::metadata(&to).map_err(|e| self.transport(e, new_name))?;
        Ok(self.describe(new_name, &meta))
    }

    fn delete_now(&self, location: &Location) -> Result<()> {
        check_location(&self.address, location)?;
        self.check_root()?;
        match fs::remove_file(self.path_of(location.filename())?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.transport(e, location.filename())),
        }
    }

    fn transport(&self, e: io::Error, what: &str) -> NotesyncError {
        if e.kind() == io::ErrorKind::NotFound {
            NotesyncError::NotFound(self.address.join(what).to_string())
        } else {
            NotesyncError::Transport(format!("{}: {}", what, e))
        }
    }
}

impl Repository for DirectoryRepository {
    fn capabilities(&self) -> RepositoryCapabilities {
        RepositoryCapabilities {
            requires_connection: false,
            supports_directories: true,
            concurrent_access: true,
        }
    }

    fn address(&self) -> &RepositoryAddress {
        &self.address
    }

    fn list_books(&self) -> BoxFuture<'_, Result<Vec<VersionedRevision>>> {
        Box::pin(async move { self.retry.run("list", || self.list_now()) })
    }

    fn fetch<'a>(
        &'a self,
        location: &'a Location,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move {
            self.retry
                .run("fetch", || self.fetch_now(location, destination))
        })
    }

    fn store<'a>(
        &'a self,
        local_file: &'a Path,
        filename: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.retry.run("store", || self.store_now(local_file, filename)) })
    }

    fn rename<'a>(
        &'a self,
        location: &'a Location,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.retry.run("rename", || self.rename_now(location, new_name)) })
    }

    fn delete<'a>(&'a self, location: &'a Location) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.retry.run("delete", || self.delete_now(location)) })
    }
}

//! Local file access for the notebook store and file-backed link storage.
//!
//! Two implementations: [`RealFileSystem`] for the notebooks directory on
//! disk and [`InMemoryFileSystem`] for tests.

mod memory;
#[cfg(not(target_arch = "wasm32"))]
mod native;

pub use memory::InMemoryFileSystem;
#[cfg(not(target_arch = "wasm32"))]
pub use native::RealFileSystem;

use std::io::Result;
use std::path::{Path, PathBuf};

/// File operations the store and link storages need.
///
/// Shared across concurrently reconciled notebooks, hence `Send + Sync`.
pub trait FileSystem: Send + Sync {
    /// Read a UTF-8 file (index and link table JSON, config TOML)
    fn read_text(&self, path: &Path) -> Result<String>;

    /// Replace a text file, creating it if needed
    fn write_text(&self, path: &Path, content: &str) -> Result<()>;

    /// Read a notebook's bytes
    fn read_binary(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace a notebook's bytes. Readers see either the old or the new
    /// content, never a mix.
    fn write_binary(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Create a file that must not exist yet (`AlreadyExists` otherwise)
    fn create_exclusive(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Rename `from` to `to`; fails when `from` is missing or `to` exists
    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Whether a file or directory exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Create a directory and its parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Entries directly inside `dir`
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Modification marker of a file; grows whenever the file is written.
    ///
    /// `None` when the file is missing.
    fn modified_at(&self, path: &Path) -> Option<i64>;
}

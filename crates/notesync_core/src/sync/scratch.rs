//! Scratch files handed to repositories for fetch and store.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{NotesyncError, Result};

/// A uniquely named file in the scratch directory, removed on drop.
#[derive(Debug)]
pub(crate) struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Reserve a path in `dir`. Nothing is written yet.
    pub(crate) fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("{}.tmp", uuid::Uuid::new_v4().simple())),
        })
    }

    /// Create a scratch file holding `bytes`.
    pub(crate) fn with_content(dir: &Path, bytes: &[u8]) -> Result<Self> {
        let scratch = Self::new(dir)?;
        fs::write(&scratch.path, bytes).map_err(|e| NotesyncError::FileWrite {
            path: scratch.path.clone(),
            source: e,
        })?;
        Ok(scratch)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| NotesyncError::FileRead {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

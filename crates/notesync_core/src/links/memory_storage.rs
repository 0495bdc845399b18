//! In-memory link storage for tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{LinkEntry, LinkStorage};
use crate::error::Result;
use crate::store::NotebookId;

/// Link storage that keeps entries in a map.
#[derive(Debug, Default)]
pub struct MemoryLinkStorage {
    entries: Mutex<BTreeMap<NotebookId, LinkEntry>>,
}

impl MemoryLinkStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinkStorage for MemoryLinkStorage {
    fn load_all(&self) -> Result<Vec<LinkEntry>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.values().cloned().collect())
    }

    fn save(&self, entry: &LinkEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.notebook_id.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, notebook_id: &NotebookId) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(notebook_id);
        Ok(())
    }
}

//! SQLite-backed link storage.
//!
//! One row per (notebook, repository) pair. Because a notebook is linked to
//! at most one repository, saving an entry also drops rows that link the
//! same notebook elsewhere.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::{LinkEntry, LinkStorage};
use crate::address::RepositoryAddress;
use crate::error::Result;
use crate::revision::VersionedRevision;
use crate::store::NotebookId;

/// Row shape of the `links` table.
type LinkRow = (
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
);

/// SQLite-backed link storage.
///
/// The connection is wrapped in a `Mutex`; SQLite runs in serialized mode.
pub struct SqliteLinkStorage {
    conn: Mutex<Connection>,
}

impl SqliteLinkStorage {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database for testing.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                notebook_id TEXT NOT NULL,
                repository_address TEXT NOT NULL,
                linked_filename TEXT NOT NULL,
                last_synced_revision_marker TEXT,
                last_synced_timestamp INTEGER,
                remote_modified_at INTEGER,
                local_synced_at INTEGER,
                PRIMARY KEY (notebook_id, repository_address)
            );

            CREATE INDEX IF NOT EXISTS idx_links_repository ON links(repository_address);
            "#,
        )?;
        Ok(())
    }

    fn entry_from_row(row: LinkRow) -> Result<LinkEntry> {
        let (id, address, filename, marker, synced_at, remote_modified_at, local_synced_at) = row;
        let repository = RepositoryAddress::parse(&address)?;
        let last_synced = marker.map(|marker| {
            VersionedRevision::new(
                repository.join(&filename),
                marker,
                remote_modified_at
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .unwrap_or_default(),
            )
        });
        Ok(LinkEntry {
            notebook_id: NotebookId::from(id),
            repository,
            linked_filename: filename,
            last_synced,
            local_synced_at,
            synced_at: synced_at.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }
}

impl LinkStorage for SqliteLinkStorage {
    fn load_all(&self) -> Result<Vec<LinkEntry>> {
        let rows: Vec<LinkRow> = {
            let conn = self.lock();
            let mut stmt = conn.prepare(
                "SELECT notebook_id, repository_address, linked_filename,
                        last_synced_revision_marker, last_synced_timestamp,
                        remote_modified_at, local_synced_at
                 FROM links ORDER BY notebook_id",
            )?;
            stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::entry_from_row(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("[Links] Skipping unreadable link row: {}", e),
            }
        }
        Ok(entries)
    }

    fn save(&self, entry: &LinkEntry) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let address = entry.repository.to_string();
        tx.execute(
            "DELETE FROM links WHERE notebook_id = ? AND repository_address != ?",
            params![entry.notebook_id.as_str(), address],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO links (notebook_id, repository_address, linked_filename,
                last_synced_revision_marker, last_synced_timestamp, remote_modified_at,
                local_synced_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.notebook_id.as_str(),
                address,
                entry.linked_filename,
                entry.last_synced.as_ref().map(|r| r.revision().to_string()),
                entry.synced_at.map(|t| t.timestamp_millis()),
                entry.last_synced.as_ref().map(|r| r.modified_at().timestamp_millis()),
                entry.local_synced_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, notebook_id: &NotebookId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM links WHERE notebook_id = ?",
            params![notebook_id.as_str()],
        )?;
        Ok(())
    }
}

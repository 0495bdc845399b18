//! Core library for notesync.
//!
//! Keeps plain-text outline notebooks in a local directory in sync with
//! copies stored in remote repositories (a mirrored directory, Dropbox, an
//! in-memory mock for tests).
//!
//! ```ignore
//! use notesync_core::config::Config;
//! use notesync_core::fs::RealFileSystem;
//! use notesync_core::links::LinkTable;
//! use notesync_core::store::FsNotebookStore;
//! use notesync_core::sync::Synchronizer;
//!
//! let config = Config::load()?;
//! let store = FsNotebookStore::from_config(RealFileSystem, &config)?;
//! let links = LinkTable::from_config(&config)?;
//! let sync = Synchronizer::from_config(store, links, &config);
//!
//! let summary = sync.sync_all();
//! println!("{} pushed, {} pulled", summary.pushed(), summary.pulled());
//! ```
#![warn(missing_docs)]

/// Repository addresses and remote locations
pub mod address;

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Filesystem abstraction
pub mod fs;

/// Link table (notebook to repository links and sync state)
pub mod links;

/// Notebook names and remote filenames
pub mod naming;

/// Remote repositories and the registry resolving them
pub mod repo;

/// Versioned revisions of remote notebooks
pub mod revision;

/// Local notebook store
pub mod store;

/// Synchronization
pub mod sync;

pub use address::{Location, RepositoryAddress};
pub use error::{NotesyncError, Result};
pub use links::{LinkEntry, LinkTable};
pub use repo::{Repository, RepositoryRegistry};
pub use revision::VersionedRevision;
pub use store::{FsNotebookStore, NotebookId, NotebookIdentity, NotebookStore};
pub use sync::{SyncOutcome, SyncSummary, Synchronizer};

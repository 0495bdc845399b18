//! Versioned revisions ("rooks").
//!
//! A [`VersionedRevision`] describes one observed copy of a notebook at a
//! remote location. The revision marker is opaque to everything except the
//! backend that produced it: a Dropbox `rev`, a file mtime, a counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{Location, RepositoryAddress};

/// Immutable descriptor of one stored copy of a notebook.
///
/// A remote write always produces a new value; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRevision {
    location: Location,
    revision: String,
    modified_at: DateTime<Utc>,
}

impl VersionedRevision {
    /// Create a revision descriptor.
    pub fn new(location: Location, revision: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            location,
            revision: revision.into(),
            modified_at,
        }
    }

    /// Owning repository.
    pub fn repository(&self) -> &RepositoryAddress {
        self.location.repository()
    }

    /// Full remote location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Filename inside the repository.
    pub fn filename(&self) -> &str {
        self.location.filename()
    }

    /// Backend-defined revision marker.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Remote last-modified timestamp.
    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    /// Whether both descriptors refer to the same stored content.
    pub fn same_revision(&self, other: &VersionedRevision) -> bool {
        self.location == other.location && self.revision == other.revision
    }
}

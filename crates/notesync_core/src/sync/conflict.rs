//! Conflict representation and resolution.
//!
//! A conflict means the local notebook and its remote copy both changed
//! since the last sync. Nothing is merged: the local side is kept, and the
//! remote side can be saved next to it as a `<name>.conflict` notebook.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::NotebookId;

/// Suffix appended to the name of a conflict copy.
pub const CONFLICT_SUFFIX: &str = ".conflict";

/// A notebook whose local and remote sides both changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Notebook in conflict
    pub notebook_id: NotebookId,

    /// Display name of the notebook
    pub name: String,

    /// Remote location, e.g. `dropbox:/org/booky.org`
    pub location: String,

    /// Local modification marker
    pub local_modified_at: Option<i64>,

    /// Revision marker found remotely
    pub remote_revision: String,

    /// Remote modification timestamp
    pub remote_modified_at: Option<DateTime<Utc>>,

    /// Name of the local notebook holding the remote content, if one was saved
    pub conflict_copy: Option<String>,
}

impl ConflictInfo {
    /// Name of the conflict copy for a notebook name.
    ///
    /// For example: `booky` -> `booky.conflict`
    pub fn conflict_name(name: &str) -> String {
        format!("{}{}", name, CONFLICT_SUFFIX)
    }

    /// Whether `name` is itself a conflict copy.
    pub fn is_conflict_copy(name: &str) -> bool {
        name.ends_with(CONFLICT_SUFFIX)
    }
}

/// Explicit resolution of a reported conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Store the local notebook over the remote copy
    KeepLocal,

    /// Write the remote copy into the local notebook
    KeepRemote,

    /// Do nothing; the conflict resurfaces on the next sync
    Skip,
}

impl FromStr for ConflictResolution {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "keep_local" | "keep-local" => Ok(ConflictResolution::KeepLocal),
            "remote" | "keep_remote" | "keep-remote" => Ok(ConflictResolution::KeepRemote),
            "skip" => Ok(ConflictResolution::Skip),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_name() {
        assert_eq!(ConflictInfo::conflict_name("booky"), "booky.conflict");
        assert!(ConflictInfo::is_conflict_copy("booky.conflict"));
        assert!(!ConflictInfo::is_conflict_copy("booky"));
    }

    #[test]
    fn test_resolution_from_str() {
        assert_eq!(
            "keep-local".parse::<ConflictResolution>(),
            Ok(ConflictResolution::KeepLocal)
        );
        assert_eq!(
            "REMOTE".parse::<ConflictResolution>(),
            Ok(ConflictResolution::KeepRemote)
        );
        assert_eq!("skip".parse::<ConflictResolution>(), Ok(ConflictResolution::Skip));
        assert!("merge".parse::<ConflictResolution>().is_err());
    }
}

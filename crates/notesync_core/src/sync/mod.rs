//! Synchronization of local notebooks with their linked repositories.
//!
//! # Architecture
//!
//! ```text
//! Repositories (file:, mock:, dropbox:)
//!         ↑↓  list / fetch / store / rename / delete
//!    Synchronizer (per-notebook reconcile, grouped per repository)
//!         ↑↓
//!    LinkTable (last synced revision per notebook)
//!         ↑↓
//!    NotebookStore (local notebooks)
//! ```
//!
//! # Key Components
//!
//! - [`Synchronizer`] - Runs sync passes and the explicit operations
//! - [`SyncAction`] / [`classify`] - Decides what one notebook needs
//! - [`SyncOutcome`] / [`SyncSummary`] - What happened
//! - [`ConflictInfo`] / [`ConflictResolution`] - Conflicts and how to resolve them

mod action;
/// Conflict types
pub mod conflict;
mod reconciler;
mod scratch;

pub use action::{SyncAction, classify};
pub use conflict::{ConflictInfo, ConflictResolution};
pub use reconciler::{ProgressFn, Synchronizer};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::RepositoryAddress;
use crate::error::NotesyncError;
use crate::store::NotebookId;

/// Reconciler behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Delete the remote copy when a linked notebook is deleted locally
    pub push_deletions: bool,
    /// Save the remote side of a conflict as a `<name>.conflict` notebook
    pub conflict_copies: bool,
    /// Import remote books that no local notebook is linked to
    pub import_remote: bool,
    /// Link unlinked notebooks when exactly one repository is configured
    pub auto_link: bool,
    /// Concurrent notebooks per repository, for backends that allow it
    pub max_parallel: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            push_deletions: false,
            conflict_copies: true,
            import_remote: true,
            auto_link: false,
            max_parallel: 4,
        }
    }
}

/// Result of syncing one notebook.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Nothing to do
    Unchanged,
    /// Local changes were stored remotely
    Pushed,
    /// Remote changes were written locally
    Pulled,
    /// First copy created in the repository
    CreatedRemote,
    /// Remote-only book imported as a new local notebook
    CreatedLocal,
    /// Local deletion propagated to the repository
    DeletedRemote,
    /// Local deletion dropped the link; remote copy left alone
    Unlinked,
    /// The remote copy disappeared; local notebook and link kept
    MissingRemote,
    /// Both sides changed since the last sync
    Conflict(ConflictInfo),
    /// The notebook could not be synced this pass
    Failed(NotesyncError),
}

impl SyncOutcome {
    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Pushed => "pushed",
            SyncOutcome::Pulled => "pulled",
            SyncOutcome::CreatedRemote => "created remote",
            SyncOutcome::CreatedLocal => "created local",
            SyncOutcome::DeletedRemote => "deleted remote",
            SyncOutcome::Unlinked => "unlinked",
            SyncOutcome::MissingRemote => "missing remote",
            SyncOutcome::Conflict(_) => "conflict",
            SyncOutcome::Failed(_) => "failed",
        }
    }

    /// Whether this outcome is a conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncOutcome::Conflict(_))
    }

    /// Whether this outcome is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }
}

/// Outcome for one notebook within a pass.
#[derive(Debug)]
pub struct NotebookResult {
    /// Notebook the outcome belongs to; `None` for a failed import
    pub notebook_id: Option<NotebookId>,
    /// Display name at the time of the sync
    pub name: String,
    /// Repository involved, if any
    pub repository: Option<RepositoryAddress>,
    /// What happened
    pub outcome: SyncOutcome,
}

/// Result of a full sync pass.
#[derive(Debug)]
pub struct SyncSummary {
    /// Per-notebook outcomes, sorted by name
    pub results: Vec<NotebookResult>,
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// When the pass finished
    pub finished_at: DateTime<Utc>,
}

impl SyncSummary {
    fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// Notebooks left as they were.
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Unchanged))
    }

    /// Notebooks pushed to an existing remote copy.
    pub fn pushed(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Pushed))
    }

    /// Notebooks updated from the remote.
    pub fn pulled(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Pulled))
    }

    /// Notebooks created on either side.
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::CreatedRemote | SyncOutcome::CreatedLocal))
    }

    /// Remote copies deleted.
    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::DeletedRemote))
    }

    /// Links dropped after a local deletion.
    pub fn unlinked(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::Unlinked))
    }

    /// Notebooks whose remote copy went missing.
    pub fn missing(&self) -> usize {
        self.count(|o| matches!(o, SyncOutcome::MissingRemote))
    }

    /// Notebooks in conflict.
    pub fn conflicted(&self) -> usize {
        self.count(SyncOutcome::is_conflict)
    }

    /// Notebooks that failed.
    pub fn failed(&self) -> usize {
        self.count(SyncOutcome::is_failure)
    }

    /// Whether the pass finished without conflicts or failures.
    pub fn is_clean(&self) -> bool {
        self.conflicted() == 0 && self.failed() == 0
    }

    /// Outcome of one notebook, if it took part.
    pub fn outcome_for(&self, notebook_id: &NotebookId) -> Option<&SyncOutcome> {
        self.results
            .iter()
            .find(|r| r.notebook_id.as_ref() == Some(notebook_id))
            .map(|r| &r.outcome)
    }

    /// Conflicts of this pass.
    pub fn conflicts(&self) -> Vec<&ConflictInfo> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                SyncOutcome::Conflict(info) => Some(info),
                _ => None,
            })
            .collect()
    }
}

/// Progress information for a sync pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Current stage
    pub stage: SyncStage,
    /// Notebooks processed so far
    pub current: usize,
    /// Notebooks to process
    pub total: usize,
    /// Overall percentage complete (0-100)
    pub percent: u8,
    /// Optional detail (notebook name, repository)
    pub message: Option<String>,
}

impl SyncProgress {
    pub(crate) fn new(stage: SyncStage, current: usize, total: usize, message: Option<String>) -> Self {
        let percent = match (stage, total) {
            (SyncStage::Complete, _) => 100,
            (_, 0) => 0,
            _ => ((current.min(total) * 100) / total) as u8,
        };
        Self {
            stage,
            current,
            total,
            percent,
            message,
        }
    }
}

/// Stages of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Linking notebooks automatically
    Linking,
    /// Listing repositories
    ListingRemote,
    /// Reconciling linked notebooks
    Reconciling,
    /// Importing remote-only books
    Importing,
    /// Pass complete
    Complete,
}

impl SyncStage {
    /// Human-readable description of this stage
    pub fn description(&self) -> &'static str {
        match self {
            SyncStage::Linking => "Linking notebooks...",
            SyncStage::ListingRemote => "Listing repositories...",
            SyncStage::Reconciling => "Syncing notebooks...",
            SyncStage::Importing => "Importing new notebooks...",
            SyncStage::Complete => "Sync complete!",
        }
    }
}

/// Cancels a running sync pass.
///
/// Checked between notebooks: an operation already sent to a backend runs
/// to completion and its result is recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// New, untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: SyncOutcome) -> NotebookResult {
        NotebookResult {
            notebook_id: Some(NotebookId::new()),
            name: "n".into(),
            repository: None,
            outcome,
        }
    }

    #[test]
    fn test_summary_counts() {
        let now = Utc::now();
        let summary = SyncSummary {
            results: vec![
                result(SyncOutcome::Unchanged),
                result(SyncOutcome::Pushed),
                result(SyncOutcome::CreatedRemote),
                result(SyncOutcome::CreatedLocal),
                result(SyncOutcome::Failed(NotesyncError::Cancelled)),
            ],
            started_at: now,
            finished_at: now,
        };
        assert_eq!(summary.unchanged(), 1);
        assert_eq!(summary.pushed(), 1);
        assert_eq!(summary.created(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.conflicted(), 0);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(SyncProgress::new(SyncStage::Reconciling, 1, 4, None).percent, 25);
        assert_eq!(SyncProgress::new(SyncStage::Reconciling, 0, 0, None).percent, 0);
        assert_eq!(SyncProgress::new(SyncStage::Complete, 0, 0, None).percent, 100);
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
        handle.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn test_options_from_partial_toml() {
        let options: SyncOptions = toml::from_str("push_deletions = true").unwrap();
        assert!(options.push_deletions);
        assert!(options.conflict_copies);
        assert_eq!(options.max_parallel, 4);
    }
}

//! Per-notebook classification.
//!
//! Given the local content, the remote revision found under the linked
//! filename, and the link entry, decide what one notebook needs. Pure: no
//! I/O happens here.

use super::SyncOptions;
use crate::links::LinkEntry;
use crate::revision::VersionedRevision;
use crate::store::LocalContent;

/// What a notebook needs this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Both sides match the last sync
    Unchanged,
    /// Never synced and absent remotely: create the remote copy
    PushCreate,
    /// Only the local side changed
    PushUpdate,
    /// Only the remote side changed, or a never-synced empty local notebook
    Pull,
    /// Both sides changed, or an unsynced local notebook meets a remote copy
    Conflict,
    /// The remote copy vanished after a sync
    RemoteDeleted,
    /// The local notebook is gone
    LocalDeleted {
        /// Whether to delete the remote copy as well
        delete_remote: bool,
    },
}

/// Decide the action for one notebook.
///
/// `local` is `None` when the notebook was deleted locally; `remote` is the
/// listing entry whose filename equals `entry.linked_filename`.
pub fn classify(
    local: Option<&LocalContent>,
    remote: Option<&VersionedRevision>,
    entry: &LinkEntry,
    options: &SyncOptions,
) -> SyncAction {
    let Some(local) = local else {
        return SyncAction::LocalDeleted {
            delete_remote: options.push_deletions,
        };
    };

    match (remote, entry.last_synced.as_ref()) {
        (None, None) => SyncAction::PushCreate,
        (None, Some(_)) => SyncAction::RemoteDeleted,
        (Some(_), None) => {
            if local.bytes.is_empty() {
                SyncAction::Pull
            } else {
                SyncAction::Conflict
            }
        }
        (Some(remote), Some(synced)) => {
            let remote_changed = remote.revision() != synced.revision();
            let local_changed = entry.local_changed(local.modified_at);
            match (remote_changed, local_changed) {
                (false, false) => SyncAction::Unchanged,
                (false, true) => SyncAction::PushUpdate,
                (true, false) => SyncAction::Pull,
                (true, true) => SyncAction::Conflict,
            }
        }
    }
}

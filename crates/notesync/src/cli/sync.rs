//! Sync command handlers.

use std::io::{IsTerminal, Write};
use std::path::Path;

use notesync_core::sync::{
    ConflictResolution, NotebookResult, SyncOutcome, SyncProgress, SyncStage, SyncSummary,
};

use super::util::{self, CliError};

/// Handle the sync command. Returns false when anything conflicted or failed.
pub fn handle_sync(notebook: Option<&str>, config_path: Option<&Path>) -> Result<bool, CliError> {
    let config = util::load_config(config_path)?;
    let sync = util::open_synchronizer(&config)?;

    if let Some(notebook) = notebook {
        let identity = util::find_notebook(sync.store(), notebook)?;
        let outcome = sync.sync_one_blocking(&identity.id);
        println!("{}", describe(&identity.name, &outcome));
        return Ok(!outcome.is_conflict() && !outcome.is_failure());
    }

    let interactive = std::io::stderr().is_terminal();
    let show_progress = |progress: SyncProgress| {
        if !interactive {
            return;
        }
        let mut stderr = std::io::stderr();
        if progress.stage == SyncStage::Complete {
            let _ = write!(stderr, "\r\x1b[2K");
        } else {
            let _ = write!(
                stderr,
                "\r\x1b[2K{} {}/{}",
                progress.stage.description(),
                progress.current,
                progress.total
            );
        }
        let _ = stderr.flush();
    };

    let summary = sync.sync_all_with_progress(Some(&show_progress));
    print_summary(&summary);
    Ok(summary.is_clean())
}

/// Handle the resolve command.
pub fn handle_resolve(
    notebook: &str,
    resolution: ConflictResolution,
    config_path: Option<&Path>,
) -> Result<bool, CliError> {
    let config = util::load_config(config_path)?;
    let sync = util::open_synchronizer(&config)?;
    let identity = util::find_notebook(sync.store(), notebook)?;

    let outcome = sync.resolve_conflict_blocking(&identity.id, resolution)?;
    println!("{}", describe(&identity.name, &outcome));
    Ok(true)
}

/// Handle the overwrite command.
pub fn handle_overwrite(notebook: &str, config_path: Option<&Path>) -> Result<bool, CliError> {
    let config = util::load_config(config_path)?;
    let sync = util::open_synchronizer(&config)?;
    let identity = util::find_notebook(sync.store(), notebook)?;

    let outcome = sync.confirm_overwrite_blocking(&identity.id)?;
    match outcome {
        SyncOutcome::Unchanged => println!("'{}' has no pending rename", identity.name),
        other => println!("{}", describe(&identity.name, &other)),
    }
    Ok(true)
}

fn print_summary(summary: &SyncSummary) {
    if summary.results.is_empty() {
        println!("Nothing to sync. Link a notebook with `notesync link <notebook>`.");
        return;
    }

    for NotebookResult { name, outcome, .. } in &summary.results {
        if !matches!(outcome, SyncOutcome::Unchanged) {
            println!("{}", describe(name, outcome));
        }
    }

    println!();
    println!(
        "{} pushed, {} pulled, {} created, {} deleted, {} unchanged",
        summary.pushed(),
        summary.pulled(),
        summary.created(),
        summary.deleted(),
        summary.unchanged()
    );
    if summary.conflicted() > 0 {
        println!(
            "{} conflict(s): resolve with `notesync resolve <notebook> local|remote`",
            summary.conflicted()
        );
    }
    if summary.failed() > 0 {
        println!("{} failed", summary.failed());
    }
}

/// One line describing what happened to a notebook.
fn describe(name: &str, outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Conflict(info) => match &info.conflict_copy {
            Some(copy) => format!("! {}: conflict (remote version saved as '{}')", name, copy),
            None => format!("! {}: conflict", name),
        },
        SyncOutcome::Failed(e) => format!("✗ {}: {}", name, e),
        SyncOutcome::MissingRemote => format!("! {}: missing remotely, kept locally", name),
        other => format!("✓ {}: {}", name, other.label()),
    }
}

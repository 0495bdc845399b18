//! Status command handler.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use notesync_core::links::LinkEntry;
use notesync_core::store::{LocalContent, NotebookStore};

use super::util::{self, CliError};

/// Sync state of one notebook, as far as it is known locally.
#[derive(Debug, Serialize)]
struct NotebookStatus {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_synced: Option<DateTime<Utc>>,
    state: &'static str,
}

fn state_of(entry: Option<&LinkEntry>, local: Option<&LocalContent>) -> &'static str {
    match (entry, local) {
        (None, _) => "unlinked",
        (Some(entry), _) if entry.last_synced.is_none() => "never synced",
        (Some(entry), Some(local)) if entry.local_changed(local.modified_at) => "local changes",
        (Some(_), _) => "synced",
    }
}

/// Handle the status command.
pub fn handle_status(json: bool, config_path: Option<&Path>) -> Result<bool, CliError> {
    let config = util::load_config(config_path)?;
    let sync = util::open_synchronizer(&config)?;

    let mut rows = Vec::new();
    for notebook in sync.store().list_local_notebooks()? {
        let entry = sync.links().get(&notebook.id);
        let local = sync.store().read_local(&notebook.id)?;
        rows.push(NotebookStatus {
            id: notebook.id.to_string(),
            name: notebook.name,
            location: entry
                .as_ref()
                .map(|e| e.repository.join(&e.linked_filename).to_string()),
            last_synced: entry.as_ref().and_then(|e| e.synced_at),
            state: state_of(entry.as_ref(), local.as_ref()),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(true);
    }

    println!("Notebooks: {}", config.notebooks_dir.display());
    println!("Repositories: {}", config.repositories.len());
    println!();
    if rows.is_empty() {
        println!("No notebooks yet.");
        return Ok(true);
    }
    for row in rows {
        let synced = row
            .last_synced
            .map(util::format_time)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<14} {:<16} {}",
            row.name,
            row.state,
            synced,
            row.location.as_deref().unwrap_or("")
        );
    }
    Ok(true)
}

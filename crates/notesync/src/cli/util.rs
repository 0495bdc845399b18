//! Shared CLI utilities.

use std::path::{Path, PathBuf};

use notesync_core::config::Config;
use notesync_core::error::NotesyncError;
use notesync_core::fs::RealFileSystem;
use notesync_core::links::LinkTable;
use notesync_core::store::{FsNotebookStore, NotebookId, NotebookIdentity, NotebookStore};
use notesync_core::sync::Synchronizer;
use thiserror::Error;

/// Synchronizer over the real filesystem.
pub type CliSynchronizer = Synchronizer<FsNotebookStore<RealFileSystem>>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] NotesyncError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No notebook named '{0}'")]
    UnknownNotebook(String),

    #[error("Specify a repository: {0} are configured")]
    RepositoryChoice(usize),

    #[error("Could not encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config, CliError> {
    let config = match path {
        Some(path) => Config::load_from(&RealFileSystem, path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Save the config to `path`, or to the default location. Returns where it went.
pub fn save_config(config: &Config, path: Option<&Path>) -> Result<PathBuf, CliError> {
    match path {
        Some(path) => {
            config.save_to(&RealFileSystem, path)?;
            Ok(path.to_path_buf())
        }
        None => {
            config.save()?;
            Config::config_path().ok_or_else(|| CliError::Core(NotesyncError::NoConfigDir))
        }
    }
}

/// Open the notebook store, link table and registry described by `config`.
pub fn open_synchronizer(config: &Config) -> Result<CliSynchronizer, CliError> {
    log::debug!(
        "[CLI] Notebooks in {}, state in {}",
        config.notebooks_dir.display(),
        config.state_dir().display()
    );
    let store = FsNotebookStore::from_config(RealFileSystem, config)?;
    let links = LinkTable::from_config(config)?;
    Ok(Synchronizer::from_config(store, links, config))
}

/// Find a notebook by id or (normalized) name.
pub fn find_notebook<S: NotebookStore>(store: &S, query: &str) -> Result<NotebookIdentity, CliError> {
    if let Some(identity) = store.get(&NotebookId::from(query))? {
        return Ok(identity);
    }
    store
        .find_by_name(query)?
        .ok_or_else(|| CliError::UnknownNotebook(query.to_string()))
}

/// Format a timestamp for display in local time.
pub fn format_time(time: chrono::DateTime<chrono::Utc>) -> String {
    time.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notesync_core::fs::InMemoryFileSystem;

    #[test]
    fn test_find_notebook_by_name_or_id() {
        let store = FsNotebookStore::open(
            InMemoryFileSystem::new(),
            "/org",
            "/org/.notesync/notebooks.json",
            "org",
        )
        .unwrap();
        let nb = store.create_local("Booky", b"").unwrap();

        assert_eq!(find_notebook(&store, "booky").unwrap().id, nb.id);
        assert_eq!(find_notebook(&store, nb.id.as_str()).unwrap().name, "Booky");
        assert!(matches!(
            find_notebook(&store, "missing"),
            Err(CliError::UnknownNotebook(_))
        ));
    }

    #[test]
    fn test_config_round_trip_through_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::new(dir.path().join("org"));

        assert_eq!(save_config(&config, Some(&path)).unwrap(), path);
        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.notebooks_dir, dir.path().join("org"));
    }
}

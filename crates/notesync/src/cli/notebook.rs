//! Notebook and link commands.

use std::path::Path;

use notesync_core::store::NotebookStore;

use super::args::NotebookCommands;
use super::util::{self, CliError};

/// Handle notebook subcommands.
pub fn handle_notebook_command(
    command: NotebookCommands,
    config_path: Option<&Path>,
) -> Result<bool, CliError> {
    let config = util::load_config(config_path)?;
    let sync = util::open_synchronizer(&config)?;

    match command {
        NotebookCommands::List => {
            let notebooks = sync.store().list_local_notebooks()?;
            if notebooks.is_empty() {
                println!("No notebooks in {}", config.notebooks_dir.display());
                return Ok(true);
            }
            for notebook in notebooks {
                match sync.links().get(&notebook.id) {
                    Some(entry) => println!(
                        "  {}  ->  {}",
                        notebook.name,
                        entry.repository.join(&entry.linked_filename)
                    ),
                    None => println!("  {}", notebook.name),
                }
            }
            Ok(true)
        }

        NotebookCommands::Create { name } => {
            let notebook = sync.store().create_local(&name, b"")?;
            println!("✓ Created notebook '{}' ({})", notebook.name, notebook.id);
            Ok(true)
        }

        NotebookCommands::Rename { notebook, new_name } => {
            let identity = util::find_notebook(sync.store(), &notebook)?;
            sync.rename_notebook(&identity.id, &new_name)?;
            println!("✓ Renamed '{}' to '{}'", identity.name, new_name.trim());
            if sync.links().get(&identity.id).is_some() {
                println!("  The remote copy is renamed on the next sync.");
            }
            Ok(true)
        }
    }
}

/// Handle the link command.
pub fn handle_link(
    notebook: &str,
    address: Option<&str>,
    config_path: Option<&Path>,
) -> Result<bool, CliError> {
    let config = util::load_config(config_path)?;
    let sync = util::open_synchronizer(&config)?;
    let identity = util::find_notebook(sync.store(), notebook)?;

    let address = match address {
        Some(address) => address.to_string(),
        None => match sync.registry().configured().as_slice() {
            [only] => only.to_string(),
            others => return Err(CliError::RepositoryChoice(others.len())),
        },
    };

    let entry = sync.link(&identity.id, &address)?;
    println!(
        "✓ Linked '{}' to {}",
        identity.name,
        entry.repository.join(&entry.linked_filename)
    );
    Ok(true)
}

/// Handle the unlink command.
pub fn handle_unlink(notebook: &str, config_path: Option<&Path>) -> Result<bool, CliError> {
    let config = util::load_config(config_path)?;
    let sync = util::open_synchronizer(&config)?;
    let identity = util::find_notebook(sync.store(), notebook)?;

    if sync.unlink(&identity.id)? {
        println!("✓ Unlinked '{}'", identity.name);
        Ok(true)
    } else {
        println!("'{}' was not linked", identity.name);
        Ok(true)
    }
}

//! Repository management commands.

use std::path::Path;

use notesync_core::address::RepositoryAddress;
use notesync_core::repo::{DirectoryRepository, RepositoryRegistry, RepositorySettings};

use super::args::RepoCommands;
use super::util::{self, CliError};

/// Handle repo subcommands.
pub fn handle_repo_command(command: RepoCommands, config_path: Option<&Path>) -> Result<bool, CliError> {
    let mut config = util::load_config(config_path)?;

    match command {
        RepoCommands::Add {
            address,
            token,
            create,
        } => {
            let parsed = RepositoryAddress::parse(&address)?;
            if create && parsed.scheme() == "file" {
                DirectoryRepository::from_address(&parsed, config.retry)?.create_root()?;
            }

            let mut settings = RepositorySettings::new(parsed.to_string());
            if let Some(token) = token {
                settings = settings.with_token(token);
            }

            // Check that some backend accepts the address before saving it
            let mut registry = RepositoryRegistry::with_default_backends(config.retry);
            registry.add_settings(settings.clone());
            let Some(repo) = registry.resolve_address(&parsed) else {
                eprintln!("✗ No backend accepts '{}'", address);
                return Ok(false);
            };
            if let Err(e) = repo.ensure_available() {
                eprintln!("! {} is not reachable right now: {}", parsed, e);
            }

            config.add_repository(settings);
            util::save_config(&config, config_path)?;
            println!("✓ Added repository {}", parsed);
            Ok(true)
        }

        RepoCommands::List => {
            if config.repositories.is_empty() {
                println!("No repositories configured.");
                println!("  notesync repo add <address>");
                return Ok(true);
            }
            let registry = RepositoryRegistry::from_config(&config);
            for settings in &config.repositories {
                let state = match registry.resolve(&settings.address) {
                    Some(repo) if repo.ensure_available().is_ok() => "available",
                    Some(_) => "unavailable",
                    None => "unsupported",
                };
                let token = if settings.token.is_some() { " (token)" } else { "" };
                println!("  {} [{}]{}", settings.address, state, token);
            }
            Ok(true)
        }

        RepoCommands::Remove { address } => {
            if !config.remove_repository(&address) {
                eprintln!("✗ Repository not configured: {}", address);
                return Ok(false);
            }
            util::save_config(&config, config_path)?;
            println!("✓ Removed repository {}", address);

            let sync = util::open_synchronizer(&config)?;
            let linked = match RepositoryAddress::parse(&address) {
                Ok(parsed) => sync.links().entries_for(&parsed).len(),
                Err(_) => 0,
            };
            if linked > 0 {
                println!("  {} notebook(s) are still linked to it; unlink them with `notesync unlink`", linked);
            }
            Ok(true)
        }
    }
}

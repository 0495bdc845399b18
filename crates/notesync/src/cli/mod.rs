/// Clap argument definitions
mod args;

/// `notebook`, `link` and `unlink` commands
mod notebook;

/// `repo` commands
mod repo;

/// `status` command
mod status;

/// `sync`, `resolve` and `overwrite` commands
mod sync;

/// Shared CLI utilities
mod util;

use std::path::{Path, PathBuf};

use clap::Parser;
use notesync_core::config::Config;

pub use args::Cli;
use args::Commands;
use util::CliError;

/// Main entry point for the CLI
pub fn run_cli() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init { dir } => handle_init(dir, config_path),
        Commands::Repo { command } => repo::handle_repo_command(command, config_path),
        Commands::Notebook { command } => {
            notebook::handle_notebook_command(command, config_path)
        }
        Commands::Link { notebook, address } => {
            notebook::handle_link(&notebook, address.as_deref(), config_path)
        }
        Commands::Unlink { notebook } => notebook::handle_unlink(&notebook, config_path),
        Commands::Sync { notebook } => sync::handle_sync(notebook.as_deref(), config_path),
        Commands::Status { json } => status::handle_status(json, config_path),
        Commands::Resolve {
            notebook,
            resolution,
        } => sync::handle_resolve(&notebook, resolution, config_path),
        Commands::Overwrite { notebook } => sync::handle_overwrite(&notebook, config_path),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Handle the init command
fn handle_init(dir: PathBuf, config_path: Option<&Path>) -> Result<bool, CliError> {
    let dir = if dir.is_absolute() {
        dir
    } else {
        std::env::current_dir()?.join(dir)
    };

    let config = Config::new(dir.clone());
    std::fs::create_dir_all(config.state_dir())?;
    let saved_to = util::save_config(&config, config_path)?;

    println!("✓ Notebooks directory: {}", dir.display());
    println!("✓ Config written to {}", saved_to.display());
    println!();
    println!("Next, add a repository:");
    println!("  notesync repo add file:/path/to/shared/folder");
    Ok(true)
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use notesync_core::sync::ConflictResolution;

/// Keep plain-text outline notebooks in sync with remote repositories
#[derive(Parser, Debug)]
#[command(name = "notesync", version, about)]
pub struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a config for a notebooks directory
    Init {
        /// Directory holding the notebooks
        dir: PathBuf,
    },

    /// Manage configured repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Manage local notebooks
    Notebook {
        #[command(subcommand)]
        command: NotebookCommands,
    },

    /// Link a notebook to a repository
    Link {
        /// Notebook name or id
        notebook: String,

        /// Repository address; optional when exactly one is configured
        address: Option<String>,
    },

    /// Remove a notebook's link
    Unlink {
        /// Notebook name or id
        notebook: String,
    },

    /// Sync all linked notebooks, or just one
    Sync {
        /// Notebook name or id
        notebook: Option<String>,
    },

    /// Show notebooks and their sync state
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Resolve a conflict
    Resolve {
        /// Notebook name or id
        notebook: String,

        /// local, remote or skip
        #[arg(value_parser = parse_resolution)]
        resolution: ConflictResolution,
    },

    /// Store a renamed notebook over an existing remote book of the new name
    Overwrite {
        /// Notebook name or id
        notebook: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum RepoCommands {
    /// Add a repository (e.g. `file:/mnt/share/org`, `dropbox:/org`)
    Add {
        address: String,

        /// Access token for backends that need one
        #[arg(long)]
        token: Option<String>,

        /// Create the directory of a `file:` repository
        #[arg(long)]
        create: bool,
    },

    /// List configured repositories
    List,

    /// Remove a repository from the config
    Remove { address: String },
}

#[derive(Subcommand, Debug)]
pub enum NotebookCommands {
    /// List local notebooks
    List,

    /// Create an empty notebook
    Create { name: String },

    /// Rename a notebook; its remote copy follows on the next sync
    Rename {
        /// Notebook name or id
        notebook: String,
        new_name: String,
    },
}

fn parse_resolution(s: &str) -> Result<ConflictResolution, String> {
    s.parse()
        .map_err(|_| format!("unknown resolution '{}' (expected local, remote or skip)", s))
}

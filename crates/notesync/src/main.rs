//! `notesync` command-line interface.

/// CLI module - command-line interface for notesync
mod cli;

fn main() {
    cli::run_cli();
}

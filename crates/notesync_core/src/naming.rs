//! Mapping between notebook display names and remote filenames.

use crate::error::{NotesyncError, Result};

/// Extensions recognized as notebook files, longest first.
pub const NOTEBOOK_EXTENSIONS: &[&str] = &["org.txt", "org"];

/// Extension appended when a display name carries none.
pub const DEFAULT_EXTENSION: &str = "org";

/// Recognized extension of `filename`, if any.
pub fn notebook_extension(filename: &str) -> Option<&'static str> {
    NOTEBOOK_EXTENSIONS.iter().copied().find(|ext| {
        filename.len() > ext.len() + 1
            && filename.ends_with(ext)
            && filename.as_bytes()[filename.len() - ext.len() - 1] == b'.'
    })
}

/// Whether `filename` looks like a notebook file.
pub fn is_notebook_file(filename: &str) -> bool {
    !filename.starts_with('.') && notebook_extension(filename).is_some()
}

/// Remote filename for a display name.
///
/// Keeps the name as-is when it already ends with a recognized extension,
/// otherwise appends `default_extension`.
pub fn filename_for(display_name: &str, default_extension: &str) -> String {
    let name = display_name.trim();
    if notebook_extension(name).is_some() {
        name.to_string()
    } else {
        format!("{}.{}", name, default_extension.trim_start_matches('.'))
    }
}

/// Display name for a remote filename (recognized extension stripped).
pub fn display_name_for(filename: &str) -> String {
    match notebook_extension(filename) {
        Some(ext) => filename[..filename.len() - ext.len() - 1].to_string(),
        None => filename.to_string(),
    }
}

/// Check that a notebook name or remote filename names a single plain file.
///
/// Rejects empty names, path separators, a leading `.` (which also covers
/// `..`) and control characters.
pub fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if invalid {
        return Err(NotesyncError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Form used to detect collisions between names.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whether two names collide once normalized.
pub fn names_collide(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

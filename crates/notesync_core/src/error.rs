use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for notesync operations
#[derive(Debug, Error)]
pub enum NotesyncError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Repository errors
    #[error("Repository '{0}' is not available")]
    RepositoryUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Name collision: '{0}' already exists")]
    NameCollision(String),

    #[error("Invalid notebook name: '{0}'")]
    InvalidName(String),

    #[error("Malformed repository address: '{0}'")]
    MalformedAddress(String),

    // Notebook/link errors
    #[error("Notebook '{0}' does not exist")]
    NotebookNotFound(String),

    #[error("Notebook '{0}' is not linked to any repository")]
    NotLinked(String),

    #[error("Sync was cancelled")]
    Cancelled,

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for notesync operations
pub type Result<T> = std::result::Result<T, NotesyncError>;

impl NotesyncError {
    /// Whether a backend may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotesyncError::Transport(_))
    }

    /// Short stable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            NotesyncError::Io(_) => "Io",
            NotesyncError::FileRead { .. } => "FileRead",
            NotesyncError::FileWrite { .. } => "FileWrite",
            NotesyncError::Json(_) => "Json",
            NotesyncError::RepositoryUnavailable(_) => "RepositoryUnavailable",
            NotesyncError::Transport(_) => "TransportError",
            NotesyncError::NotFound(_) => "NotFound",
            NotesyncError::NameCollision(_) => "NameCollision",
            NotesyncError::InvalidName(_) => "InvalidName",
            NotesyncError::MalformedAddress(_) => "MalformedAddress",
            NotesyncError::NotebookNotFound(_) => "NotebookNotFound",
            NotesyncError::NotLinked(_) => "NotLinked",
            NotesyncError::Cancelled => "Cancelled",
            NotesyncError::ConfigParse(_) => "ConfigParse",
            NotesyncError::ConfigSerialize(_) => "ConfigSerialize",
            NotesyncError::NoConfigDir => "NoConfigDir",
            #[cfg(feature = "sqlite")]
            NotesyncError::Sqlite(_) => "Sqlite",
        }
    }
}

/// A serializable representation of NotesyncError for front ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Associated path (if applicable)
    pub path: Option<PathBuf>,
}

impl From<&NotesyncError> for SerializableError {
    fn from(err: &NotesyncError) -> Self {
        let path = match err {
            NotesyncError::FileRead { path, .. } => Some(path.clone()),
            NotesyncError::FileWrite { path, .. } => Some(path.clone()),
            _ => None,
        };

        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            path,
        }
    }
}

impl From<NotesyncError> for SerializableError {
    fn from(err: NotesyncError) -> Self {
        SerializableError::from(&err)
    }
}

impl NotesyncError {
    /// Convert to a serializable representation
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(NotesyncError::Transport("reset".into()).is_retryable());
        assert!(!NotesyncError::NotFound("a.org".into()).is_retryable());
        assert!(!NotesyncError::RepositoryUnavailable("mock:x".into()).is_retryable());
    }

    #[test]
    fn test_serializable_error() {
        let err = NotesyncError::NameCollision("booky.org".to_string());
        let ser = err.to_serializable();
        assert_eq!(ser.kind, "NameCollision");
        assert_eq!(ser.message, "Name collision: 'booky.org' already exists");
        assert!(ser.path.is_none());
    }

    #[test]
    fn test_invalid_name_kind() {
        let err = NotesyncError::InvalidName("../escape".to_string());
        assert_eq!(err.kind(), "InvalidName");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Invalid notebook name: '../escape'");
    }
}

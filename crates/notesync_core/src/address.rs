//! Repository addresses and remote locations.
//!
//! An address is `<scheme>:<location>`, for example `dropbox:/notes` or
//! `file:/home/me/org`. Two addresses name the same repository iff their
//! normalized forms are equal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{NotesyncError, Result};

/// Normalized address of one repository instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryAddress {
    scheme: String,
    location: String,
}

impl RepositoryAddress {
    /// Parse and normalize an address string.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (scheme, location) = trimmed
            .split_once(':')
            .ok_or_else(|| NotesyncError::MalformedAddress(input.to_string()))?;

        if !is_valid_scheme(scheme) || location.is_empty() {
            return Err(NotesyncError::MalformedAddress(input.to_string()));
        }

        let location = if location.len() > 1 {
            let stripped = location.trim_end_matches('/');
            if stripped.is_empty() { "/" } else { stripped }
        } else {
            location
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
        })
    }

    /// Backend selector, always lower-case.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after `scheme:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether the address carries an authority (`scheme://host/...`).
    pub fn has_authority(&self) -> bool {
        self.location.starts_with("//")
    }

    /// Remote location of `filename` inside this repository.
    pub fn join(&self, filename: &str) -> Location {
        Location::new(self.clone(), filename)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

impl fmt::Display for RepositoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.location)
    }
}

impl FromStr for RepositoryAddress {
    type Err = NotesyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RepositoryAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RepositoryAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Full remote location of one notebook: repository address plus filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    repository: RepositoryAddress,
    filename: String,
}

impl Location {
    /// Create a location. No I/O is performed.
    pub fn new(repository: RepositoryAddress, filename: impl Into<String>) -> Self {
        Self {
            repository,
            filename: filename.into(),
        }
    }

    /// Owning repository.
    pub fn repository(&self) -> &RepositoryAddress {
        &self.repository
    }

    /// Filename relative to the repository root.
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repository.location.ends_with('/') {
            write!(f, "{}{}", self.repository, self.filename)
        } else {
            write!(f, "{}/{}", self.repository, self.filename)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let a = RepositoryAddress::parse("dropbox:/dir/").unwrap();
        let b = RepositoryAddress::parse("  Dropbox:/dir").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "dropbox:/dir");

        let root = RepositoryAddress::parse("file:/").unwrap();
        assert_eq!(root.to_string(), "file:/");
        let root_again = RepositoryAddress::parse("file:///").unwrap();
        assert_eq!(root_again.location(), "/");
    }

    #[test]
    fn test_malformed() {
        assert!(RepositoryAddress::parse("no-scheme").is_err());
        assert!(RepositoryAddress::parse("1abc:/x").is_err());
        assert!(RepositoryAddress::parse("dropbox:").is_err());
        assert!(RepositoryAddress::parse(":/x").is_err());
    }

    #[test]
    fn test_authority() {
        assert!(RepositoryAddress::parse("dropbox://authority").unwrap().has_authority());
        assert!(!RepositoryAddress::parse("dropbox:/dir").unwrap().has_authority());
    }

    #[test]
    fn test_location_display() {
        let repo = RepositoryAddress::parse("dropbox:/dir").unwrap();
        assert_eq!(repo.join("booky.org").to_string(), "dropbox:/dir/booky.org");

        let root = RepositoryAddress::parse("file:/").unwrap();
        assert_eq!(root.join("booky.org").to_string(), "file:/booky.org");
    }

    #[test]
    fn test_serde_uses_string_form() {
        let repo = RepositoryAddress::parse("mock:/repo/").unwrap();
        let json = serde_json::to_string(&repo).unwrap();
        assert_eq!(json, "\"mock:/repo\"");
        let back: RepositoryAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, repo);
    }
}

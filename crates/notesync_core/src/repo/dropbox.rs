//! Dropbox backend (`dropbox:` scheme).
//!
//! Talks to the Dropbox HTTP API v2 with a blocking client. The address
//! location is the folder inside the Dropbox account, e.g. `dropbox:/org`.
//! Calls block the current thread, so this backend must not be driven from
//! inside a tokio runtime.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{
    BoxFuture, Repository, RepositoryCapabilities, RetryPolicy, check_location, require_path_only,
};
use crate::address::{Location, RepositoryAddress};
use crate::error::{NotesyncError, Result};
use crate::naming::{is_notebook_file, validate_name};
use crate::revision::VersionedRevision;

const API_URL: &str = "https://api.dropboxapi.com/2";
const CONTENT_URL: &str = "https://content.dropboxapi.com/2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = ".tag", default)]
    tag: Option<String>,
    name: String,
    #[serde(default)]
    rev: Option<String>,
    #[serde(default)]
    server_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct RelocationResult {
    metadata: Metadata,
}

/// Repository stored in a Dropbox folder.
#[derive(Debug)]
pub struct DropboxRepository {
    address: RepositoryAddress,
    root: String,
    token: Option<String>,
    client: Client,
    retry: RetryPolicy,
}

impl DropboxRepository {
    /// Build from a `dropbox:` address and an optional access token.
    ///
    /// Without a token the repository reports itself as not connected.
    pub fn from_address(
        address: &RepositoryAddress,
        token: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        require_path_only(address, "dropbox")?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotesyncError::Transport(e.to_string()))?;

        // Dropbox names the account root "" rather than "/"
        let root = match address.location() {
            "/" => String::new(),
            path if path.starts_with('/') => path.to_string(),
            path => format!("/{}", path),
        };

        Ok(Self {
            address: address.clone(),
            root,
            token: token.filter(|t| !t.is_empty()),
            client,
            retry,
        })
    }

    fn path_of(&self, filename: &str) -> Result<String> {
        validate_name(filename)?;
        Ok(format!("{}/{}", self.root, filename))
    }

    fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| NotesyncError::RepositoryUnavailable(self.address.to_string()))
    }

    fn describe(&self, meta: &Metadata) -> VersionedRevision {
        VersionedRevision::new(
            self.address.join(&meta.name),
            meta.rev.clone().unwrap_or_default(),
            meta.server_modified.unwrap_or_else(Utc::now),
        )
    }

    /// Map a non-success response to an error.
    fn check(&self, response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        log::debug!("[Dropbox] {} returned {}: {}", what, status, body);
        Err(match status {
            StatusCode::UNAUTHORIZED => {
                NotesyncError::RepositoryUnavailable(self.address.to_string())
            }
            StatusCode::CONFLICT if body.contains("not_found") => {
                NotesyncError::NotFound(what.to_string())
            }
            StatusCode::CONFLICT if body.contains("conflict") => {
                NotesyncError::NameCollision(what.to_string())
            }
            _ => NotesyncError::Transport(format!("{} returned {}", what, status)),
        })
    }

    fn rpc<T: DeserializeOwned>(&self, endpoint: &str, body: &serde_json::Value, what: &str) -> Result<T> {
        let token = self.token()?;
        self.retry.run(endpoint, || {
            let response = self
                .client
                .post(format!("{}/{}", API_URL, endpoint))
                .bearer_auth(token)
                .json(body)
                .send()
                .map_err(transport)?;
            self.check(response, what)?.json::<T>().map_err(transport)
        })
    }

    fn list_now(&self) -> Result<Vec<VersionedRevision>> {
        let first: Result<ListFolderResult> = self.rpc(
            "files/list_folder",
            &json!({ "path": self.root, "recursive": false }),
            &self.root,
        );
        let mut page = match first {
            Ok(page) => page,
            // A folder that was never created holds no books
            Err(NotesyncError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut books = Vec::new();
        loop {
            books.extend(
                page.entries
                    .iter()
                    .filter(|m| m.tag.as_deref() == Some("file") && is_notebook_file(&m.name))
                    .map(|m| self.describe(m)),
            );
            if !page.has_more {
                break;
            }
            page = self.rpc(
                "files/list_folder/continue",
                &json!({ "cursor": page.cursor }),
                &self.root,
            )?;
        }
        books.sort_by(|a, b| a.filename().cmp(b.filename()));
        Ok(books)
    }

    fn fetch_now(&self, location: &Location, destination: &Path) -> Result<VersionedRevision> {
        check_location(&self.address, location)?;
        let token = self.token()?;
        let path = self.path_of(location.filename())?;
        let arg = header_safe_json(&json!({ "path": path }));

        let (meta, bytes) = self.retry.run("files/download", || {
            let response = self
                .client
                .post(format!("{}/files/download", CONTENT_URL))
                .bearer_auth(token)
                .header("Dropbox-API-Arg", arg.as_str())
                .send()
                .map_err(transport)?;
            let response = self.check(response, &path)?;
            let meta: Metadata = response
                .headers()
                .get("Dropbox-API-Result")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| NotesyncError::Transport("missing Dropbox-API-Result".into()))
                .and_then(|raw| serde_json::from_str(raw).map_err(NotesyncError::from))?;
            let bytes = response.bytes().map_err(transport)?;
            Ok((meta, bytes))
        })?;

        std::fs::write(destination, &bytes).map_err(|e| NotesyncError::FileWrite {
            path: destination.to_path_buf(),
            source: e,
        })?;
        Ok(self.describe(&meta))
    }

    fn store_now(&self, local_file: &Path, filename: &str) -> Result<VersionedRevision> {
        let token = self.token()?;
        let content = std::fs::read(local_file).map_err(|e| NotesyncError::FileRead {
            path: local_file.to_path_buf(),
            source: e,
        })?;
        let path = self.path_of(filename)?;
        let arg = header_safe_json(&json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        }));

        let meta: Metadata = self.retry.run("files/upload", || {
            let response = self
                .client
                .post(format!("{}/files/upload", CONTENT_URL))
                .bearer_auth(token)
                .header("Dropbox-API-Arg", arg.as_str())
                .header("Content-Type", "application/octet-stream")
                .body(content.clone())
                .send()
                .map_err(transport)?;
            self.check(response, &path)?.json().map_err(transport)
        })?;
        log::debug!("[Dropbox] Uploaded {} (rev {:?})", path, meta.rev);
        Ok(self.describe(&meta))
    }

    fn rename_now(&self, location: &Location, new_name: &str) -> Result<VersionedRevision> {
        check_location(&self.address, location)?;
        let from = self.path_of(location.filename())?;
        let to = self.path_of(new_name)?;
        let result: RelocationResult = self
            .rpc(
                "files/move_v2",
                &json!({ "from_path": from, "to_path": to, "autorename": false }),
                &to,
            )
            .map_err(|e| match e {
                NotesyncError::NotFound(_) => NotesyncError::NotFound(location.to_string()),
                NotesyncError::NameCollision(_) => {
                    NotesyncError::NameCollision(self.address.join(new_name).to_string())
                }
                other => other,
            })?;
        Ok(self.describe(&result.metadata))
    }

    fn delete_now(&self, location: &Location) -> Result<()> {
        check_location(&self.address, location)?;
        let path = self.path_of(location.filename())?;
        let result: Result<RelocationResult> =
            self.rpc("files/delete_v2", &json!({ "path": path }), &path);
        match result {
            Ok(_) | Err(NotesyncError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn transport(e: reqwest::Error) -> NotesyncError {
    NotesyncError::Transport(e.to_string())
}

/// Serialize JSON for an HTTP header, escaping everything outside ASCII.
fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

impl Repository for DropboxRepository {
    fn is_connected(&self) -> bool {
        self.token.is_some()
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        RepositoryCapabilities {
            requires_connection: true,
            supports_directories: true,
            concurrent_access: false,
        }
    }

    fn address(&self) -> &RepositoryAddress {
        &self.address
    }

    fn list_books(&self) -> BoxFuture<'_, Result<Vec<VersionedRevision>>> {
        Box::pin(async move { self.list_now() })
    }

    fn fetch<'a>(
        &'a self,
        location: &'a Location,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.fetch_now(location, destination) })
    }

    fn store<'a>(
        &'a self,
        local_file: &'a Path,
        filename: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.store_now(local_file, filename) })
    }

    fn rename<'a>(
        &'a self,
        location: &'a Location,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move { self.rename_now(location, new_name) })
    }

    fn delete<'a>(&'a self, location: &'a Location) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.delete_now(location) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(s: &str) -> RepositoryAddress {
        RepositoryAddress::parse(s).unwrap()
    }

    #[test]
    fn test_authority_is_rejected() {
        let result = DropboxRepository::from_address(
            &address("dropbox://authority"),
            None,
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(NotesyncError::MalformedAddress(_))));
    }

    #[test]
    fn test_filename_locations() {
        let repo =
            DropboxRepository::from_address(&address("dropbox:/dir/"), None, RetryPolicy::default())
                .unwrap();
        assert_eq!(
            repo.address_for_filename("booky.org").to_string(),
            "dropbox:/dir/booky.org"
        );
        assert_eq!(repo.path_of("booky.org").unwrap(), "/dir/booky.org");
        assert!(matches!(
            repo.path_of("../booky.org"),
            Err(NotesyncError::InvalidName(_))
        ));

        let root =
            DropboxRepository::from_address(&address("dropbox:/"), None, RetryPolicy::default())
                .unwrap();
        assert_eq!(root.path_of("booky.org").unwrap(), "/booky.org");
    }

    #[test]
    fn test_without_token_is_not_connected() {
        let repo =
            DropboxRepository::from_address(&address("dropbox:/dir"), None, RetryPolicy::default())
                .unwrap();
        assert!(repo.requires_connection());
        assert!(!repo.is_connected());
        assert!(matches!(
            repo.ensure_available(),
            Err(NotesyncError::RepositoryUnavailable(_))
        ));

        let connected = DropboxRepository::from_address(
            &address("dropbox:/dir"),
            Some("token".into()),
            RetryPolicy::default(),
        )
        .unwrap();
        assert!(connected.is_connected());
    }

    #[test]
    fn test_header_safe_json_escapes_non_ascii() {
        let arg = header_safe_json(&json!({ "path": "/dir/café.org" }));
        assert_eq!(arg, r#"{"path":"/dir/caf\u00e9.org"}"#);
    }
}

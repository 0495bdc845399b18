//! Remote repositories.
//!
//! A repository is one remote storage backend instance (a Dropbox folder, a
//! mirrored local directory, ...) identified by a [`RepositoryAddress`].
//! Every backend implements the same [`Repository`] contract; the
//! [`RepositoryRegistry`] turns address strings into backend instances.
//!
//! # Backends
//!
//! | scheme     | type                    |
//! |------------|-------------------------|
//! | `file:`    | [`DirectoryRepository`] |
//! | `mock:`    | [`MemoryRepository`]    |
//! | `dropbox:` | `DropboxRepository` (feature `dropbox`) |

mod directory;
#[cfg(feature = "dropbox")]
mod dropbox;
mod memory;
mod registry;
mod retry;

pub use directory::DirectoryRepository;
#[cfg(feature = "dropbox")]
pub use dropbox::DropboxRepository;
pub use memory::MemoryRepository;
pub use registry::{RepositoryFactory, RepositoryRegistry, RepositorySettings};
pub use retry::RetryPolicy;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::address::{Location, RepositoryAddress};
use crate::error::{NotesyncError, Result};
use crate::revision::VersionedRevision;

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability flags a backend declares about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryCapabilities {
    /// Network/credentials must be present before any operation
    pub requires_connection: bool,
    /// The backend can hold nested directories
    pub supports_directories: bool,
    /// Operations may run concurrently against one instance
    pub concurrent_access: bool,
}

/// Contract every storage backend implements.
///
/// Operations are independently retryable by the caller and never leave a
/// partially written object visible: either the remote object reaches its
/// new state or it is unchanged.
///
/// The returned futures may block the thread polling them. Filenames that
/// fail [`validate_name`](crate::naming::validate_name) are refused with
/// `InvalidName`.
pub trait Repository: Send + Sync {
    /// Whether network/credential availability is needed before any other
    /// operation is attempted.
    fn requires_connection(&self) -> bool {
        self.capabilities().requires_connection
    }

    /// Whether the connection/credential context is currently present.
    ///
    /// Only meaningful when [`Repository::requires_connection`] is true.
    fn is_connected(&self) -> bool {
        true
    }

    /// Declared capability flags.
    fn capabilities(&self) -> RepositoryCapabilities;

    /// Address of this repository.
    fn address(&self) -> &RepositoryAddress;

    /// Location of `filename` under this repository. Performs no I/O.
    fn address_for_filename(&self, filename: &str) -> Location {
        self.address().join(filename)
    }

    /// Every notebook currently stored, each with its latest revision.
    fn list_books(&self) -> BoxFuture<'_, Result<Vec<VersionedRevision>>>;

    /// Download the latest revision at `location` into `destination`.
    fn fetch<'a>(
        &'a self,
        location: &'a Location,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<VersionedRevision>>;

    /// Upload `local_file` as `filename`, creating or overwriting it.
    fn store<'a>(
        &'a self,
        local_file: &'a Path,
        filename: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>>;

    /// Rename the object at `location` to `new_name` in place.
    fn rename<'a>(
        &'a self,
        location: &'a Location,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>>;

    /// Remove the object at `location`. Deleting an absent object succeeds.
    fn delete<'a>(&'a self, location: &'a Location) -> BoxFuture<'a, Result<()>>;

    /// Fail with `RepositoryUnavailable` when a required connection is missing.
    fn ensure_available(&self) -> Result<()> {
        if self.requires_connection() && !self.is_connected() {
            return Err(NotesyncError::RepositoryUnavailable(
                self.address().to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject addresses that carry an authority component.
///
/// Path-only backends (directories, Dropbox) address everything by path;
/// `scheme://host/...` does not name a different root, it is unresolvable.
pub(crate) fn require_path_only(address: &RepositoryAddress, scheme: &str) -> Result<()> {
    if address.scheme() != scheme || address.has_authority() {
        return Err(NotesyncError::MalformedAddress(address.to_string()));
    }
    Ok(())
}

/// Check that `location` belongs to `repository`.
pub(crate) fn check_location(repository: &RepositoryAddress, location: &Location) -> Result<()> {
    if location.repository() != repository {
        return Err(NotesyncError::NotFound(format!(
            "{} is not in repository {}",
            location, repository
        )));
    }
    Ok(())
}

//! Address-to-backend resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::{DirectoryRepository, MemoryRepository, Repository, RetryPolicy};
use crate::address::RepositoryAddress;
use crate::config::Config;

/// Per-repository configuration as stored in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Address string, e.g. `dropbox:/org`
    pub address: String,

    /// Access token for backends that need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl RepositorySettings {
    /// Settings for `address` with no credentials.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
        }
    }

    /// Attach an access token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Parsed address, or `None` if malformed.
    pub fn parsed_address(&self) -> Option<RepositoryAddress> {
        RepositoryAddress::parse(&self.address).ok()
    }
}

/// Builds a backend for an address of one scheme.
///
/// Returns `None` when the address is not valid for the scheme.
pub type RepositoryFactory = Box<
    dyn Fn(&RepositoryAddress, &RepositorySettings, &RetryPolicy) -> Option<Arc<dyn Repository>>
        + Send
        + Sync,
>;

/// Resolves addresses to repository instances.
///
/// Instances are cached per normalized address, so every caller resolving
/// `dropbox:/org` and `dropbox:/org/` shares one backend.
pub struct RepositoryRegistry {
    factories: HashMap<String, RepositoryFactory>,
    settings: Vec<RepositorySettings>,
    retry: RetryPolicy,
    instances: Mutex<HashMap<RepositoryAddress, Arc<dyn Repository>>>,
}

impl RepositoryRegistry {
    /// Registry with no backends.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            factories: HashMap::new(),
            settings: Vec::new(),
            retry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_default_backends(retry: RetryPolicy) -> Self {
        let mut registry = Self::new(retry);
        registry.register_backend(
            "file",
            Box::new(|address, _settings, retry| {
                DirectoryRepository::from_address(address, *retry)
                    .ok()
                    .map(|r| Arc::new(r) as Arc<dyn Repository>)
            }),
        );
        registry.register_backend(
            "mock",
            Box::new(|address, _settings, _retry| {
                MemoryRepository::from_address(address)
                    .ok()
                    .map(|r| Arc::new(r) as Arc<dyn Repository>)
            }),
        );
        #[cfg(feature = "dropbox")]
        registry.register_backend(
            "dropbox",
            Box::new(|address, settings, retry| {
                super::DropboxRepository::from_address(address, settings.token.clone(), *retry)
                    .ok()
                    .map(|r| Arc::new(r) as Arc<dyn Repository>)
            }),
        );
        registry
    }

    /// Registry for a loaded config: default backends plus its repositories.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::with_default_backends(config.retry);
        for settings in &config.repositories {
            registry.add_settings(settings.clone());
        }
        registry
    }

    /// Register (or replace) the factory for `scheme`.
    pub fn register_backend(&mut self, scheme: &str, factory: RepositoryFactory) {
        self.factories.insert(scheme.to_ascii_lowercase(), factory);
    }

    /// Add settings for one repository.
    pub fn add_settings(&mut self, settings: RepositorySettings) {
        self.settings.push(settings);
    }

    /// Put an already-built instance into the cache.
    ///
    /// Later resolutions of its address return this instance.
    pub fn insert(&self, repository: Arc<dyn Repository>) {
        let address = repository.address().clone();
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, repository);
    }

    /// Addresses of all configured repositories that parse.
    pub fn configured(&self) -> Vec<RepositoryAddress> {
        let mut addresses: Vec<RepositoryAddress> = self
            .settings
            .iter()
            .filter_map(|s| s.parsed_address())
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    /// Resolve an address string to a backend instance.
    ///
    /// Returns `None` for malformed addresses, unknown schemes, and
    /// addresses the backend rejects.
    pub fn resolve(&self, address: &str) -> Option<Arc<dyn Repository>> {
        match RepositoryAddress::parse(address) {
            Ok(address) => self.resolve_address(&address),
            Err(e) => {
                log::debug!("[Registry] {}", e);
                None
            }
        }
    }

    /// Resolve a parsed address to a backend instance.
    pub fn resolve_address(&self, address: &RepositoryAddress) -> Option<Arc<dyn Repository>> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = instances.get(address) {
            return Some(existing.clone());
        }

        let Some(factory) = self.factories.get(address.scheme()) else {
            log::debug!("[Registry] No backend for scheme '{}'", address.scheme());
            return None;
        };

        let settings = self
            .settings
            .iter()
            .find(|s| s.parsed_address().as_ref() == Some(address))
            .cloned()
            .unwrap_or_else(|| RepositorySettings::new(address.to_string()));

        let repository = factory(address, &settings, &self.retry)?;
        instances.insert(address.clone(), repository.clone());
        Some(repository)
    }
}

impl Default for RepositoryRegistry {
    fn default() -> Self {
        Self::with_default_backends(RetryPolicy::default())
    }
}

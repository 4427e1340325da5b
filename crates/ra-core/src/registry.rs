//! Startup-time backend registry.
//!
//! Backends are registered through [`RegistryBuilder`]; the built
//! [`BackendRegistry`] is immutable, so lookups take `&self` and need no
//! locking.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::abi::{AbiVersion, RA_ABI_VERSION};
use crate::backend::{BackendDescriptor, RaBackend};
use crate::config::RaConfig;
use crate::error::{RaError, RaResult};
use crate::repo_url::RepoUrl;

/// Collects backends and scheme aliases before the registry is frozen.
pub struct RegistryBuilder {
    abi: AbiVersion,
    backends: Vec<Arc<dyn RaBackend>>,
    aliases: BTreeMap<String, String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            abi: RA_ABI_VERSION,
            backends: Vec::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Apply the ABI request and scheme aliases from configuration.
    pub fn with_config(mut self, config: &RaConfig) -> Self {
        self.abi = config.abi_version;
        for (scheme, backend) in &config.scheme_aliases {
            self.aliases.insert(scheme.clone(), backend.clone());
        }
        self
    }

    /// Request a specific ABI version from every backend.
    pub fn abi(mut self, abi: AbiVersion) -> Self {
        self.abi = abi;
        self
    }

    pub fn register(mut self, backend: impl RaBackend + 'static) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    /// Serve `scheme` with the backend registered as `backend_name`.
    pub fn alias(mut self, scheme: impl Into<String>, backend_name: impl Into<String>) -> Self {
        self.aliases.insert(scheme.into(), backend_name.into());
        self
    }

    /// Freeze the registry. Duplicate backend names, schemes claimed twice,
    /// and aliases naming unknown backends are rejected. Schemes are matched
    /// case-insensitively, as URL schemes are.
    pub fn build(self) -> RaResult<BackendRegistry> {
        let mut by_name: BTreeMap<String, Arc<dyn RaBackend>> = BTreeMap::new();
        let mut by_scheme: BTreeMap<String, Arc<dyn RaBackend>> = BTreeMap::new();

        for backend in self.backends {
            let descriptor = backend.descriptor();
            if by_name.contains_key(&descriptor.name) {
                return Err(RaError::Config(format!(
                    "backend '{}' registered twice",
                    descriptor.name
                )));
            }
            for scheme in &descriptor.schemes {
                let scheme = scheme.to_ascii_lowercase();
                if let Some(existing) = by_scheme.get(&scheme) {
                    return Err(RaError::Config(format!(
                        "scheme '{scheme}' claimed by both '{}' and '{}'",
                        existing.descriptor().name,
                        descriptor.name
                    )));
                }
                by_scheme.insert(scheme, Arc::clone(&backend));
            }
            let name = descriptor.name.clone();
            by_name.insert(name, backend);
        }

        for (scheme, name) in self.aliases {
            let scheme = scheme.to_ascii_lowercase();
            let backend = by_name.get(&name).ok_or_else(|| {
                RaError::Config(format!("alias '{scheme}' names unknown backend '{name}'"))
            })?;
            if by_scheme.contains_key(&scheme) {
                return Err(RaError::Config(format!(
                    "alias '{scheme}' shadows a registered scheme"
                )));
            }
            by_scheme.insert(scheme, Arc::clone(backend));
        }

        debug!(
            backends = by_name.len(),
            schemes = by_scheme.len(),
            abi = %self.abi,
            "backend registry built"
        );
        Ok(BackendRegistry {
            abi: self.abi,
            by_name,
            by_scheme,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable scheme → backend table.
pub struct BackendRegistry {
    abi: AbiVersion,
    by_name: BTreeMap<String, Arc<dyn RaBackend>>,
    by_scheme: BTreeMap<String, Arc<dyn RaBackend>>,
}

impl BackendRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The ABI version requested from backends.
    pub fn abi(&self) -> AbiVersion {
        self.abi
    }

    /// Pick the backend for `url` and run its ABI-checked init.
    pub fn select(&self, url: &RepoUrl) -> RaResult<&dyn RaBackend> {
        let backend = self
            .by_scheme
            .get(url.scheme())
            .ok_or_else(|| RaError::NoBackendForScheme(url.scheme().to_string()))?;
        backend.init(self.abi)?;
        Ok(backend.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn RaBackend> {
        self.by_name.get(name).map(|b| b.as_ref())
    }

    /// Every registered backend, by name.
    pub fn descriptors(&self) -> Vec<&BackendDescriptor> {
        self.by_name.values().map(|b| b.descriptor()).collect()
    }

    /// Every scheme served, including aliases, with its backend name.
    pub fn schemes(&self) -> Vec<(&str, &str)> {
        self.by_scheme
            .iter()
            .map(|(scheme, b)| (scheme.as_str(), b.descriptor().name.as_str()))
            .collect()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("abi", &self.abi)
            .field("schemes", &self.schemes())
            .finish()
    }
}

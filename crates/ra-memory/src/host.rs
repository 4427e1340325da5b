use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use ra_core::{RaError, RaResult};
use ra_types::RepoPath;

use crate::repository::MemRepository;

/// A named host serving repositories by path.
///
/// Marking a host unreachable makes new sessions fail with
/// `ConnectionFailed` and calls on live sessions fail with
/// `TransportError`.
#[derive(Debug)]
pub struct RepositoryHost {
    name: String,
    repositories: RwLock<BTreeMap<RepoPath, Arc<MemRepository>>>,
    reachable: AtomicBool,
}

impl RepositoryHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repositories: RwLock::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an empty repository at `path`.
    pub fn create_repository(&self, path: &str) -> RaResult<Arc<MemRepository>> {
        let path = RepoPath::parse(path)?;
        let mut repositories = self.repositories.write().expect("lock poisoned");
        if repositories.contains_key(&path) {
            return Err(RaError::Config(format!(
                "repository {path} already exists on {}",
                self.name
            )));
        }
        let repo = Arc::new(MemRepository::new());
        repositories.insert(path, Arc::clone(&repo));
        Ok(repo)
    }

    pub fn repository(&self, path: &RepoPath) -> Option<Arc<MemRepository>> {
        self.repositories
            .read()
            .expect("lock poisoned")
            .get(path)
            .cloned()
    }

    pub fn repository_paths(&self) -> Vec<RepoPath> {
        self.repositories
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// `TransportError` unless the host is reachable.
    pub fn check_link(&self) -> RaResult<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(RaError::TransportError(format!(
                "host {} stopped responding",
                self.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repositories_are_keyed_by_sanitized_path() {
        let host = RepositoryHost::new("host");
        let repo = host.create_repository("/proj/").unwrap();
        let found = host.repository(&RepoPath::parse("proj").unwrap()).unwrap();
        assert!(Arc::ptr_eq(&repo, &found));
        assert!(matches!(
            host.create_repository("proj"),
            Err(RaError::Config(_))
        ));
        assert_eq!(host.repository_paths().len(), 1);
    }

    #[test]
    fn unreachable_host_breaks_links() {
        let host = RepositoryHost::new("host");
        host.check_link().unwrap();
        host.set_reachable(false);
        assert!(matches!(host.check_link(), Err(RaError::TransportError(_))));
    }
}

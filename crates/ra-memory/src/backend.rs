use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use ra_core::{
    BackendDescriptor, BackendSession, CommitCallbacks, CommitResultHandle, RaBackend, RaConfig,
    RaError, RaResult, RepoUrl, Reporter, RA_ABI_VERSION,
};
use ra_delta::{Editor, DEFAULT_WINDOW_SIZE};
use ra_types::{RepoPath, Revision};
use tracing::{debug, warn};

use crate::commit::CommitEditor;
use crate::delta::send_tree;
use crate::host::RepositoryHost;
use crate::node::Node;
use crate::repository::MemRepository;
use crate::reporter::MemReporter;

/// Backend name and URL scheme.
pub const MEMORY_SCHEME: &str = "memory";

/// Host used for URLs without one, such as `memory:///proj`.
pub const DEFAULT_HOST: &str = "localhost";

/// The in-process backend.
///
/// Cloning shares the same hosts, so a test can keep a handle for seeding
/// repositories and injecting faults after registering a clone.
#[derive(Clone)]
pub struct MemoryBackend {
    descriptor: BackendDescriptor,
    window_size: usize,
    hosts: Arc<RwLock<BTreeMap<String, Arc<RepositoryHost>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            descriptor: BackendDescriptor::new(
                MEMORY_SCHEME,
                "in-process repositories with structurally shared revisions",
                RA_ABI_VERSION,
            )
            .with_scheme(MEMORY_SCHEME),
            window_size: DEFAULT_WINDOW_SIZE,
            hosts: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn with_config(mut self, config: &RaConfig) -> Self {
        self.window_size = config.window_size;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// The host called `name`, created on first use.
    pub fn host(&self, name: &str) -> Arc<RepositoryHost> {
        let mut hosts = self.hosts.write().expect("lock poisoned");
        Arc::clone(
            hosts
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RepositoryHost::new(name))),
        )
    }

    /// Create an empty repository at `path` on `host`.
    pub fn create_repository(&self, host: &str, path: &str) -> RaResult<Arc<MemRepository>> {
        self.host(host).create_repository(path)
    }

    fn find_host(&self, name: &str) -> Option<Arc<RepositoryHost>> {
        self.hosts.read().expect("lock poisoned").get(name).cloned()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts = self.hosts.read().expect("lock poisoned");
        f.debug_struct("MemoryBackend")
            .field("window_size", &self.window_size)
            .field("hosts", &hosts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RaBackend for MemoryBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn open(&self, url: &RepoUrl) -> RaResult<Box<dyn BackendSession>> {
        let host_name = url.host().unwrap_or(DEFAULT_HOST);
        let host = self
            .find_host(host_name)
            .filter(|h| h.is_reachable())
            .ok_or_else(|| RaError::ConnectionFailed {
                url: url.to_string(),
                reason: format!("host {host_name} is unreachable"),
            })?;
        let path = url.path()?;
        let repo = host
            .repository(&path)
            .ok_or_else(|| RaError::RepositoryNotFound(url.to_string()))?;
        debug!(url = %url, "memory session connected");
        Ok(Box::new(MemSession {
            host,
            repo,
            window_size: self.window_size,
            closed: false,
        }))
    }
}

/// A connection to one in-memory repository.
pub struct MemSession {
    host: Arc<RepositoryHost>,
    repo: Arc<MemRepository>,
    window_size: usize,
    closed: bool,
}

impl MemSession {
    fn check(&self) -> RaResult<()> {
        if self.closed {
            return Err(RaError::UseAfterClose);
        }
        self.host.check_link()
    }

    fn resolve(&self, revision: Option<Revision>) -> RaResult<Revision> {
        let latest = self.repo.latest_revision();
        match revision {
            Some(r) if r > latest => Err(RaError::NoSuchRevision(r)),
            Some(r) => Ok(r),
            None => Ok(latest),
        }
    }
}

impl BackendSession for MemSession {
    fn latest_revision(&mut self) -> RaResult<Revision> {
        self.check()?;
        Ok(self.repo.latest_revision())
    }

    fn commit_editor<'a>(
        &'a mut self,
        log_message: &str,
        callbacks: CommitCallbacks<'a>,
    ) -> RaResult<(Box<dyn Editor + 'a>, CommitResultHandle)> {
        self.check()?;
        let (editor, handle) = CommitEditor::new(
            Arc::clone(&self.repo),
            Arc::clone(&self.host),
            log_message,
            callbacks,
        );
        Ok((Box::new(editor), handle))
    }

    fn do_checkout(
        &mut self,
        root_path: &RepoPath,
        revision: Option<Revision>,
        editor: &mut dyn Editor,
    ) -> RaResult<Revision> {
        self.check()?;
        let revision = self.resolve(revision)?;
        let root = match self.repo.lookup(revision, root_path)? {
            Some(Node::Dir(dir)) => dir,
            Some(Node::File(_)) => {
                return Err(RaError::ProtocolViolation(format!(
                    "cannot check out file {root_path}"
                )))
            }
            None => {
                return Err(RaError::Delta(ra_delta::DeltaError::NotFound(
                    root_path.clone(),
                )))
            }
        };
        debug!(path = %root_path, %revision, "checkout started");
        if let Err(e) = send_tree(editor, &root, self.window_size) {
            if let Err(abort) = editor.abort_edit() {
                warn!(error = %abort, "aborting checkout editor failed");
            }
            return Err(e.into());
        }
        Ok(revision)
    }

    fn do_update<'a>(
        &'a mut self,
        revision: Option<Revision>,
        editor: &'a mut dyn Editor,
    ) -> RaResult<Box<dyn Reporter + 'a>> {
        self.check()?;
        if let Some(r) = revision {
            self.resolve(Some(r))?;
        }
        Ok(Box::new(MemReporter::new(
            Arc::clone(&self.repo),
            Arc::clone(&self.host),
            editor,
            revision,
            self.window_size,
        )))
    }

    fn close(&mut self) -> RaResult<()> {
        if self.closed {
            return Err(RaError::UseAfterClose);
        }
        self.closed = true;
        Ok(())
    }
}

//! The backend plugin contract.

use ra_delta::Editor;
use ra_types::{RepoPath, Revision};
use serde::Serialize;

use crate::abi::AbiVersion;
use crate::commit::{CommitCallbacks, CommitResultHandle};
use crate::error::{RaError, RaResult};
use crate::report::Reporter;
use crate::repo_url::RepoUrl;

/// Static description of a backend. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub description: String,
    /// URL schemes this backend serves.
    pub schemes: Vec<String>,
    /// Interface version the backend implements.
    pub abi: AbiVersion,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, abi: AbiVersion) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schemes: Vec::new(),
            abi,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.schemes.push(scheme.into());
        self
    }
}

/// A repository access backend.
///
/// One value per backend lives in the registry for the life of the
/// process; it hands out independent sessions.
pub trait RaBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    /// ABI-checked initialization. Returns the reusable descriptor, or
    /// `IncompatibleVersion` when the backend cannot serve `requested`.
    fn init(&self, requested: AbiVersion) -> RaResult<&BackendDescriptor> {
        let descriptor = self.descriptor();
        if descriptor.abi.serves(requested) {
            Ok(descriptor)
        } else {
            Err(RaError::IncompatibleVersion {
                backend: descriptor.name.clone(),
                requested,
                supported: descriptor.abi,
            })
        }
    }

    /// Establish a connection-scoped session to the repository at `url`.
    fn open(&self, url: &RepoUrl) -> RaResult<Box<dyn BackendSession>>;
}

/// Backend half of a [`Session`](crate::Session).
///
/// All calls are blocking. Every call after `close` must fail with
/// `UseAfterClose`; the wrapping session also guards this.
pub trait BackendSession: Send {
    /// Query the youngest revision. Never cached.
    fn latest_revision(&mut self) -> RaResult<Revision>;

    /// Begin a commit transaction rooted at the repository root.
    fn commit_editor<'a>(
        &'a mut self,
        log_message: &str,
        callbacks: CommitCallbacks<'a>,
    ) -> RaResult<(Box<dyn Editor + 'a>, CommitResultHandle)>;

    /// Drive `editor` with the whole subtree at `root_path`, at `revision`
    /// or the latest. Returns the revision sent.
    fn do_checkout(
        &mut self,
        root_path: &RepoPath,
        revision: Option<Revision>,
        editor: &mut dyn Editor,
    ) -> RaResult<Revision>;

    /// Begin an update towards `revision` (or the latest when the report is
    /// finished). The returned reporter drives `editor` in `finish_report`.
    fn do_update<'a>(
        &'a mut self,
        revision: Option<Revision>,
        editor: &'a mut dyn Editor,
    ) -> RaResult<Box<dyn Reporter + 'a>>;

    /// Release the connection.
    fn close(&mut self) -> RaResult<()>;
}

//! Commit transaction plumbing shared by callers and backends.

use std::fmt;
use std::sync::{Arc, OnceLock};

use ra_types::{RepoPath, Revision};

use crate::error::{RaError, RaResult};

type PathClosedFn<'a> = Box<dyn FnMut(&RepoPath, Revision) -> RaResult<()> + 'a>;
type PropertySetFn<'a> = Box<dyn FnMut(&RepoPath, &str, &[u8]) -> RaResult<()> + 'a>;

/// Hooks a backend invokes after a commit became durable.
///
/// `path_closed` fires once per committed path with the new revision.
/// `property_set` hands the caller backend-assigned bookkeeping properties.
/// Neither fires for an aborted edit.
#[derive(Default)]
pub struct CommitCallbacks<'a> {
    path_closed: Option<PathClosedFn<'a>>,
    property_set: Option<PropertySetFn<'a>>,
}

impl<'a> CommitCallbacks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_path_closed(
        mut self,
        f: impl FnMut(&RepoPath, Revision) -> RaResult<()> + 'a,
    ) -> Self {
        self.path_closed = Some(Box::new(f));
        self
    }

    pub fn on_property_set(
        mut self,
        f: impl FnMut(&RepoPath, &str, &[u8]) -> RaResult<()> + 'a,
    ) -> Self {
        self.property_set = Some(Box::new(f));
        self
    }

    pub fn path_closed(&mut self, path: &RepoPath, revision: Revision) -> RaResult<()> {
        match self.path_closed.as_mut() {
            Some(f) => f(path, revision),
            None => Ok(()),
        }
    }

    pub fn property_set(&mut self, path: &RepoPath, name: &str, value: &[u8]) -> RaResult<()> {
        match self.property_set.as_mut() {
            Some(f) => f(path, name, value),
            None => Ok(()),
        }
    }

    /// Whether the caller asked for bookkeeping properties at all.
    pub fn wants_properties(&self) -> bool {
        self.property_set.is_some()
    }
}

impl fmt::Debug for CommitCallbacks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitCallbacks")
            .field("path_closed", &self.path_closed.is_some())
            .field("property_set", &self.property_set.is_some())
            .finish()
    }
}

/// Out-of-band slot for the revision a commit produced.
///
/// Empty until the commit editor's `close_edit` made the revision durable;
/// stays empty forever if the edit was aborted or failed.
#[derive(Clone, Debug, Default)]
pub struct CommitResultHandle {
    slot: Arc<OnceLock<Revision>>,
}

impl CommitResultHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_revision(&self) -> Option<Revision> {
        self.slot.get().copied()
    }

    /// Record the committed revision. Backends call this exactly once.
    pub fn resolve(&self, revision: Revision) -> RaResult<()> {
        self.slot.set(revision).map_err(|_| {
            RaError::ProtocolViolation("commit result resolved more than once".into())
        })
    }
}

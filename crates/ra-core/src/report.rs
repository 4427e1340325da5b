//! The update reporter and its override table.
//!
//! A reporter describes what the caller already has: one baseline revision
//! for the whole tree, then overrides for subtrees whose revision differs.
//! Paths given to `set_directory`/`set_file`/`delete_path` are relative to
//! the root path passed to `set_baseline`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use ra_types::{NodeKind, RepoPath, Revision};
use serde::{Deserialize, Serialize};

use crate::error::{RaError, RaResult};

/// Producer-only half of the update exchange.
///
/// `set_baseline` comes first and exactly once; `finish_report` runs the
/// whole update and its result is the update's result.
pub trait Reporter {
    fn set_baseline(&mut self, revision: Revision, root_path: &RepoPath) -> RaResult<()>;

    /// The directory at `path`, and everything below it not mentioned
    /// later, is at `revision`.
    fn set_directory(&mut self, path: &RepoPath, revision: Revision) -> RaResult<()>;

    fn set_file(&mut self, path: &RepoPath, revision: Revision) -> RaResult<()>;

    /// `path` is absent locally, whatever its parent's revision says.
    fn delete_path(&mut self, path: &RepoPath) -> RaResult<()>;

    /// Compute the delta and drive the update editor through it. Returns
    /// the revision the tree was brought to.
    fn finish_report(self: Box<Self>) -> RaResult<Revision>;

    fn abort_report(self: Box<Self>) -> RaResult<()>;
}

/// An explicit revision assertion for one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub revision: Revision,
    pub kind: NodeKind,
}

/// Report state: baseline plus depth-overriding entries.
#[derive(Clone, Debug, Default)]
pub struct ReportTable {
    baseline: Option<(Revision, RepoPath)>,
    entries: BTreeMap<RepoPath, ReportEntry>,
    missing: BTreeSet<RepoPath>,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_baseline(&mut self, revision: Revision, root_path: RepoPath) -> RaResult<()> {
        if self.baseline.is_some() {
            return Err(RaError::ProtocolViolation(
                "set_baseline called more than once".into(),
            ));
        }
        self.baseline = Some((revision, root_path));
        Ok(())
    }

    /// Record an override. Earlier entries strictly below `path` are
    /// dropped: the new entry describes the whole subtree.
    pub fn set(&mut self, path: RepoPath, revision: Revision, kind: NodeKind) -> RaResult<()> {
        if self.baseline.is_none() {
            return Err(RaError::ProtocolViolation(format!(
                "override for {path} before set_baseline"
            )));
        }
        if path.is_root() && kind.is_file() {
            return Err(RaError::ProtocolViolation(
                "the report root cannot be a file".into(),
            ));
        }
        self.entries.retain(|p, _| !path.is_strict_ancestor_of(p));
        self.missing.retain(|p| !path.subsumes(p));
        self.entries.insert(path, ReportEntry { revision, kind });
        Ok(())
    }

    /// Record that `path` and everything below it is absent. Earlier
    /// entries at or below `path` are dropped.
    pub fn set_missing(&mut self, path: RepoPath) -> RaResult<()> {
        if self.baseline.is_none() {
            return Err(RaError::ProtocolViolation(format!(
                "delete_path for {path} before set_baseline"
            )));
        }
        if path.is_root() {
            return Err(RaError::ProtocolViolation(
                "the report root cannot be deleted".into(),
            ));
        }
        self.entries.retain(|p, _| !path.subsumes(p));
        self.missing.retain(|p| !path.is_strict_ancestor_of(p));
        self.missing.insert(path);
        Ok(())
    }

    /// `true` if `path` or one of its ancestors was reported missing.
    pub fn is_missing(&self, path: &RepoPath) -> bool {
        self.missing.contains(path) || path.ancestors().iter().any(|a| self.missing.contains(a))
    }

    pub fn is_started(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn baseline(&self) -> Option<Revision> {
        self.baseline.as_ref().map(|(rev, _)| *rev)
    }

    pub fn root_path(&self) -> Option<&RepoPath> {
        self.baseline.as_ref().map(|(_, root)| root)
    }

    /// The explicit entry for `path`, if one was reported.
    pub fn entry(&self, path: &RepoPath) -> Option<&ReportEntry> {
        self.entries.get(path)
    }

    /// Revision of `path`: its own entry, else the nearest ancestor's, else
    /// the baseline.
    pub fn effective_revision(&self, path: &RepoPath) -> Revision {
        if let Some(entry) = self.entries.get(path) {
            return entry.revision;
        }
        path.ancestors()
            .iter()
            .rev()
            .find_map(|a| self.entries.get(a).map(|e| e.revision))
            .or_else(|| self.baseline())
            .unwrap_or_default()
    }

    /// `true` if some entry or missing path lies strictly inside `path`.
    pub fn has_overrides_below(&self, path: &RepoPath) -> bool {
        let below = (Bound::Excluded(path.clone()), Bound::Unbounded);
        self.entries
            .range(below.clone())
            .next()
            .is_some_and(|(p, _)| path.is_strict_ancestor_of(p))
            || self
                .missing
                .range(below)
                .next()
                .is_some_and(|p| path.is_strict_ancestor_of(p))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&RepoPath, &ReportEntry)> {
        self.entries.iter()
    }

    pub fn missing(&self) -> impl Iterator<Item = &RepoPath> {
        self.missing.iter()
    }
}

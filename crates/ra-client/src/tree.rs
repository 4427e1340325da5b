//! The client's local copy of a repository subtree.
//!
//! A [`WorkingTree`] maps paths, relative to the subtree it was checked out
//! from, to [`WorkingNode`]s. Every node records the revision it was last
//! brought to, so a tree can be *mixed*: after a commit only the committed
//! paths move to the new revision. [`WorkingTree::report`] describes such a
//! tree to an update reporter with as few entries as possible.
//!
//! A commit that deletes a path leaves the parent at its old revision, so
//! the tree remembers the deleted path until the next update and reports it
//! as missing.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use ra_core::{RaResult, Reporter};
use ra_delta::{DeltaError, DeltaResult};
use ra_types::{Checksum, NodeKind, PropMap, RepoPath, Revision};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One file or directory of a working tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingNode {
    pub kind: NodeKind,
    /// Revision this node was last checked out, updated, or committed at.
    pub revision: Revision,
    /// Versioned properties.
    pub props: PropMap,
    /// Bookkeeping properties the backend assigned at commit time. Local
    /// only; never sent back.
    pub entry_props: PropMap,
    /// File text. Always empty for directories.
    pub content: Bytes,
}

impl WorkingNode {
    pub fn directory(revision: Revision) -> Self {
        Self {
            kind: NodeKind::Directory,
            revision,
            props: PropMap::new(),
            entry_props: PropMap::new(),
            content: Bytes::new(),
        }
    }

    pub fn file(revision: Revision, content: impl Into<Bytes>) -> Self {
        Self {
            kind: NodeKind::File,
            revision,
            props: PropMap::new(),
            entry_props: PropMap::new(),
            content: content.into(),
        }
    }

    pub fn checksum(&self) -> Checksum {
        Checksum::of(&self.content)
    }
}

/// A checked-out subtree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingTree {
    root_path: RepoPath,
    nodes: BTreeMap<RepoPath, WorkingNode>,
    /// Paths committed as deleted under a parent still at an older revision.
    #[serde(default)]
    deleted: BTreeSet<RepoPath>,
}

impl WorkingTree {
    /// An empty tree for the repository subtree at `root_path`. The root
    /// starts at revision 0; a checkout brings it to its real revision.
    pub fn new(root_path: RepoPath) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(RepoPath::root(), WorkingNode::directory(Revision::ZERO));
        Self {
            root_path,
            nodes,
            deleted: BTreeSet::new(),
        }
    }

    /// Repository path this tree mirrors.
    pub fn root_path(&self) -> &RepoPath {
        &self.root_path
    }

    /// Revision of the tree root.
    pub fn revision(&self) -> Revision {
        self.nodes
            .get(&RepoPath::root())
            .map_or(Revision::ZERO, |root| root.revision)
    }

    /// Lowest and highest node revision.
    pub fn revision_range(&self) -> (Revision, Revision) {
        let revisions = self.nodes.values().map(|n| n.revision);
        let low = revisions.clone().min().unwrap_or(Revision::ZERO);
        let high = revisions.max().unwrap_or(Revision::ZERO);
        (low, high)
    }

    pub fn is_mixed(&self) -> bool {
        let (low, high) = self.revision_range();
        low != high
    }

    /// Number of entries below the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, path: &RepoPath) -> Option<&WorkingNode> {
        self.nodes.get(path)
    }

    pub(crate) fn get_mut(&mut self, path: &RepoPath) -> Option<&mut WorkingNode> {
        self.nodes.get_mut(path)
    }

    pub fn contains(&self, path: &RepoPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn kind(&self, path: &RepoPath) -> Option<NodeKind> {
        self.nodes.get(path).map(|n| n.kind)
    }

    /// Text of a file; `None` for directories and missing paths.
    pub fn read_file(&self, path: &RepoPath) -> Option<&Bytes> {
        self.nodes
            .get(path)
            .filter(|n| n.kind == NodeKind::File)
            .map(|n| &n.content)
    }

    /// Every node in depth-first order, the root first.
    pub fn nodes(&self) -> impl Iterator<Item = (&RepoPath, &WorkingNode)> {
        self.nodes.iter()
    }

    /// Every path below the root, depth-first.
    pub fn paths(&self) -> Vec<RepoPath> {
        self.nodes.keys().filter(|p| !p.is_root()).cloned().collect()
    }

    /// Paths deleted by a commit and not yet confirmed by an update.
    pub fn deleted(&self) -> impl Iterator<Item = &RepoPath> {
        self.deleted.iter()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert a new node under an existing directory.
    pub(crate) fn insert(&mut self, path: RepoPath, node: WorkingNode) -> DeltaResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| DeltaError::ProtocolViolation("cannot add the root".into()))?;
        match self.kind(&parent) {
            Some(NodeKind::Directory) => {}
            Some(NodeKind::File) => {
                return Err(DeltaError::ProtocolViolation(format!(
                    "cannot add {path}: parent is a file"
                )))
            }
            None => return Err(DeltaError::NotFound(parent)),
        }
        if self.nodes.contains_key(&path) {
            return Err(DeltaError::Conflict {
                path,
                reason: "already exists".into(),
            });
        }
        self.deleted.remove(&path);
        self.nodes.insert(path, node);
        Ok(())
    }

    /// Remove a node and everything below it.
    pub(crate) fn remove(&mut self, path: &RepoPath) -> DeltaResult<()> {
        if path.is_root() {
            return Err(DeltaError::ProtocolViolation(
                "cannot delete the root".into(),
            ));
        }
        if !self.nodes.contains_key(path) {
            return Err(DeltaError::NotFound(path.clone()));
        }
        // Descendants sort directly after their ancestor.
        let doomed: Vec<RepoPath> = self
            .nodes
            .range(path.clone()..)
            .map(|(p, _)| p)
            .take_while(|p| path.subsumes(p))
            .cloned()
            .collect();
        for p in doomed {
            self.nodes.remove(&p);
        }
        self.deleted.retain(|p| !path.is_strict_ancestor_of(p));
        Ok(())
    }

    /// Remember that a commit deleted `path`.
    pub(crate) fn mark_deleted(&mut self, path: RepoPath) {
        self.deleted.retain(|p| !path.is_strict_ancestor_of(p));
        self.deleted.insert(path);
    }

    /// Bring every node to `revision`. The tree now mirrors that revision
    /// exactly, so remembered deletions are dropped.
    pub(crate) fn stamp(&mut self, revision: Revision) {
        for node in self.nodes.values_mut() {
            node.revision = revision;
        }
        self.deleted.clear();
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    /// Describe this tree to an update reporter.
    ///
    /// The root revision becomes the baseline; a node is reported on its own
    /// only where its revision differs from its parent's. Parents come
    /// before children, so each entry refines the one above it. Deleted
    /// paths follow as missing. Returns the number of entries sent after
    /// the baseline.
    pub fn report(&self, reporter: &mut dyn Reporter) -> RaResult<usize> {
        let baseline = self.revision();
        reporter.set_baseline(baseline, &self.root_path)?;
        let mut entries = 0;
        for (path, node) in &self.nodes {
            let Some(parent) = path.parent() else {
                continue;
            };
            let inherited = self.nodes.get(&parent).map_or(baseline, |p| p.revision);
            if node.revision == inherited {
                continue;
            }
            match node.kind {
                NodeKind::Directory => reporter.set_directory(path, node.revision)?,
                NodeKind::File => reporter.set_file(path, node.revision)?,
            }
            entries += 1;
        }
        for path in &self.deleted {
            reporter.delete_path(path)?;
            entries += 1;
        }
        debug!(root = %self.root_path, %baseline, entries, "working tree reported");
        Ok(entries)
    }
}

//! An in-memory versioned repository.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ra_core::{RaError, RaResult};
use ra_types::{apply_prop_change, NodeKind, PropChange, PropMap, RepoPath, Revision};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::node::{dir_mut, lookup, walk, DirNode, FileNode, Node};

/// How a revision changed a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Added,
    Modified,
    Deleted,
    /// Deleted and re-added in the same revision.
    Replaced,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedPath {
    pub path: RepoPath,
    pub action: ChangeAction,
    pub kind: NodeKind,
}

/// Metadata of one committed revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub revision: Revision,
    pub log_message: String,
    pub date: DateTime<Utc>,
    pub txn_id: Uuid,
    pub changed_paths: Vec<ChangedPath>,
}

/// One buffered change of a commit transaction, applied in order.
#[derive(Clone, Debug)]
pub(crate) enum TxnOp {
    /// The driver opened a directory; it must still exist.
    OpenDir { path: RepoPath },
    AddDir { path: RepoPath },
    DirProps {
        path: RepoPath,
        /// `None` for directories added in this transaction.
        base: Option<Revision>,
        changes: Vec<PropChange>,
    },
    AddFile {
        path: RepoPath,
        content: Bytes,
        props: Vec<PropChange>,
    },
    ModifyFile {
        path: RepoPath,
        base: Revision,
        content: Option<Bytes>,
        props: Vec<PropChange>,
    },
    Delete {
        path: RepoPath,
        /// Base of the parent directory; `None` inside added directories.
        base: Option<Revision>,
    },
}

#[derive(Debug)]
pub(crate) struct Transaction {
    pub txn_id: Uuid,
    pub log_message: String,
    pub ops: Vec<TxnOp>,
}

#[derive(Debug)]
struct RevisionRecord {
    root: Arc<DirNode>,
    info: RevisionInfo,
}

/// A repository: an append-only list of immutable revision trees.
///
/// Readers take the read lock for a snapshot of one root; commit
/// finalization holds the write lock for conflict checks, tree building and
/// the append, so commits are serialized and each sees a consistent base.
#[derive(Debug)]
pub struct MemRepository {
    uuid: Uuid,
    revisions: RwLock<Vec<RevisionRecord>>,
    read_only: AtomicBool,
}

impl MemRepository {
    /// A repository holding only the empty revision 0.
    pub fn new() -> Self {
        let genesis = RevisionRecord {
            root: Arc::new(DirNode::default()),
            info: RevisionInfo {
                revision: Revision::ZERO,
                log_message: String::new(),
                date: Utc::now(),
                txn_id: Uuid::now_v7(),
                changed_paths: Vec::new(),
            },
        };
        Self {
            uuid: Uuid::now_v7(),
            revisions: RwLock::new(vec![genesis]),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn latest_revision(&self) -> Revision {
        let revisions = self.revisions.read().expect("lock poisoned");
        Revision::new(revisions.len() as u64 - 1)
    }

    /// Make commit finalization fail with `StorageFailure`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Root of `revision`.
    pub fn root(&self, revision: Revision) -> RaResult<Arc<DirNode>> {
        let revisions = self.revisions.read().expect("lock poisoned");
        revisions
            .get(revision.get() as usize)
            .map(|r| Arc::clone(&r.root))
            .ok_or(RaError::NoSuchRevision(revision))
    }

    /// The node at `path` in `revision`, if any.
    pub fn lookup(&self, revision: Revision, path: &RepoPath) -> RaResult<Option<Node>> {
        Ok(lookup(&self.root(revision)?, path))
    }

    /// Full text of the file at `path` in `revision`.
    pub fn read_file(&self, revision: Revision, path: &RepoPath) -> RaResult<Bytes> {
        match self.lookup(revision, path)? {
            Some(Node::File(f)) => Ok(f.content.clone()),
            _ => Err(RaError::Delta(ra_delta::DeltaError::NotFound(path.clone()))),
        }
    }

    /// Every path in `revision` with its kind.
    pub fn list(&self, revision: Revision) -> RaResult<Vec<(RepoPath, NodeKind)>> {
        let root = self.root(revision)?;
        Ok(walk(&root))
    }

    pub fn info(&self, revision: Revision) -> RaResult<RevisionInfo> {
        let revisions = self.revisions.read().expect("lock poisoned");
        revisions
            .get(revision.get() as usize)
            .map(|r| r.info.clone())
            .ok_or(RaError::NoSuchRevision(revision))
    }

    /// Metadata of every revision, oldest first.
    pub fn log(&self) -> Vec<RevisionInfo> {
        let revisions = self.revisions.read().expect("lock poisoned");
        revisions.iter().map(|r| r.info.clone()).collect()
    }

    /// The revision log as pretty-printed JSON.
    pub fn log_json(&self) -> RaResult<String> {
        serde_json::to_string_pretty(&self.log())
            .map_err(|e| RaError::StorageFailure(format!("serializing log: {e}")))
    }

    /// Apply a transaction as one new revision.
    pub(crate) fn commit(&self, txn: Transaction) -> RaResult<RevisionInfo> {
        if self.is_read_only() {
            return Err(RaError::StorageFailure("repository is read-only".into()));
        }

        let mut revisions = self.revisions.write().expect("lock poisoned");
        let base = revisions.last().ok_or_else(|| {
            RaError::StorageFailure("repository has no revisions".into())
        })?;
        let new_rev = base.info.revision.next();
        let mut root = Arc::clone(&base.root);
        let mut changes = ChangeSet::default();

        for op in txn.ops {
            apply_op(&mut root, op, new_rev, &mut changes)?;
        }

        let info = RevisionInfo {
            revision: new_rev,
            log_message: txn.log_message,
            date: Utc::now(),
            txn_id: txn.txn_id,
            changed_paths: changes.into_paths(),
        };
        revisions.push(RevisionRecord {
            root,
            info: info.clone(),
        });
        info!(
            revision = %new_rev,
            changed = info.changed_paths.len(),
            txn = %info.txn_id,
            "revision committed"
        );
        Ok(info)
    }
}

impl Default for MemRepository {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Transaction application
// ---------------------------------------------------------------------------

fn conflict(path: &RepoPath, reason: impl Into<String>) -> RaError {
    RaError::CommitConflict {
        path: path.clone(),
        reason: reason.into(),
    }
}

/// Split `path` into its parent and entry name.
fn split(path: &RepoPath) -> RaResult<(RepoPath, &str)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(conflict(path, "the root cannot be added, replaced or deleted")),
    }
}

fn apply_op(
    root: &mut Arc<DirNode>,
    op: TxnOp,
    rev: Revision,
    changes: &mut ChangeSet,
) -> RaResult<()> {
    debug!(?op, "applying transaction op");
    match op {
        TxnOp::OpenDir { path } => match lookup(root, &path) {
            Some(Node::Dir(_)) => Ok(()),
            Some(Node::File(_)) => Err(conflict(&path, "is now a file")),
            None => Err(conflict(&path, "directory no longer exists")),
        },

        TxnOp::AddDir { path } => {
            let (parent, name) = split(&path)?;
            let dir = dir_mut(root, &parent, rev)
                .ok_or_else(|| conflict(&path, "parent directory does not exist"))?;
            if dir.entries.contains_key(name) {
                return Err(conflict(&path, "already exists"));
            }
            let node = DirNode {
                changed_rev: rev,
                props_rev: rev,
                ..DirNode::default()
            };
            dir.entries.insert(name.to_string(), Node::Dir(Arc::new(node)));
            changes.added(path, NodeKind::Directory);
            Ok(())
        }

        TxnOp::DirProps {
            path,
            base,
            changes: props,
        } => {
            if let Some(base) = base {
                match lookup(root, &path) {
                    Some(Node::Dir(d)) if d.props_rev > base => {
                        return Err(conflict(
                            &path,
                            format!("properties changed in {} after base {base}", d.props_rev),
                        ))
                    }
                    Some(Node::Dir(_)) => {}
                    _ => return Err(conflict(&path, "directory no longer exists")),
                }
            }
            let dir = dir_mut(root, &path, rev)
                .ok_or_else(|| conflict(&path, "directory no longer exists"))?;
            for change in &props {
                apply_prop_change(&mut dir.props, &change.name, change.value.as_deref());
            }
            dir.props_rev = rev;
            changes.modified(path, NodeKind::Directory);
            Ok(())
        }

        TxnOp::AddFile {
            path,
            content,
            props,
        } => {
            let (parent, name) = split(&path)?;
            let dir = dir_mut(root, &parent, rev)
                .ok_or_else(|| conflict(&path, "parent directory does not exist"))?;
            if dir.entries.contains_key(name) {
                return Err(conflict(&path, "already exists"));
            }
            let mut map = PropMap::new();
            for change in &props {
                apply_prop_change(&mut map, &change.name, change.value.as_deref());
            }
            let file = FileNode::new(rev, map, content);
            dir.entries.insert(name.to_string(), Node::File(Arc::new(file)));
            changes.added(path, NodeKind::File);
            Ok(())
        }

        TxnOp::ModifyFile {
            path,
            base,
            content,
            props,
        } => {
            let current = match lookup(root, &path) {
                Some(Node::File(f)) => f,
                Some(Node::Dir(_)) => return Err(conflict(&path, "is now a directory")),
                None => return Err(conflict(&path, "file no longer exists")),
            };
            if current.changed_rev > base {
                return Err(conflict(
                    &path,
                    format!("changed in {} after base {base}", current.changed_rev),
                ));
            }
            let mut map = current.props.clone();
            for change in &props {
                apply_prop_change(&mut map, &change.name, change.value.as_deref());
            }
            let content = content.unwrap_or_else(|| current.content.clone());
            let (parent, name) = split(&path)?;
            let dir = dir_mut(root, &parent, rev)
                .ok_or_else(|| conflict(&path, "parent directory does not exist"))?;
            let file = FileNode::new(rev, map, content);
            dir.entries.insert(name.to_string(), Node::File(Arc::new(file)));
            changes.modified(path, NodeKind::File);
            Ok(())
        }

        TxnOp::Delete { path, base } => {
            if let (Some(base), Some(current)) = (base, lookup(root, &path)) {
                let changed = current.changed_rev();
                if changed > base && changed != rev {
                    return Err(conflict(
                        &path,
                        format!("changed in {changed} after base {base}"),
                    ));
                }
            }
            let (parent, name) = split(&path)?;
            let dir = dir_mut(root, &parent, rev)
                .ok_or_else(|| conflict(&path, "parent directory does not exist"))?;
            let removed = dir
                .entries
                .remove(name)
                .ok_or_else(|| conflict(&path, "does not exist"))?;
            changes.deleted(path, removed.kind());
            Ok(())
        }
    }
}

/// Changed paths of a transaction, folded per path.
#[derive(Debug, Default)]
struct ChangeSet {
    paths: BTreeMap<RepoPath, (ChangeAction, NodeKind)>,
}

impl ChangeSet {
    fn added(&mut self, path: RepoPath, kind: NodeKind) {
        let action = match self.paths.get(&path) {
            Some((ChangeAction::Deleted, _)) => ChangeAction::Replaced,
            _ => ChangeAction::Added,
        };
        self.paths.insert(path, (action, kind));
    }

    fn modified(&mut self, path: RepoPath, kind: NodeKind) {
        self.paths
            .entry(path)
            .or_insert((ChangeAction::Modified, kind));
    }

    fn deleted(&mut self, path: RepoPath, kind: NodeKind) {
        self.paths.retain(|p, _| !path.is_strict_ancestor_of(p));
        match self.paths.get(&path) {
            Some((ChangeAction::Added, _)) => {
                self.paths.remove(&path);
            }
            _ => {
                self.paths.insert(path, (ChangeAction::Deleted, kind));
            }
        }
    }

    fn into_paths(self) -> Vec<ChangedPath> {
        self.paths
            .into_iter()
            .map(|(path, (action, kind))| ChangedPath { path, action, kind })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> RepoPath {
        RepoPath::parse(s).unwrap()
    }

    fn txn(ops: Vec<TxnOp>) -> Transaction {
        Transaction {
            txn_id: Uuid::now_v7(),
            log_message: "test".into(),
            ops,
        }
    }

    fn add_file(path: &str, content: &'static [u8]) -> TxnOp {
        TxnOp::AddFile {
            path: p(path),
            content: Bytes::from_static(content),
            props: Vec::new(),
        }
    }

    fn seeded() -> MemRepository {
        let repo = MemRepository::new();
        repo.commit(txn(vec![
            TxnOp::AddDir { path: p("trunk") },
            add_file("trunk/a.txt", b"alpha"),
            TxnOp::AddDir { path: p("tags") },
        ]))
        .unwrap();
        repo
    }

    // -----------------------------------------------------------------------
    // Revisions
    // -----------------------------------------------------------------------

    #[test]
    fn starts_at_revision_zero() {
        let repo = MemRepository::new();
        assert_eq!(repo.latest_revision(), Revision::ZERO);
        assert!(repo.list(Revision::ZERO).unwrap().is_empty());
        assert_eq!(
            repo.root(Revision::new(1)).err(),
            Some(RaError::NoSuchRevision(Revision::new(1)))
        );
    }

    #[test]
    fn commit_appends_one_revision() {
        let repo = seeded();
        assert_eq!(repo.latest_revision(), Revision::new(1));
        assert_eq!(
            repo.read_file(Revision::new(1), &p("trunk/a.txt")).unwrap().as_ref(),
            b"alpha"
        );
        let info = repo.info(Revision::new(1)).unwrap();
        assert_eq!(info.log_message, "test");
        assert_eq!(
            info.changed_paths
                .iter()
                .map(|c| (c.path.to_string(), c.action))
                .collect::<Vec<_>>(),
            vec![
                ("/tags".to_string(), ChangeAction::Added),
                ("/trunk".to_string(), ChangeAction::Added),
                ("/trunk/a.txt".to_string(), ChangeAction::Added),
            ]
        );
    }

    #[test]
    fn empty_transaction_still_creates_revision() {
        let repo = seeded();
        let info = repo.commit(txn(Vec::new())).unwrap();
        assert_eq!(info.revision, Revision::new(2));
        assert!(info.changed_paths.is_empty());
    }

    #[test]
    fn old_revisions_are_untouched() {
        let repo = seeded();
        repo.commit(txn(vec![TxnOp::ModifyFile {
            path: p("trunk/a.txt"),
            base: Revision::new(1),
            content: Some(Bytes::from_static(b"beta")),
            props: vec![PropChange::set("color", "red")],
        }]))
        .unwrap();
        assert_eq!(
            repo.read_file(Revision::new(1), &p("trunk/a.txt")).unwrap().as_ref(),
            b"alpha"
        );
        let node = repo.lookup(Revision::new(2), &p("trunk/a.txt")).unwrap().unwrap();
        assert_eq!(node.props().get("color").map(|v| v.as_ref()), Some(&b"red"[..]));
        assert_eq!(node.changed_rev(), Revision::new(2));

        let old_tags = repo.lookup(Revision::new(1), &p("tags")).unwrap().unwrap();
        let new_tags = repo.lookup(Revision::new(2), &p("tags")).unwrap().unwrap();
        assert!(old_tags.same_version(&new_tags));
    }

    // -----------------------------------------------------------------------
    // Conflicts
    // -----------------------------------------------------------------------

    #[test]
    fn out_of_date_file_conflicts() {
        let repo = seeded();
        let modify = |content: &'static [u8]| TxnOp::ModifyFile {
            path: p("trunk/a.txt"),
            base: Revision::new(1),
            content: Some(Bytes::from_static(content)),
            props: Vec::new(),
        };
        repo.commit(txn(vec![modify(b"first")])).unwrap();
        let err = repo.commit(txn(vec![modify(b"second")])).unwrap_err();
        assert!(err.is_retryable_commit());
        assert_eq!(repo.latest_revision(), Revision::new(2));
    }

    #[test]
    fn add_over_existing_conflicts_and_leaves_no_trace() {
        let repo = seeded();
        let err = repo
            .commit(txn(vec![
                add_file("tags/ok", b"fine"),
                add_file("trunk/a.txt", b"again"),
            ]))
            .unwrap_err();
        assert!(matches!(err, RaError::CommitConflict { .. }));
        assert_eq!(repo.latest_revision(), Revision::new(1));
        assert!(repo.lookup(Revision::new(1), &p("tags/ok")).unwrap().is_none());
    }

    #[test]
    fn delete_of_missing_entry_conflicts() {
        let repo = seeded();
        let err = repo
            .commit(txn(vec![TxnOp::Delete {
                path: p("trunk/zzz"),
                base: None,
            }]))
            .unwrap_err();
        assert!(matches!(err, RaError::CommitConflict { .. }));
    }

    #[test]
    fn stale_delete_conflicts() {
        let repo = seeded();
        let delete = |base| TxnOp::Delete {
            path: p("trunk"),
            base: Some(Revision::new(base)),
        };
        repo.commit(txn(vec![TxnOp::ModifyFile {
            path: p("trunk/a.txt"),
            base: Revision::new(1),
            content: Some(Bytes::from_static(b"newer")),
            props: Vec::new(),
        }]))
        .unwrap();
        let err = repo.commit(txn(vec![delete(1)])).unwrap_err();
        assert!(err.is_retryable_commit());
        assert_eq!(repo.latest_revision(), Revision::new(2));
        repo.commit(txn(vec![delete(2)])).unwrap();
        assert!(repo.lookup(Revision::new(3), &p("trunk")).unwrap().is_none());
    }

    #[test]
    fn stale_directory_props_conflict() {
        let repo = seeded();
        let props = |base| TxnOp::DirProps {
            path: p("trunk"),
            base: Some(Revision::new(base)),
            changes: vec![PropChange::set("owner", "me")],
        };
        repo.commit(txn(vec![props(1)])).unwrap();
        assert!(repo.commit(txn(vec![props(1)])).is_err());
        // Adding files below a directory does not make its props stale.
        repo.commit(txn(vec![add_file("trunk/b", b"b")])).unwrap();
        repo.commit(txn(vec![props(2)])).unwrap();
    }

    #[test]
    fn replace_is_folded() {
        let repo = seeded();
        let info = repo
            .commit(txn(vec![
                TxnOp::Delete {
                    path: p("trunk/a.txt"),
                    base: None,
                },
                TxnOp::AddDir { path: p("trunk/a.txt") },
            ]))
            .unwrap();
        assert_eq!(info.changed_paths.len(), 1);
        assert_eq!(info.changed_paths[0].action, ChangeAction::Replaced);
        assert_eq!(info.changed_paths[0].kind, NodeKind::Directory);
    }

    #[test]
    fn read_only_repository_refuses_commits() {
        let repo = seeded();
        repo.set_read_only(true);
        assert!(matches!(
            repo.commit(txn(Vec::new())),
            Err(RaError::StorageFailure(_))
        ));
        assert_eq!(repo.latest_revision(), Revision::new(1));
    }

    #[test]
    fn log_exports_json() {
        let repo = seeded();
        let json = repo.log_json().unwrap();
        let log: Vec<RevisionInfo> = serde_json::from_str(&json).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].changed_paths[0].action, ChangeAction::Added);
    }
}

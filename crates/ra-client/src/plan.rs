//! Local changes to commit.

use std::collections::BTreeMap;

use bytes::Bytes;
use ra_types::{apply_prop_change, NodeKind, PropChange, RepoPath};

use crate::error::{ClientError, ClientResult};
use crate::tree::{WorkingNode, WorkingTree};

/// One local change. Paths are relative to the working tree root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    AddDirectory { path: RepoPath },
    AddFile { path: RepoPath, content: Bytes },
    ModifyFile { path: RepoPath, content: Bytes },
    /// `value: None` removes the property.
    SetProperty {
        path: RepoPath,
        name: String,
        value: Option<Bytes>,
    },
    Delete { path: RepoPath },
}

impl Change {
    pub fn path(&self) -> &RepoPath {
        match self {
            Change::AddDirectory { path }
            | Change::AddFile { path, .. }
            | Change::ModifyFile { path, .. }
            | Change::SetProperty { path, .. }
            | Change::Delete { path } => path,
        }
    }
}

/// An ordered list of changes, applied in sequence.
///
/// Later changes see the effect of earlier ones: a file can be added into a
/// directory added just before it, and deleting a path then adding it again
/// replaces it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitPlan {
    changes: Vec<Change>,
}

impl CommitPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_directory(mut self, path: RepoPath) -> Self {
        self.changes.push(Change::AddDirectory { path });
        self
    }

    pub fn add_file(mut self, path: RepoPath, content: impl Into<Bytes>) -> Self {
        self.changes.push(Change::AddFile {
            path,
            content: content.into(),
        });
        self
    }

    pub fn modify_file(mut self, path: RepoPath, content: impl Into<Bytes>) -> Self {
        self.changes.push(Change::ModifyFile {
            path,
            content: content.into(),
        });
        self
    }

    pub fn set_property(
        mut self,
        path: RepoPath,
        name: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.changes.push(Change::SetProperty {
            path,
            name: name.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn delete_property(mut self, path: RepoPath, name: impl Into<String>) -> Self {
        self.changes.push(Change::SetProperty {
            path,
            name: name.into(),
            value: None,
        });
        self
    }

    pub fn delete(mut self, path: RepoPath) -> Self {
        self.changes.push(Change::Delete { path });
        self
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Check the plan against `base` and fold it into per-path edits.
    ///
    /// Nothing is sent anywhere; a plan that does not fit the tree fails
    /// here, before a commit editor is opened.
    pub(crate) fn stage(&self, base: &WorkingTree) -> ClientResult<StagedPlan> {
        let mut tree = base.clone();
        let mut edits: BTreeMap<RepoPath, PathEdit> = BTreeMap::new();

        for change in &self.changes {
            match change {
                Change::AddDirectory { path } => {
                    check_addable(&tree, path)?;
                    tree.insert(path.clone(), WorkingNode::directory(base.revision()))?;
                    edits.entry(path.clone()).or_default().added = Some(NodeKind::Directory);
                }
                Change::AddFile { path, content } => {
                    check_addable(&tree, path)?;
                    tree.insert(
                        path.clone(),
                        WorkingNode::file(base.revision(), content.clone()),
                    )?;
                    let edit = edits.entry(path.clone()).or_default();
                    edit.added = Some(NodeKind::File);
                    edit.content = Some(content.clone());
                }
                Change::ModifyFile { path, content } => {
                    let node = tree
                        .get_mut(path)
                        .ok_or_else(|| ClientError::NotFound(path.clone()))?;
                    if node.kind != NodeKind::File {
                        return Err(ClientError::InvalidPlan(format!(
                            "{path} is a directory"
                        )));
                    }
                    node.content = content.clone();
                    edits.entry(path.clone()).or_default().content = Some(content.clone());
                }
                Change::SetProperty { path, name, value } => {
                    let node = tree
                        .get_mut(path)
                        .ok_or_else(|| ClientError::NotFound(path.clone()))?;
                    apply_prop_change(&mut node.props, name, value.as_deref());
                    edits.entry(path.clone()).or_default().props.push(PropChange {
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
                Change::Delete { path } => {
                    if path.is_root() {
                        return Err(ClientError::InvalidPlan(
                            "cannot delete the tree root".into(),
                        ));
                    }
                    if !tree.contains(path) {
                        return Err(ClientError::NotFound(path.clone()));
                    }
                    tree.remove(path)?;
                    // Deleting something this plan added cancels the add,
                    // unless the add was itself replacing a committed node.
                    let committed = edits
                        .get(path)
                        .map_or(true, |e| e.added.is_none() || e.deleted);
                    edits.retain(|p, _| !path.subsumes(p));
                    if committed {
                        edits.insert(
                            path.clone(),
                            PathEdit {
                                deleted: true,
                                ..PathEdit::default()
                            },
                        );
                    }
                }
            }
        }
        Ok(StagedPlan { edits, tree })
    }
}

fn check_addable(tree: &WorkingTree, path: &RepoPath) -> ClientResult<()> {
    if tree.contains(path) {
        return Err(ClientError::InvalidPlan(format!("{path} already exists")));
    }
    let parent = path
        .parent()
        .ok_or_else(|| ClientError::InvalidPlan("cannot add the tree root".into()))?;
    match tree.kind(&parent) {
        Some(NodeKind::Directory) => Ok(()),
        Some(NodeKind::File) => Err(ClientError::InvalidPlan(format!(
            "cannot add {path}: {parent} is a file"
        ))),
        None => Err(ClientError::NotFound(parent)),
    }
}

/// What a plan does to one path, after folding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PathEdit {
    /// The committed node is deleted first.
    pub deleted: bool,
    /// A new node is added (after the delete, if any).
    pub added: Option<NodeKind>,
    /// New file text.
    pub content: Option<Bytes>,
    pub props: Vec<PropChange>,
}

/// A plan checked against a working tree.
#[derive(Debug)]
pub(crate) struct StagedPlan {
    pub edits: BTreeMap<RepoPath, PathEdit>,
    /// The working tree as it will look once the commit lands, before
    /// committed paths are bumped to the new revision.
    pub tree: WorkingTree,
}

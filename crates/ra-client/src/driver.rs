//! Driving a commit editor from a staged plan.
//!
//! The commit editor is rooted at the repository root, so the driver first
//! opens the directories leading down to the working tree root. Below it,
//! only directories on the way to an edited path are opened; every other
//! subtree is left alone.
//!
//! Deletes are checked against the parent's declared base, so a directory
//! is opened at the newest revision among itself and the subtrees it
//! deletes.

use std::cmp;
use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use ra_delta::{transmit_text, DirBaton, Editor};
use ra_types::{Checksum, NodeKind, RepoPath, Revision};
use tracing::trace;

use crate::error::{ClientError, ClientResult};
use crate::plan::PathEdit;
use crate::tree::WorkingTree;

pub(crate) struct CommitDriver<'p> {
    base: &'p WorkingTree,
    edits: &'p BTreeMap<RepoPath, PathEdit>,
    window_size: usize,
}

impl<'p> CommitDriver<'p> {
    pub(crate) fn new(
        base: &'p WorkingTree,
        edits: &'p BTreeMap<RepoPath, PathEdit>,
        window_size: usize,
    ) -> Self {
        Self {
            base,
            edits,
            window_size,
        }
    }

    /// Send every edit, then `close_edit`.
    pub(crate) fn drive(&self, editor: &mut dyn Editor) -> ClientResult<()> {
        let revision = self.dir_base(&RepoPath::root());
        let root = editor.open_root(Some(revision))?;
        let spine: Vec<&str> = self.base.root_path().components().collect();
        self.descend(editor, &root, &spine, revision)?;
        editor.close_directory(root)?;
        editor.close_edit()?;
        Ok(())
    }

    /// Open the repository directories above the working tree root.
    fn descend(
        &self,
        editor: &mut dyn Editor,
        dir: &DirBaton,
        spine: &[&str],
        revision: Revision,
    ) -> ClientResult<()> {
        let Some((name, rest)) = spine.split_first() else {
            return self.edit_dir(editor, dir, &RepoPath::root());
        };
        let child = editor.open_directory(dir, name, revision)?;
        self.descend(editor, &child, rest, revision)?;
        editor.close_directory(child)?;
        Ok(())
    }

    /// Base revision to declare when opening the directory at `rel`.
    fn dir_base(&self, rel: &RepoPath) -> Revision {
        let own = self.base.get(rel).map_or(Revision::ZERO, |n| n.revision);
        self.edits
            .iter()
            .filter(|(path, edit)| edit.deleted && path.parent().as_ref() == Some(rel))
            .flat_map(|(deleted, _)| {
                self.base
                    .nodes()
                    .filter(move |(path, _)| deleted.subsumes(path))
            })
            .map(|(_, node)| node.revision)
            .fold(own, cmp::max)
    }

    /// Names directly below `rel` that an edit lies at or under.
    fn child_names(&self, rel: &RepoPath) -> BTreeSet<&'p str> {
        let depth = rel.depth();
        self.edits
            .keys()
            .filter(|path| rel.is_strict_ancestor_of(path))
            .filter_map(|path| path.components().nth(depth))
            .collect()
    }

    fn edit_dir(&self, editor: &mut dyn Editor, dir: &DirBaton, rel: &RepoPath) -> ClientResult<()> {
        if let Some(edit) = self.edits.get(rel) {
            for change in &edit.props {
                editor.change_dir_prop(dir, &change.name, change.value.as_deref())?;
            }
        }
        for name in self.child_names(rel) {
            let path = rel.join(name)?;
            match self.edits.get(&path) {
                Some(edit) => self.edit_entry(editor, dir, name, &path, edit)?,
                None => self.open_entry(editor, dir, name, &path, None)?,
            }
        }
        Ok(())
    }

    fn edit_entry(
        &self,
        editor: &mut dyn Editor,
        dir: &DirBaton,
        name: &str,
        path: &RepoPath,
        edit: &PathEdit,
    ) -> ClientResult<()> {
        if edit.deleted {
            trace!(path = %path, "delete");
            editor.delete_entry(dir, name)?;
        }
        match edit.added {
            Some(NodeKind::Directory) => {
                let child = editor.add_directory(dir, name)?;
                self.edit_dir(editor, &child, path)?;
                editor.close_directory(child)?;
            }
            Some(NodeKind::File) => {
                let file = editor.add_file(dir, name)?;
                let content = edit.content.clone().unwrap_or_default();
                transmit_text(editor, &file, None, &content, self.window_size)?;
                for change in &edit.props {
                    editor.change_file_prop(&file, &change.name, change.value.as_deref())?;
                }
                editor.close_file(file, Some(&Checksum::of(&content)))?;
            }
            None if edit.deleted => {}
            None => self.open_entry(editor, dir, name, path, Some(edit))?,
        }
        Ok(())
    }

    fn open_entry(
        &self,
        editor: &mut dyn Editor,
        dir: &DirBaton,
        name: &str,
        path: &RepoPath,
        edit: Option<&PathEdit>,
    ) -> ClientResult<()> {
        let node = self
            .base
            .get(path)
            .ok_or_else(|| ClientError::NotFound(path.clone()))?;
        match node.kind {
            NodeKind::Directory => {
                let child = editor.open_directory(dir, name, self.dir_base(path))?;
                self.edit_dir(editor, &child, path)?;
                editor.close_directory(child)?;
            }
            NodeKind::File => {
                let file = editor.open_file(dir, name, node.revision)?;
                let mut result = node.checksum();
                if let Some(content) = edit.and_then(|e| e.content.as_ref()) {
                    send_text(editor, &file, &node.content, content, self.window_size)?;
                    result = Checksum::of(content);
                }
                for change in edit.iter().flat_map(|e| &e.props) {
                    editor.change_file_prop(&file, &change.name, change.value.as_deref())?;
                }
                editor.close_file(file, Some(&result))?;
            }
        }
        Ok(())
    }
}

fn send_text(
    editor: &mut dyn Editor,
    file: &ra_delta::FileBaton,
    base: &Bytes,
    target: &Bytes,
    window_size: usize,
) -> ClientResult<()> {
    trace!(base = base.len(), target = target.len(), "sending text delta");
    transmit_text(editor, file, Some(base), target, window_size)?;
    Ok(())
}

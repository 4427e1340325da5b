//! Applying checkout and update drives to a working tree.

use bytes::Bytes;
use ra_delta::{
    BatonTree, DeltaError, DeltaResult, DeltaWindow, DirBaton, EditState, Editor, FileBaton,
    TextApplier, WindowSink,
};
use ra_types::{apply_prop_change, Checksum, NodeKind, RepoPath, Revision};
use tracing::{debug, trace};

use crate::tree::{WorkingNode, WorkingTree};

/// Consuming editor that patches a [`WorkingTree`] towards one revision.
///
/// Paths in the drive are relative to the tree root. All effects go to a
/// staged copy taken at `open_root`; `close_edit` stamps every node with
/// the target revision and swaps the copy in, `abort_edit` throws it away.
#[derive(Debug)]
pub struct TreePatcher {
    current: WorkingTree,
    staged: Option<WorkingTree>,
    target: Revision,
    batons: BatonTree,
}

impl TreePatcher {
    pub fn new(tree: WorkingTree, target: Revision) -> Self {
        Self {
            current: tree,
            staged: None,
            target,
            batons: BatonTree::new(),
        }
    }

    pub fn target(&self) -> Revision {
        self.target
    }

    /// The committed tree: patched once the edit closed, untouched otherwise.
    pub fn tree(&self) -> &WorkingTree {
        &self.current
    }

    pub fn into_tree(self) -> WorkingTree {
        self.current
    }

    pub fn state(&self) -> EditState {
        self.batons.state()
    }

    /// Run `op`, poisoning the edit if it fails.
    fn edit<T>(&mut self, op: impl FnOnce(&mut Self) -> DeltaResult<T>) -> DeltaResult<T> {
        let result = op(self);
        self.batons.guard(result)
    }

    fn staged(&mut self) -> DeltaResult<&mut WorkingTree> {
        self.staged
            .as_mut()
            .ok_or_else(|| DeltaError::ProtocolViolation("edit not started".into()))
    }

    fn node(&mut self, path: &RepoPath, kind: NodeKind) -> DeltaResult<&mut WorkingNode> {
        match self.staged()?.get_mut(path) {
            Some(node) if node.kind == kind => Ok(node),
            Some(node) => Err(DeltaError::ProtocolViolation(format!(
                "{path} is a {}, not a {kind}",
                node.kind
            ))),
            None => Err(DeltaError::NotFound(path.clone())),
        }
    }
}

impl Editor for TreePatcher {
    fn open_root(&mut self, base_revision: Option<Revision>) -> DeltaResult<DirBaton> {
        let root = self.batons.open_root()?;
        debug!(
            root = %self.current.root_path(),
            base = ?base_revision,
            target = %self.target,
            "patching working tree"
        );
        self.staged = Some(self.current.clone());
        Ok(root)
    }

    fn add_directory(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<DirBaton> {
        let dir = self.batons.add_directory(parent, name)?;
        self.edit(|this| {
            let path = this.batons.dir_path(&dir)?;
            let node = WorkingNode::directory(this.target);
            this.staged()?.insert(path, node)
        })?;
        Ok(dir)
    }

    fn open_directory(
        &mut self,
        parent: &DirBaton,
        name: &str,
        _base_revision: Revision,
    ) -> DeltaResult<DirBaton> {
        let dir = self.batons.open_directory(parent, name)?;
        self.edit(|this| {
            let path = this.batons.dir_path(&dir)?;
            this.node(&path, NodeKind::Directory).map(|_| ())
        })?;
        Ok(dir)
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()> {
        self.edit(|this| {
            let path = this.batons.dir_path(dir)?;
            let node = this.node(&path, NodeKind::Directory)?;
            apply_prop_change(&mut node.props, name, value);
            Ok(())
        })
    }

    fn close_directory(&mut self, dir: DirBaton) -> DeltaResult<()> {
        self.batons.close_directory(dir).map(|_| ())
    }

    fn add_file(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<FileBaton> {
        let file = self.batons.add_file(parent, name)?;
        self.edit(|this| {
            let path = this.batons.file_path(&file)?;
            let node = WorkingNode::file(this.target, Bytes::new());
            this.staged()?.insert(path, node)
        })?;
        Ok(file)
    }

    fn open_file(
        &mut self,
        parent: &DirBaton,
        name: &str,
        _base_revision: Revision,
    ) -> DeltaResult<FileBaton> {
        let file = self.batons.open_file(parent, name)?;
        self.edit(|this| {
            let path = this.batons.file_path(&file)?;
            this.node(&path, NodeKind::File).map(|_| ())
        })?;
        Ok(file)
    }

    fn apply_text_delta<'s>(
        &'s mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> DeltaResult<Box<dyn WindowSink + 's>> {
        let path = self.batons.begin_text(file)?;
        let base = self.edit(|this| {
            let node = this.node(&path, NodeKind::File)?;
            let Some(expected) = base_checksum else {
                return Ok(Bytes::new());
            };
            let actual = node.checksum();
            if actual != *expected {
                return Err(DeltaError::ChecksumMismatch {
                    path: path.clone(),
                    expected: *expected,
                    actual,
                });
            }
            Ok(node.content.clone())
        })?;
        let slot = match self.staged.as_mut().and_then(|t| t.get_mut(&path)) {
            Some(node) => &mut node.content,
            None => return self.batons.guard(Err(DeltaError::NotFound(path))),
        };
        Ok(Box::new(PatchSink {
            path,
            applier: TextApplier::new(base),
            slot,
            batons: &mut self.batons,
        }))
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()> {
        self.edit(|this| {
            let path = this.batons.file_path(file)?;
            let node = this.node(&path, NodeKind::File)?;
            apply_prop_change(&mut node.props, name, value);
            Ok(())
        })
    }

    fn close_file(
        &mut self,
        file: FileBaton,
        result_checksum: Option<&Checksum>,
    ) -> DeltaResult<()> {
        self.edit(|this| {
            let path = this.batons.file_path(&file)?;
            if let Some(expected) = result_checksum {
                let actual = this.node(&path, NodeKind::File)?.checksum();
                if actual != *expected {
                    return Err(DeltaError::ChecksumMismatch {
                        path,
                        expected: *expected,
                        actual,
                    });
                }
            }
            Ok(())
        })?;
        self.batons.close_file(file).map(|_| ())
    }

    fn delete_entry(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<()> {
        self.edit(|this| {
            let path = this.batons.entry_path(parent, name)?;
            trace!(path = %path, "delete");
            this.staged()?.remove(&path)
        })
    }

    fn close_edit(&mut self) -> DeltaResult<()> {
        let result = self.staged().map(|_| ());
        self.batons.guard(result)?;
        self.batons.close_edit()?;
        if let Some(mut staged) = self.staged.take() {
            staged.stamp(self.target);
            self.current = staged;
        }
        debug!(
            root = %self.current.root_path(),
            revision = %self.target,
            nodes = self.current.len(),
            "working tree patched"
        );
        Ok(())
    }

    fn abort_edit(&mut self) -> DeltaResult<()> {
        self.batons.abort()?;
        self.staged = None;
        debug!(root = %self.current.root_path(), "working tree patch discarded");
        Ok(())
    }
}

struct PatchSink<'s> {
    path: RepoPath,
    applier: TextApplier,
    slot: &'s mut Bytes,
    batons: &'s mut BatonTree,
}

impl WindowSink for PatchSink<'_> {
    fn window(&mut self, window: &DeltaWindow) -> DeltaResult<()> {
        let result = self.applier.apply(window);
        self.batons.guard(result)
    }

    fn finish(self: Box<Self>) -> DeltaResult<()> {
        let this = *self;
        trace!(path = %this.path, windows = this.applier.windows(), "text patched");
        *this.slot = this.applier.finish();
        Ok(())
    }
}

//! Baton arena shared by every editor implementation.
//!
//! Batons are move-only handles into a per-edit arena of node records. The
//! arena owns all bookkeeping (path, kind, open/closed, open child count),
//! so an editor only maps a [`NodeHandle`] to whatever payload it keeps per
//! node. Slots are never reused within an edit: a closed baton stays closed.

use std::sync::atomic::{AtomicU32, Ordering};

use ra_types::{validate_name, NodeKind, RepoPath};
use tracing::trace;

use crate::error::{DeltaError, DeltaResult};

static NEXT_EDIT_ID: AtomicU32 = AtomicU32::new(1);

/// Opaque index of a node record inside one edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    edit: u32,
    index: u32,
}

impl NodeHandle {
    /// Slot index, stable for the lifetime of the edit.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Baton for an open directory (including the edit root).
#[derive(Debug, PartialEq, Eq)]
pub struct DirBaton(NodeHandle);

impl DirBaton {
    pub fn handle(&self) -> NodeHandle {
        self.0
    }
}

/// Baton for an open file.
#[derive(Debug, PartialEq, Eq)]
pub struct FileBaton(NodeHandle);

impl FileBaton {
    pub fn handle(&self) -> NodeHandle {
        self.0
    }
}

/// Lifecycle of an edit. Transitions only go forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditState {
    Open,
    Closed,
    Aborted,
}

#[derive(Debug)]
struct NodeRecord {
    parent: Option<NodeHandle>,
    path: RepoPath,
    kind: NodeKind,
    added: bool,
    open: bool,
    open_children: usize,
    text_applied: bool,
}

/// Arena of node records for one edit.
#[derive(Debug)]
pub struct BatonTree {
    edit: u32,
    nodes: Vec<NodeRecord>,
    state: EditState,
    poisoned: bool,
    root: Option<NodeHandle>,
    open_nodes: usize,
}

impl BatonTree {
    pub fn new() -> Self {
        Self {
            edit: NEXT_EDIT_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            state: EditState::Open,
            poisoned: false,
            root: None,
            open_nodes: 0,
        }
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    /// `true` once any call of this edit has failed.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of batons handed out and not yet closed.
    pub fn open_nodes(&self) -> usize {
        self.open_nodes
    }

    /// Pass a result through, poisoning the edit if it is an error.
    pub fn guard<T>(&mut self, result: DeltaResult<T>) -> DeltaResult<T> {
        if let Err(ref e) = result {
            if !self.poisoned {
                trace!(edit = self.edit, error = %e, "edit poisoned");
            }
            self.poisoned = true;
        }
        result
    }

    // -----------------------------------------------------------------------
    // Opening nodes
    // -----------------------------------------------------------------------

    pub fn open_root(&mut self) -> DeltaResult<DirBaton> {
        let result = self.open_root_inner();
        self.guard(result)
    }

    pub fn add_directory(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<DirBaton> {
        let result = self.child(parent.0, name, NodeKind::Directory, true);
        self.guard(result).map(DirBaton)
    }

    pub fn open_directory(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<DirBaton> {
        let result = self.child(parent.0, name, NodeKind::Directory, false);
        self.guard(result).map(DirBaton)
    }

    pub fn add_file(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<FileBaton> {
        let result = self.child(parent.0, name, NodeKind::File, true);
        self.guard(result).map(FileBaton)
    }

    pub fn open_file(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<FileBaton> {
        let result = self.child(parent.0, name, NodeKind::File, false);
        self.guard(result).map(FileBaton)
    }

    fn open_root_inner(&mut self) -> DeltaResult<DirBaton> {
        self.check_editable()?;
        if self.root.is_some() {
            return Err(DeltaError::ProtocolViolation(
                "open_root called more than once".into(),
            ));
        }
        let handle = self.push(NodeRecord {
            parent: None,
            path: RepoPath::root(),
            kind: NodeKind::Directory,
            added: false,
            open: true,
            open_children: 0,
            text_applied: false,
        });
        self.root = Some(handle);
        Ok(DirBaton(handle))
    }

    fn child(
        &mut self,
        parent: NodeHandle,
        name: &str,
        kind: NodeKind,
        added: bool,
    ) -> DeltaResult<NodeHandle> {
        self.check_editable()?;
        let path = self.child_path(parent, name)?;
        let handle = self.push(NodeRecord {
            parent: Some(parent),
            path,
            kind,
            added,
            open: true,
            open_children: 0,
            text_applied: false,
        });
        self.nodes[parent.index()].open_children += 1;
        Ok(handle)
    }

    fn push(&mut self, record: NodeRecord) -> NodeHandle {
        let handle = NodeHandle {
            edit: self.edit,
            index: self.nodes.len() as u32,
        };
        self.nodes.push(record);
        self.open_nodes += 1;
        handle
    }

    // -----------------------------------------------------------------------
    // Inspecting nodes
    // -----------------------------------------------------------------------

    /// Path of an open directory. Fails if the edit or the baton is dead.
    pub fn dir_path(&mut self, dir: &DirBaton) -> DeltaResult<RepoPath> {
        let result = self
            .check_editable()
            .and_then(|_| self.live(dir.0, NodeKind::Directory))
            .map(|record| record.path.clone());
        self.guard(result)
    }

    /// Path of an open file. Fails if the edit or the baton is dead.
    pub fn file_path(&mut self, file: &FileBaton) -> DeltaResult<RepoPath> {
        let result = self
            .check_editable()
            .and_then(|_| self.live(file.0, NodeKind::File))
            .map(|record| record.path.clone());
        self.guard(result)
    }

    /// Path of `name` under an open directory, for `delete_entry`.
    pub fn entry_path(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<RepoPath> {
        let result = self
            .check_editable()
            .and_then(|_| self.child_path(parent.0, name));
        self.guard(result)
    }

    /// Whether the node was introduced with `add_*` rather than `open_*`.
    pub fn is_added(&self, handle: NodeHandle) -> bool {
        self.nodes
            .get(handle.index())
            .is_some_and(|record| record.added)
    }

    /// Parent of a node, `None` for the root.
    pub fn parent_of(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.nodes.get(handle.index()).and_then(|record| record.parent)
    }

    /// Mark the start of a file's text delta. Allowed once per file.
    pub fn begin_text(&mut self, file: &FileBaton) -> DeltaResult<RepoPath> {
        let result = self.begin_text_inner(file.0);
        self.guard(result)
    }

    fn begin_text_inner(&mut self, handle: NodeHandle) -> DeltaResult<RepoPath> {
        self.check_editable()?;
        self.live(handle, NodeKind::File)?;
        let record = &mut self.nodes[handle.index()];
        if record.text_applied {
            return Err(DeltaError::ProtocolViolation(format!(
                "apply_text_delta called twice for {}",
                record.path
            )));
        }
        record.text_applied = true;
        Ok(record.path.clone())
    }

    fn child_path(&self, parent: NodeHandle, name: &str) -> DeltaResult<RepoPath> {
        let record = self.live(parent, NodeKind::Directory)?;
        validate_name(name)?;
        Ok(record.path.join(name)?)
    }

    fn live(&self, handle: NodeHandle, kind: NodeKind) -> DeltaResult<&NodeRecord> {
        if handle.edit != self.edit {
            return Err(DeltaError::ProtocolViolation(
                "baton belongs to a different edit".into(),
            ));
        }
        let record = self.nodes.get(handle.index()).ok_or_else(|| {
            DeltaError::ProtocolViolation(format!("unknown baton #{}", handle.index))
        })?;
        if record.kind != kind {
            return Err(DeltaError::ProtocolViolation(format!(
                "baton for {} is a {}, expected a {kind}",
                record.path, record.kind
            )));
        }
        if !record.open {
            return Err(DeltaError::ProtocolViolation(format!(
                "baton for {} used after close",
                record.path
            )));
        }
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Closing nodes and the edit
    // -----------------------------------------------------------------------

    pub fn close_directory(&mut self, dir: DirBaton) -> DeltaResult<RepoPath> {
        let result = self.close_node(dir.0, NodeKind::Directory);
        self.guard(result)
    }

    pub fn close_file(&mut self, file: FileBaton) -> DeltaResult<RepoPath> {
        let result = self.close_node(file.0, NodeKind::File);
        self.guard(result)
    }

    fn close_node(&mut self, handle: NodeHandle, kind: NodeKind) -> DeltaResult<RepoPath> {
        self.check_editable()?;
        let record = self.live(handle, kind)?;
        if record.open_children > 0 {
            return Err(DeltaError::ProtocolViolation(format!(
                "{} closed while {} child baton(s) are still open",
                record.path, record.open_children
            )));
        }
        let parent = record.parent;
        let path = record.path.clone();
        self.nodes[handle.index()].open = false;
        self.open_nodes -= 1;
        if let Some(parent) = parent {
            self.nodes[parent.index()].open_children -= 1;
        }
        Ok(path)
    }

    /// Finish the edit. Every baton must already be closed.
    pub fn close_edit(&mut self) -> DeltaResult<()> {
        let result = self.close_edit_inner();
        self.guard(result)
    }

    fn close_edit_inner(&mut self) -> DeltaResult<()> {
        self.check_editable()?;
        if self.open_nodes > 0 {
            return Err(DeltaError::ProtocolViolation(format!(
                "close_edit called with {} open baton(s)",
                self.open_nodes
            )));
        }
        self.state = EditState::Closed;
        Ok(())
    }

    /// Abandon the edit. Legal exactly once, and only while open.
    pub fn abort(&mut self) -> DeltaResult<()> {
        match self.state {
            EditState::Open => {
                self.state = EditState::Aborted;
                Ok(())
            }
            EditState::Closed => Err(DeltaError::ProtocolViolation(
                "abort_edit called after close_edit".into(),
            )),
            EditState::Aborted => Err(DeltaError::ProtocolViolation(
                "abort_edit called twice".into(),
            )),
        }
    }

    fn check_editable(&self) -> DeltaResult<()> {
        match self.state {
            EditState::Closed => Err(DeltaError::ProtocolViolation(
                "edit already closed".into(),
            )),
            EditState::Aborted => Err(DeltaError::ProtocolViolation(
                "edit already aborted".into(),
            )),
            EditState::Open if self.poisoned => Err(DeltaError::ProtocolViolation(
                "edit failed earlier; only abort_edit is allowed".into(),
            )),
            EditState::Open => Ok(()),
        }
    }
}

impl Default for BatonTree {
    fn default() -> Self {
        Self::new()
    }
}

//! The committing editor.
//!
//! Calls are buffered as transaction ops; nothing reaches the repository
//! until `close_edit`, which applies the ops as one revision under the
//! repository's write lock. Callbacks fire only after that.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::SecondsFormat;
use ra_core::{CommitCallbacks, CommitResultHandle, RaResult};
use ra_delta::{
    BatonTree, DeltaError, DeltaResult, DeltaWindow, DirBaton, EditState, Editor, FileBaton,
    TextApplier, WindowSink,
};
use ra_types::{Checksum, PropChange, RepoPath, Revision};
use tracing::{debug, info};
use uuid::Uuid;

use crate::host::RepositoryHost;
use crate::repository::{ChangeAction, MemRepository, RevisionInfo, Transaction, TxnOp};

/// Bookkeeping property: revision that last committed the path.
pub const PROP_COMMITTED_REV: &str = "ra:entry:committed-rev";
/// Bookkeeping property: RFC 3339 date of that commit.
pub const PROP_COMMITTED_DATE: &str = "ra:entry:committed-date";
/// Bookkeeping property: transaction id of that commit.
pub const PROP_TXN: &str = "ra:entry:txn";

/// Per-baton state the editor keeps beside the arena record.
#[derive(Debug, Default)]
struct NodeState {
    /// Declared base for opened nodes; `None` for added ones.
    base: Option<Revision>,
    base_text: Bytes,
    new_text: Option<Bytes>,
    props: Vec<PropChange>,
}

pub struct CommitEditor<'a> {
    repo: Arc<MemRepository>,
    host: Arc<RepositoryHost>,
    txn_id: Uuid,
    log_message: String,
    callbacks: CommitCallbacks<'a>,
    result: CommitResultHandle,
    batons: BatonTree,
    nodes: HashMap<usize, NodeState>,
    ops: Vec<TxnOp>,
}

impl<'a> CommitEditor<'a> {
    pub(crate) fn new(
        repo: Arc<MemRepository>,
        host: Arc<RepositoryHost>,
        log_message: &str,
        callbacks: CommitCallbacks<'a>,
    ) -> (Self, CommitResultHandle) {
        let result = CommitResultHandle::new();
        let txn_id = Uuid::now_v7();
        debug!(txn = %txn_id, "commit transaction started");
        let editor = Self {
            repo,
            host,
            txn_id,
            log_message: log_message.to_string(),
            callbacks,
            result: result.clone(),
            batons: BatonTree::new(),
            nodes: HashMap::new(),
            ops: Vec::new(),
        };
        (editor, result)
    }

    fn check_base(&self, path: &RepoPath, base: Revision) -> DeltaResult<()> {
        if base > self.repo.latest_revision() {
            return Err(DeltaError::Conflict {
                path: path.clone(),
                reason: format!("base revision {base} does not exist"),
            });
        }
        Ok(())
    }

    fn base_of(&self, dir: &DirBaton) -> Option<Revision> {
        self.nodes.get(&dir.handle().index()).and_then(|n| n.base)
    }

    // -----------------------------------------------------------------------
    // Fallible bodies; the trait methods pass their results through
    // `BatonTree::guard`.
    // -----------------------------------------------------------------------

    fn open_root_inner(&mut self, base: Option<Revision>) -> DeltaResult<DirBaton> {
        self.host.check_link()?;
        let root = self.batons.open_root()?;
        if let Some(base) = base {
            self.check_base(&RepoPath::root(), base)?;
        }
        self.nodes.insert(
            root.handle().index(),
            NodeState {
                base,
                ..NodeState::default()
            },
        );
        Ok(root)
    }

    fn open_directory_inner(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base: Revision,
    ) -> DeltaResult<DirBaton> {
        let dir = self.batons.open_directory(parent, name)?;
        let path = self.batons.dir_path(&dir)?;
        self.check_base(&path, base)?;
        self.ops.push(TxnOp::OpenDir { path });
        self.nodes.insert(
            dir.handle().index(),
            NodeState {
                base: Some(base),
                ..NodeState::default()
            },
        );
        Ok(dir)
    }

    fn open_file_inner(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base: Revision,
    ) -> DeltaResult<FileBaton> {
        let file = self.batons.open_file(parent, name)?;
        let path = self.batons.file_path(&file)?;
        self.check_base(&path, base)?;
        let base_text = self
            .repo
            .read_file(base, &path)
            .map_err(|_| DeltaError::NotFound(path.clone()))?;
        self.nodes.insert(
            file.handle().index(),
            NodeState {
                base: Some(base),
                base_text,
                ..NodeState::default()
            },
        );
        Ok(file)
    }

    fn close_file_inner(
        &mut self,
        file: FileBaton,
        result_checksum: Option<&Checksum>,
    ) -> DeltaResult<()> {
        let index = file.handle().index();
        let added = self.batons.is_added(file.handle());
        let path = self.batons.close_file(file)?;
        let state = self.nodes.remove(&index).unwrap_or_default();

        if let Some(expected) = result_checksum {
            let text = state.new_text.as_ref().unwrap_or(&state.base_text);
            let actual = Checksum::of(text);
            if actual != *expected {
                return Err(DeltaError::ChecksumMismatch {
                    path,
                    expected: *expected,
                    actual,
                });
            }
        }

        if added {
            self.ops.push(TxnOp::AddFile {
                path,
                content: state.new_text.unwrap_or_default(),
                props: state.props,
            });
        } else if state.new_text.is_some() || !state.props.is_empty() {
            self.ops.push(TxnOp::ModifyFile {
                path,
                base: state.base.unwrap_or_default(),
                content: state.new_text,
                props: state.props,
            });
        }
        Ok(())
    }

    fn close_edit_inner(&mut self) -> DeltaResult<RevisionInfo> {
        self.host.check_link()?;
        let txn = Transaction {
            txn_id: self.txn_id,
            log_message: std::mem::take(&mut self.log_message),
            ops: std::mem::take(&mut self.ops),
        };
        Ok(self.repo.commit(txn)?)
    }

    /// Post-commit notifications. The revision is already durable.
    fn notify(&mut self, info: &RevisionInfo) -> RaResult<()> {
        let date = info.date.to_rfc3339_opts(SecondsFormat::Micros, true);
        let rev = info.revision.get().to_string();
        let txn = info.txn_id.to_string();
        for changed in &info.changed_paths {
            if changed.action == ChangeAction::Deleted {
                continue;
            }
            if self.callbacks.wants_properties() {
                self.callbacks
                    .property_set(&changed.path, PROP_COMMITTED_REV, rev.as_bytes())?;
                self.callbacks
                    .property_set(&changed.path, PROP_COMMITTED_DATE, date.as_bytes())?;
                self.callbacks
                    .property_set(&changed.path, PROP_TXN, txn.as_bytes())?;
            }
            self.callbacks.path_closed(&changed.path, info.revision)?;
        }
        Ok(())
    }
}

impl Editor for CommitEditor<'_> {
    fn open_root(&mut self, base_revision: Option<Revision>) -> DeltaResult<DirBaton> {
        let result = self.open_root_inner(base_revision);
        self.batons.guard(result)
    }

    fn add_directory(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<DirBaton> {
        let dir = self.batons.add_directory(parent, name)?;
        let path = self.batons.dir_path(&dir)?;
        self.ops.push(TxnOp::AddDir { path });
        self.nodes.insert(dir.handle().index(), NodeState::default());
        Ok(dir)
    }

    fn open_directory(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base_revision: Revision,
    ) -> DeltaResult<DirBaton> {
        let result = self.open_directory_inner(parent, name, base_revision);
        self.batons.guard(result)
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()> {
        let path = self.batons.dir_path(dir)?;
        let base = if self.batons.is_added(dir.handle()) {
            None
        } else {
            self.base_of(dir)
        };
        let change = PropChange {
            name: name.to_string(),
            value: value.map(Bytes::copy_from_slice),
        };
        // Consecutive changes on one directory share an op.
        if let Some(TxnOp::DirProps {
            path: last,
            changes,
            ..
        }) = self.ops.last_mut()
        {
            if *last == path {
                changes.push(change);
                return Ok(());
            }
        }
        self.ops.push(TxnOp::DirProps {
            path,
            base,
            changes: vec![change],
        });
        Ok(())
    }

    fn close_directory(&mut self, dir: DirBaton) -> DeltaResult<()> {
        let index = dir.handle().index();
        self.batons.close_directory(dir)?;
        self.nodes.remove(&index);
        Ok(())
    }

    fn add_file(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<FileBaton> {
        let file = self.batons.add_file(parent, name)?;
        self.nodes.insert(file.handle().index(), NodeState::default());
        Ok(file)
    }

    fn open_file(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base_revision: Revision,
    ) -> DeltaResult<FileBaton> {
        let result = self.open_file_inner(parent, name, base_revision);
        self.batons.guard(result)
    }

    fn apply_text_delta<'s>(
        &'s mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> DeltaResult<Box<dyn WindowSink + 's>> {
        let path = self.batons.begin_text(file)?;
        let state = self.nodes.entry(file.handle().index()).or_default();
        if let Some(expected) = base_checksum {
            let actual = Checksum::of(&state.base_text);
            if actual != *expected {
                return self.batons.guard(Err(DeltaError::ChecksumMismatch {
                    path,
                    expected: *expected,
                    actual,
                }));
            }
        }
        Ok(Box::new(CommitSink {
            path,
            applier: TextApplier::new(state.base_text.clone()),
            slot: &mut state.new_text,
            batons: &mut self.batons,
        }))
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()> {
        self.batons.file_path(file)?;
        let state = self.nodes.entry(file.handle().index()).or_default();
        state.props.push(PropChange {
            name: name.to_string(),
            value: value.map(Bytes::copy_from_slice),
        });
        Ok(())
    }

    fn close_file(
        &mut self,
        file: FileBaton,
        result_checksum: Option<&Checksum>,
    ) -> DeltaResult<()> {
        let result = self.close_file_inner(file, result_checksum);
        self.batons.guard(result)
    }

    fn delete_entry(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<()> {
        let path = self.batons.entry_path(parent, name)?;
        let base = self.base_of(parent);
        self.ops.push(TxnOp::Delete { path, base });
        Ok(())
    }

    fn close_edit(&mut self) -> DeltaResult<()> {
        // Protocol errors first, so a refused commit leaves the edit open
        // for `abort_edit`.
        if self.batons.state() != EditState::Open
            || self.batons.is_poisoned()
            || self.batons.open_nodes() > 0
        {
            return self.batons.close_edit();
        }
        let result = self.close_edit_inner();
        let info = self.batons.guard(result)?;
        self.batons.close_edit()?;
        self.result.resolve(info.revision)?;
        info!(
            revision = %info.revision,
            paths = info.changed_paths.len(),
            "commit closed"
        );
        Ok(self.notify(&info)?)
    }

    fn abort_edit(&mut self) -> DeltaResult<()> {
        self.batons.abort()?;
        debug!(txn = %self.txn_id, ops = self.ops.len(), "commit aborted");
        self.ops.clear();
        self.nodes.clear();
        Ok(())
    }
}

struct CommitSink<'s> {
    path: RepoPath,
    applier: TextApplier,
    slot: &'s mut Option<Bytes>,
    batons: &'s mut BatonTree,
}

impl WindowSink for CommitSink<'_> {
    fn window(&mut self, window: &DeltaWindow) -> DeltaResult<()> {
        let result = self.applier.apply(window);
        self.batons.guard(result)
    }

    fn finish(self: Box<Self>) -> DeltaResult<()> {
        let this = *self;
        debug!(path = %this.path, windows = this.applier.windows(), "text received");
        *this.slot = Some(this.applier.finish());
        Ok(())
    }
}

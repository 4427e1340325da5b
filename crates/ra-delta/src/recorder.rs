//! A diagnostic editor that records the calls it receives.
//!
//! [`RecordingEditor`] keeps every call in order, with full paths, and logs
//! each one at `trace` level. Texts are rebuilt as the windows arrive: added
//! files against the empty text, opened files against a base registered
//! with [`RecordingEditor::with_base_text`] (or the empty text).

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use ra_types::{Checksum, RepoPath, Revision};
use tracing::trace;

use crate::baton::{BatonTree, DirBaton, EditState, FileBaton};
use crate::editor::{Editor, WindowSink};
use crate::error::{DeltaError, DeltaResult};
use crate::window::{DeltaWindow, TextApplier};

/// One recorded editor call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditorCall {
    OpenRoot {
        base_revision: Option<Revision>,
    },
    AddDirectory {
        path: RepoPath,
    },
    OpenDirectory {
        path: RepoPath,
        base_revision: Revision,
    },
    ChangeDirProp {
        path: RepoPath,
        name: String,
        value: Option<Bytes>,
    },
    CloseDirectory {
        path: RepoPath,
    },
    AddFile {
        path: RepoPath,
    },
    OpenFile {
        path: RepoPath,
        base_revision: Revision,
    },
    ApplyTextDelta {
        path: RepoPath,
        base_checksum: Option<Checksum>,
    },
    ChangeFileProp {
        path: RepoPath,
        name: String,
        value: Option<Bytes>,
    },
    CloseFile {
        path: RepoPath,
        result_checksum: Option<Checksum>,
    },
    DeleteEntry {
        path: RepoPath,
    },
    CloseEdit,
    AbortEdit,
}

impl EditorCall {
    /// `true` for calls that change the tree: adds, deletes, property
    /// changes and text deltas.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            EditorCall::AddDirectory { .. }
                | EditorCall::AddFile { .. }
                | EditorCall::DeleteEntry { .. }
                | EditorCall::ChangeDirProp { .. }
                | EditorCall::ChangeFileProp { .. }
                | EditorCall::ApplyTextDelta { .. }
        )
    }

    /// The node the call is about; `None` for edit-level calls.
    pub fn path(&self) -> Option<&RepoPath> {
        match self {
            EditorCall::AddDirectory { path }
            | EditorCall::OpenDirectory { path, .. }
            | EditorCall::ChangeDirProp { path, .. }
            | EditorCall::CloseDirectory { path }
            | EditorCall::AddFile { path }
            | EditorCall::OpenFile { path, .. }
            | EditorCall::ApplyTextDelta { path, .. }
            | EditorCall::ChangeFileProp { path, .. }
            | EditorCall::CloseFile { path, .. }
            | EditorCall::DeleteEntry { path } => Some(path),
            EditorCall::OpenRoot { .. } | EditorCall::CloseEdit | EditorCall::AbortEdit => None,
        }
    }
}

/// Records every call; optionally fails on a chosen path.
#[derive(Debug, Default)]
pub struct RecordingEditor {
    batons: BatonTree,
    calls: Vec<EditorCall>,
    base_texts: HashMap<RepoPath, Bytes>,
    texts: BTreeMap<RepoPath, Bytes>,
    fail_at: Option<RepoPath>,
}

impl RecordingEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the base text of a file that will be opened.
    pub fn with_base_text(mut self, path: RepoPath, text: impl Into<Bytes>) -> Self {
        self.base_texts.insert(path, text.into());
        self
    }

    /// Fail with `Cancelled` on the first call that touches `path`.
    pub fn fail_at(mut self, path: RepoPath) -> Self {
        self.fail_at = Some(path);
        self
    }

    pub fn calls(&self) -> &[EditorCall] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<EditorCall> {
        self.calls
    }

    /// Only the calls that change the tree.
    pub fn mutations(&self) -> Vec<&EditorCall> {
        self.calls.iter().filter(|c| c.is_mutation()).collect()
    }

    /// Every distinct path named by a call, in first-seen order.
    pub fn touched_paths(&self) -> Vec<RepoPath> {
        let mut seen = Vec::new();
        for path in self.calls.iter().filter_map(EditorCall::path) {
            if !seen.contains(path) {
                seen.push(path.clone());
            }
        }
        seen
    }

    /// Rebuilt text of a file that received a delta.
    pub fn text(&self, path: &RepoPath) -> Option<&Bytes> {
        self.texts.get(path)
    }

    pub fn state(&self) -> EditState {
        self.batons.state()
    }

    fn record(&mut self, call: EditorCall) -> DeltaResult<()> {
        trace!(?call, "editor call");
        let failing = match (&self.fail_at, call.path()) {
            (Some(target), Some(path)) => target == path,
            _ => false,
        };
        self.calls.push(call);
        if failing {
            let path = self.fail_at.clone().unwrap_or_default();
            return self
                .batons
                .guard(Err(DeltaError::Cancelled(format!("refusing {path}"))));
        }
        Ok(())
    }
}

impl Editor for RecordingEditor {
    fn open_root(&mut self, base_revision: Option<Revision>) -> DeltaResult<DirBaton> {
        let root = self.batons.open_root()?;
        self.record(EditorCall::OpenRoot { base_revision })?;
        Ok(root)
    }

    fn add_directory(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<DirBaton> {
        let dir = self.batons.add_directory(parent, name)?;
        let path = self.batons.dir_path(&dir)?;
        self.record(EditorCall::AddDirectory { path })?;
        Ok(dir)
    }

    fn open_directory(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base_revision: Revision,
    ) -> DeltaResult<DirBaton> {
        let dir = self.batons.open_directory(parent, name)?;
        let path = self.batons.dir_path(&dir)?;
        self.record(EditorCall::OpenDirectory {
            path,
            base_revision,
        })?;
        Ok(dir)
    }

    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()> {
        let path = self.batons.dir_path(dir)?;
        self.record(EditorCall::ChangeDirProp {
            path,
            name: name.to_string(),
            value: value.map(Bytes::copy_from_slice),
        })
    }

    fn close_directory(&mut self, dir: DirBaton) -> DeltaResult<()> {
        let path = self.batons.close_directory(dir)?;
        self.record(EditorCall::CloseDirectory { path })
    }

    fn add_file(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<FileBaton> {
        let file = self.batons.add_file(parent, name)?;
        let path = self.batons.file_path(&file)?;
        self.record(EditorCall::AddFile { path })?;
        Ok(file)
    }

    fn open_file(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base_revision: Revision,
    ) -> DeltaResult<FileBaton> {
        let file = self.batons.open_file(parent, name)?;
        let path = self.batons.file_path(&file)?;
        self.record(EditorCall::OpenFile {
            path,
            base_revision,
        })?;
        Ok(file)
    }

    fn apply_text_delta<'s>(
        &'s mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> DeltaResult<Box<dyn WindowSink + 's>> {
        let path = self.batons.begin_text(file)?;
        self.record(EditorCall::ApplyTextDelta {
            path: path.clone(),
            base_checksum: base_checksum.copied(),
        })?;
        let base = if self.batons.is_added(file.handle()) {
            Bytes::new()
        } else {
            self.base_texts.get(&path).cloned().unwrap_or_default()
        };
        Ok(Box::new(RecordingSink {
            path,
            applier: TextApplier::new(base),
            texts: &mut self.texts,
        }))
    }

    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()> {
        let path = self.batons.file_path(file)?;
        self.record(EditorCall::ChangeFileProp {
            path,
            name: name.to_string(),
            value: value.map(Bytes::copy_from_slice),
        })
    }

    fn close_file(
        &mut self,
        file: FileBaton,
        result_checksum: Option<&Checksum>,
    ) -> DeltaResult<()> {
        let path = self.batons.close_file(file)?;
        self.record(EditorCall::CloseFile {
            path,
            result_checksum: result_checksum.copied(),
        })
    }

    fn delete_entry(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<()> {
        let path = self.batons.entry_path(parent, name)?;
        self.record(EditorCall::DeleteEntry { path })
    }

    fn close_edit(&mut self) -> DeltaResult<()> {
        self.batons.close_edit()?;
        trace!(calls = self.calls.len(), "recorded edit closed");
        self.calls.push(EditorCall::CloseEdit);
        Ok(())
    }

    fn abort_edit(&mut self) -> DeltaResult<()> {
        self.batons.abort()?;
        self.calls.push(EditorCall::AbortEdit);
        Ok(())
    }
}

struct RecordingSink<'a> {
    path: RepoPath,
    applier: TextApplier,
    texts: &'a mut BTreeMap<RepoPath, Bytes>,
}

impl WindowSink for RecordingSink<'_> {
    fn window(&mut self, window: &DeltaWindow) -> DeltaResult<()> {
        trace!(path = %self.path, target_len = window.target_len, "delta window");
        self.applier.apply(window)
    }

    fn finish(self: Box<Self>) -> DeltaResult<()> {
        let this = *self;
        this.texts.insert(this.path, this.applier.finish());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::transmit_text;

    fn p(s: &str) -> RepoPath {
        RepoPath::parse(s).unwrap()
    }

    #[test]
    fn records_nested_drive() {
        let mut editor = RecordingEditor::new();
        let root = editor.open_root(Some(Revision::new(3))).unwrap();
        let trunk = editor.open_directory(&root, "trunk", Revision::new(3)).unwrap();
        let file = editor.add_file(&trunk, "NEW").unwrap();
        transmit_text(&mut editor, &file, None, b"hi", 16).unwrap();
        editor
            .close_file(file, Some(&Checksum::of(b"hi")))
            .unwrap();
        editor.delete_entry(&trunk, "old").unwrap();
        editor.close_directory(trunk).unwrap();
        editor.close_directory(root).unwrap();
        editor.close_edit().unwrap();

        assert_eq!(editor.text(&p("trunk/NEW")).unwrap().as_ref(), b"hi");
        assert_eq!(editor.mutations().len(), 3);
        assert_eq!(editor.calls().last(), Some(&EditorCall::CloseEdit));
        assert_eq!(
            editor.touched_paths(),
            vec![p("trunk"), p("trunk/NEW"), p("trunk/old"), RepoPath::root()]
        );
    }

    #[test]
    fn opened_file_rebuilds_against_registered_base() {
        let mut editor = RecordingEditor::new().with_base_text(p("f"), "hello world");
        let root = editor.open_root(None).unwrap();
        let file = editor.open_file(&root, "f", Revision::new(1)).unwrap();
        transmit_text(&mut editor, &file, Some(&b"hello world"[..]), b"hello there world", 8)
            .unwrap();
        editor.close_file(file, None).unwrap();
        editor.close_directory(root).unwrap();
        editor.close_edit().unwrap();
        assert_eq!(
            editor.text(&p("f")).unwrap().as_ref(),
            b"hello there world"
        );
    }

    #[test]
    fn fail_at_poisons_edit() {
        let mut editor = RecordingEditor::new().fail_at(p("bad"));
        let root = editor.open_root(None).unwrap();
        assert!(matches!(
            editor.add_file(&root, "bad"),
            Err(DeltaError::Cancelled(_))
        ));
        assert!(matches!(
            editor.add_file(&root, "good"),
            Err(DeltaError::ProtocolViolation(_))
        ));
        editor.abort_edit().unwrap();
        assert_eq!(editor.state(), EditState::Aborted);
        assert_eq!(editor.calls().last(), Some(&EditorCall::AbortEdit));
    }

    #[test]
    fn closing_parent_first_is_reported() {
        let mut editor = RecordingEditor::new();
        let root = editor.open_root(None).unwrap();
        let _child = editor.add_directory(&root, "a").unwrap();
        assert!(matches!(
            editor.close_directory(root),
            Err(DeltaError::ProtocolViolation(_))
        ));
    }
}

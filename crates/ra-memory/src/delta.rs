//! Driving client editors: full checkouts and minimal updates.
//!
//! An update is planned before anything is sent. Planning compares the
//! reported tree (each path at its effective report revision) with the
//! target tree; a subtree whose reported and target nodes are the same
//! version, with no report entries inside it, is skipped outright. Only
//! directories whose plan turned out non-empty are opened. A path the
//! report marks missing counts as absent on the reported side.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use ra_core::{RaError, RaResult, ReportTable};
use ra_delta::{transmit_text, DeltaResult, DirBaton, Editor};
use ra_types::{diff_props, PropChange, RepoPath, Revision};
use tracing::trace;

use crate::node::{DirNode, FileNode, Node};
use crate::repository::MemRepository;

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// Send `root` as a brand-new tree: every entry is added.
pub(crate) fn send_tree(
    editor: &mut dyn Editor,
    root: &DirNode,
    window_size: usize,
) -> DeltaResult<()> {
    let baton = editor.open_root(None)?;
    for (name, value) in &root.props {
        editor.change_dir_prop(&baton, name, Some(value))?;
    }
    for (name, node) in &root.entries {
        add_node(editor, &baton, name, node, window_size)?;
    }
    editor.close_directory(baton)?;
    editor.close_edit()
}

fn add_node(
    editor: &mut dyn Editor,
    parent: &DirBaton,
    name: &str,
    node: &Node,
    window_size: usize,
) -> DeltaResult<()> {
    match node {
        Node::Dir(dir) => {
            let baton = editor.add_directory(parent, name)?;
            for (prop, value) in &dir.props {
                editor.change_dir_prop(&baton, prop, Some(value))?;
            }
            for (child_name, child) in &dir.entries {
                add_node(editor, &baton, child_name, child, window_size)?;
            }
            editor.close_directory(baton)
        }
        Node::File(file) => {
            let baton = editor.add_file(parent, name)?;
            transmit_text(editor, &baton, None, &file.content, window_size)?;
            for (prop, value) in &file.props {
                editor.change_file_prop(&baton, prop, Some(value))?;
            }
            editor.close_file(baton, Some(&file.checksum))
        }
    }
}

// ---------------------------------------------------------------------------
// Update planning
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct DirPlan {
    props: Vec<PropChange>,
    children: Vec<(String, ChildPlan)>,
}

impl DirPlan {
    fn is_empty(&self) -> bool {
        self.props.is_empty() && self.children.is_empty()
    }

    /// Number of editor-visible changes in the plan.
    pub(crate) fn change_count(&self) -> usize {
        self.props.len()
            + self
                .children
                .iter()
                .map(|(_, child)| match child {
                    ChildPlan::OpenDir { plan, .. } => plan.change_count(),
                    _ => 1,
                })
                .sum::<usize>()
    }
}

#[derive(Debug)]
enum ChildPlan {
    Delete,
    Add(Node),
    /// Kind change or a node the report does not know: delete, then add.
    Replace(Node),
    OpenDir {
        base: Revision,
        plan: DirPlan,
    },
    OpenFile {
        base: Revision,
        base_text: Option<Bytes>,
        target: Arc<FileNode>,
        props: Vec<PropChange>,
    },
}

/// Plans an update of the reported tree towards one target revision.
pub(crate) struct UpdatePlanner<'r> {
    repo: &'r MemRepository,
    table: &'r ReportTable,
    root_path: RepoPath,
}

impl<'r> UpdatePlanner<'r> {
    pub(crate) fn new(repo: &'r MemRepository, table: &'r ReportTable) -> RaResult<Self> {
        let root_path = table
            .root_path()
            .cloned()
            .ok_or_else(|| RaError::ProtocolViolation("report finished before set_baseline".into()))?;
        Ok(Self {
            repo,
            table,
            root_path,
        })
    }

    /// The node the report claims to have at `rel`.
    fn reported_node(&self, rel: &RepoPath) -> RaResult<Option<Node>> {
        let revision = self.table.effective_revision(rel);
        let node = self.repo.lookup(revision, &self.root_path.join_path(rel))?;
        if let (Some(entry), Some(node)) = (self.table.entry(rel), node.as_ref()) {
            if entry.kind != node.kind() {
                return Err(RaError::ProtocolViolation(format!(
                    "{rel} reported as a {} but is a {} in {revision}",
                    entry.kind,
                    node.kind()
                )));
            }
        }
        Ok(node)
    }

    /// Plan the root. Returns the root's base revision and its plan.
    pub(crate) fn plan(&self, target: Revision) -> RaResult<(Revision, DirPlan)> {
        let root = RepoPath::root();
        let base = self.table.effective_revision(&root);
        let reported = match self.reported_node(&root)? {
            Some(Node::Dir(d)) => d,
            _ => {
                return Err(RaError::ProtocolViolation(format!(
                    "update root {} is not a directory in {base}",
                    self.root_path
                )))
            }
        };
        let wanted = match self.repo.lookup(target, &self.root_path)? {
            Some(Node::Dir(d)) => d,
            _ => {
                return Err(RaError::Delta(ra_delta::DeltaError::NotFound(
                    self.root_path.clone(),
                )))
            }
        };
        let plan = self.plan_dir(&root, &reported, &wanted)?;
        Ok((base, plan))
    }

    fn plan_dir(
        &self,
        rel: &RepoPath,
        reported: &Arc<DirNode>,
        target: &Arc<DirNode>,
    ) -> RaResult<DirPlan> {
        let mut plan = DirPlan {
            props: diff_props(&reported.props, &target.props),
            children: Vec::new(),
        };
        if Arc::ptr_eq(reported, target) && !self.table.has_overrides_below(rel) {
            return Ok(plan);
        }

        // Reported children: the reported directory's entries, plus names
        // that only exist through their own report entry.
        let overridden: Vec<RepoPath> = self
            .table
            .entries()
            .map(|(path, _)| path.clone())
            .filter(|path| path.parent().as_ref() == Some(rel))
            .collect();
        let mut names: BTreeSet<&str> = reported.entries.keys().map(String::as_str).collect();
        names.extend(target.entries.keys().map(String::as_str));
        for path in &overridden {
            if let Some(name) = path.name() {
                names.insert(name);
            }
        }

        for name in names {
            let child_rel = rel.join(name)?;
            let reported_child = if self.table.is_missing(&child_rel) {
                None
            } else if let Some(entry) = self.table.entry(&child_rel) {
                let node = self.reported_node(&child_rel)?;
                if node.is_none() {
                    return Err(RaError::ProtocolViolation(format!(
                        "{child_rel} reported at {}, where it does not exist",
                        entry.revision
                    )));
                }
                node
            } else {
                reported.entries.get(name).cloned()
            };
            let target_child = target.entries.get(name);
            if let Some(child) = self.plan_child(&child_rel, reported_child, target_child)? {
                plan.children.push((name.to_string(), child));
            }
        }
        Ok(plan)
    }

    fn plan_child(
        &self,
        rel: &RepoPath,
        reported: Option<Node>,
        target: Option<&Node>,
    ) -> RaResult<Option<ChildPlan>> {
        let plan = match (reported, target) {
            (None, None) => None,
            (Some(_), None) => Some(ChildPlan::Delete),
            (None, Some(node)) => Some(ChildPlan::Add(node.clone())),
            (Some(Node::Dir(old)), Some(Node::Dir(new))) => {
                let plan = self.plan_dir(rel, &old, new)?;
                (!plan.is_empty()).then(|| ChildPlan::OpenDir {
                    base: self.table.effective_revision(rel),
                    plan,
                })
            }
            (Some(Node::File(old)), Some(Node::File(new))) => {
                let props = diff_props(&old.props, &new.props);
                let text_changed = old.checksum != new.checksum;
                (text_changed || !props.is_empty()).then(|| ChildPlan::OpenFile {
                    base: self.table.effective_revision(rel),
                    base_text: text_changed.then(|| old.content.clone()),
                    target: Arc::clone(new),
                    props,
                })
            }
            (Some(_), Some(node)) => Some(ChildPlan::Replace(node.clone())),
        };
        if let Some(p) = &plan {
            trace!(path = %rel, plan = plan_name(p), "planned");
        }
        Ok(plan)
    }
}

fn plan_name(plan: &ChildPlan) -> &'static str {
    match plan {
        ChildPlan::Delete => "delete",
        ChildPlan::Add(_) => "add",
        ChildPlan::Replace(_) => "replace",
        ChildPlan::OpenDir { .. } => "open-dir",
        ChildPlan::OpenFile { .. } => "open-file",
    }
}

// ---------------------------------------------------------------------------
// Update emission
// ---------------------------------------------------------------------------

/// Drive `editor` through a planned update, including `close_edit`.
pub(crate) fn send_update(
    editor: &mut dyn Editor,
    base: Revision,
    plan: &DirPlan,
    window_size: usize,
) -> DeltaResult<()> {
    let root = editor.open_root(Some(base))?;
    emit_dir(editor, &root, plan, window_size)?;
    editor.close_directory(root)?;
    editor.close_edit()
}

fn emit_dir(
    editor: &mut dyn Editor,
    dir: &DirBaton,
    plan: &DirPlan,
    window_size: usize,
) -> DeltaResult<()> {
    for change in &plan.props {
        editor.change_dir_prop(dir, &change.name, change.value.as_deref())?;
    }
    for (name, child) in &plan.children {
        match child {
            ChildPlan::Delete => editor.delete_entry(dir, name)?,
            ChildPlan::Add(node) => add_node(editor, dir, name, node, window_size)?,
            ChildPlan::Replace(node) => {
                editor.delete_entry(dir, name)?;
                add_node(editor, dir, name, node, window_size)?;
            }
            ChildPlan::OpenDir { base, plan } => {
                let baton = editor.open_directory(dir, name, *base)?;
                emit_dir(editor, &baton, plan, window_size)?;
                editor.close_directory(baton)?;
            }
            ChildPlan::OpenFile {
                base,
                base_text,
                target,
                props,
            } => {
                let baton = editor.open_file(dir, name, *base)?;
                if let Some(base_text) = base_text {
                    transmit_text(editor, &baton, Some(base_text), &target.content, window_size)?;
                }
                for change in props {
                    editor.change_file_prop(&baton, &change.name, change.value.as_deref())?;
                }
                editor.close_file(baton, Some(&target.checksum))?;
            }
        }
    }
    Ok(())
}

//! Checkout, update and commit over a [`Session`].

use std::cell::RefCell;

use bytes::Bytes;
use ra_core::{CommitCallbacks, RaError, Session};
use ra_delta::DEFAULT_WINDOW_SIZE;
use ra_types::{RepoPath, Revision};
use tracing::{debug, info, warn};

use crate::driver::CommitDriver;
use crate::error::ClientResult;
use crate::patcher::TreePatcher;
use crate::plan::CommitPlan;
use crate::tree::WorkingTree;

/// Check out the subtree at `root_path`, at `revision` or the latest one.
pub fn checkout(
    session: &mut Session,
    root_path: &RepoPath,
    revision: Option<Revision>,
) -> ClientResult<WorkingTree> {
    let target = match revision {
        Some(r) => r,
        None => session.latest_revision()?,
    };
    let mut patcher = TreePatcher::new(WorkingTree::new(root_path.clone()), target);
    let revision = session.do_checkout(root_path, Some(target), &mut patcher)?;
    let tree = patcher.into_tree();
    info!(
        url = %session.url(),
        root = %root_path,
        %revision,
        nodes = tree.len(),
        "checked out"
    );
    Ok(tree)
}

/// Bring `tree` to the latest revision.
pub fn update(session: &mut Session, tree: &mut WorkingTree) -> ClientResult<Revision> {
    let target = session.latest_revision()?;
    update_to(session, tree, target)
}

/// Bring `tree` to `target`.
///
/// The tree is replaced only when the whole update succeeded; on error it
/// is left as it was.
pub fn update_to(
    session: &mut Session,
    tree: &mut WorkingTree,
    target: Revision,
) -> ClientResult<Revision> {
    let (low, high) = tree.revision_range();
    let mut patcher = TreePatcher::new(tree.clone(), target);
    let mut reporter = session.do_update(Some(target), &mut patcher)?;
    if let Err(e) = tree.report(reporter.as_mut()) {
        if let Err(abort) = reporter.abort_report() {
            warn!(error = %abort, "aborting update report failed");
        }
        return Err(e.into());
    }
    let revision = reporter.finish_report()?;
    *tree = patcher.into_tree();
    info!(
        url = %session.url(),
        from = %low,
        through = %high,
        to = %revision,
        "updated"
    );
    Ok(revision)
}

/// Commit `plan` against `tree` with `message`.
///
/// On success the plan is applied to `tree`: paths the backend reports as
/// committed move to the new revision and keep its bookkeeping properties;
/// everything else keeps its old revision, so the tree may become mixed.
/// Deleted paths are remembered so the next update reports them missing.
/// On error `tree` is untouched.
pub fn commit(
    session: &mut Session,
    tree: &mut WorkingTree,
    plan: &CommitPlan,
    message: &str,
) -> ClientResult<Revision> {
    let staged = plan.stage(tree)?;
    let driver = CommitDriver::new(tree, &staged.edits, DEFAULT_WINDOW_SIZE);
    let root_path = tree.root_path().clone();
    let next = RefCell::new(staged.tree);

    let callbacks = CommitCallbacks::new()
        .on_path_closed(|path, revision| {
            if let Some(rel) = path.strip_prefix(&root_path) {
                if let Some(node) = next.borrow_mut().get_mut(&rel) {
                    node.revision = revision;
                }
            }
            Ok(())
        })
        .on_property_set(|path, name, value| {
            if let Some(rel) = path.strip_prefix(&root_path) {
                if let Some(node) = next.borrow_mut().get_mut(&rel) {
                    node.entry_props
                        .insert(name.to_string(), Bytes::copy_from_slice(value));
                }
            }
            Ok(())
        });

    let (mut editor, handle) = session.commit_editor(message, callbacks)?;
    if let Err(e) = driver.drive(editor.as_mut()) {
        debug!(error = %e, "commit drive failed; aborting");
        if let Err(abort) = editor.abort_edit() {
            warn!(error = %abort, "aborting commit editor failed");
        }
        return Err(e);
    }
    drop(editor);

    let revision = handle.new_revision().ok_or_else(|| {
        RaError::ProtocolViolation("commit closed without a new revision".into())
    })?;
    let mut next = next.into_inner();
    for (path, edit) in &staged.edits {
        if edit.deleted && !next.contains(path) {
            next.mark_deleted(path.clone());
        }
    }
    *tree = next;
    info!(
        url = %session.url(),
        %revision,
        changes = plan.len(),
        "committed"
    );
    Ok(revision)
}

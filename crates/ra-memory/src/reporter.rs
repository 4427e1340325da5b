use std::sync::Arc;

use ra_core::{RaError, RaResult, ReportTable, Reporter};
use ra_delta::Editor;
use ra_types::{NodeKind, RepoPath, Revision};
use tracing::{debug, warn};

use crate::delta::{send_update, UpdatePlanner};
use crate::host::RepositoryHost;
use crate::repository::MemRepository;

/// Collects a report, then plans and sends the update in `finish_report`.
///
/// Once any call has failed the report is dead: later calls fail, and
/// `finish_report` only aborts the update editor.
pub struct MemReporter<'a> {
    repo: Arc<MemRepository>,
    host: Arc<RepositoryHost>,
    editor: &'a mut dyn Editor,
    target: Option<Revision>,
    window_size: usize,
    table: ReportTable,
    failed: bool,
}

impl<'a> MemReporter<'a> {
    pub(crate) fn new(
        repo: Arc<MemRepository>,
        host: Arc<RepositoryHost>,
        editor: &'a mut dyn Editor,
        target: Option<Revision>,
        window_size: usize,
    ) -> Self {
        Self {
            repo,
            host,
            editor,
            target,
            window_size,
            table: ReportTable::new(),
            failed: false,
        }
    }

    fn check(&self, revision: Revision) -> RaResult<()> {
        if self.failed {
            return Err(RaError::ProtocolViolation(
                "report already failed; only abort_report is allowed".into(),
            ));
        }
        self.host.check_link()?;
        if revision > self.repo.latest_revision() {
            return Err(RaError::NoSuchRevision(revision));
        }
        Ok(())
    }

    /// Record the outcome of a reporting call, killing the report on error.
    fn track(&mut self, result: RaResult<()>) -> RaResult<()> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn set(&mut self, path: &RepoPath, revision: Revision, kind: NodeKind) -> RaResult<()> {
        let result = self
            .check(revision)
            .and_then(|_| self.table.set(path.clone(), revision, kind));
        self.track(result)
    }

    fn run(&mut self) -> RaResult<Revision> {
        if self.failed {
            return Err(RaError::ProtocolViolation(
                "finish_report after a failed report call".into(),
            ));
        }
        self.host.check_link()?;
        let latest = self.repo.latest_revision();
        let target = self.target.unwrap_or(latest);
        if target > latest {
            return Err(RaError::NoSuchRevision(target));
        }

        let planner = UpdatePlanner::new(&self.repo, &self.table)?;
        let (base, plan) = planner.plan(target)?;
        debug!(
            %base,
            %target,
            overrides = self.table.entries().count(),
            changes = plan.change_count(),
            "update planned"
        );
        send_update(&mut *self.editor, base, &plan, self.window_size)?;
        Ok(target)
    }
}

impl Reporter for MemReporter<'_> {
    fn set_baseline(&mut self, revision: Revision, root_path: &RepoPath) -> RaResult<()> {
        let result = self
            .check(revision)
            .and_then(|_| self.table.set_baseline(revision, root_path.clone()));
        self.track(result)
    }

    fn set_directory(&mut self, path: &RepoPath, revision: Revision) -> RaResult<()> {
        self.set(path, revision, NodeKind::Directory)
    }

    fn set_file(&mut self, path: &RepoPath, revision: Revision) -> RaResult<()> {
        self.set(path, revision, NodeKind::File)
    }

    fn delete_path(&mut self, path: &RepoPath) -> RaResult<()> {
        let result = self
            .check(Revision::ZERO)
            .and_then(|_| self.table.set_missing(path.clone()));
        self.track(result)
    }

    fn finish_report(mut self: Box<Self>) -> RaResult<Revision> {
        match self.run() {
            Ok(target) => Ok(target),
            Err(e) => {
                if let Err(abort) = self.editor.abort_edit() {
                    warn!(error = %abort, "aborting update editor failed");
                }
                Err(e)
            }
        }
    }

    fn abort_report(self: Box<Self>) -> RaResult<()> {
        debug!("update report aborted");
        Ok(self.editor.abort_edit()?)
    }
}

use ra_delta::Editor;
use ra_types::{RepoPath, Revision};
use tracing::{debug, info, warn};

use crate::backend::BackendSession;
use crate::commit::{CommitCallbacks, CommitResultHandle};
use crate::error::{RaError, RaResult};
use crate::registry::BackendRegistry;
use crate::report::Reporter;
use crate::repo_url::RepoUrl;

/// One sequential conversation with one repository through one backend.
///
/// Operations take `&mut self` and the editors and reporters they return
/// borrow the session, so calls cannot overlap. Open as many sessions as
/// needed for parallel work.
pub struct Session {
    url: RepoUrl,
    backend_name: String,
    inner: Option<Box<dyn BackendSession>>,
}

impl Session {
    /// Resolve the backend for `url` and connect.
    pub fn open(registry: &BackendRegistry, url: &str) -> RaResult<Self> {
        let url = RepoUrl::parse(url)?;
        let backend = registry.select(&url)?;
        let backend_name = backend.descriptor().name.clone();
        let inner = backend.open(&url)?;
        info!(url = %url, backend = %backend_name, "session opened");
        Ok(Self {
            url,
            backend_name,
            inner: Some(inner),
        })
    }

    pub fn url(&self) -> &RepoUrl {
        &self.url
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the backend connection. A second call is `UseAfterClose`.
    pub fn close(&mut self) -> RaResult<()> {
        let mut inner = self.inner.take().ok_or(RaError::UseAfterClose)?;
        inner.close()?;
        info!(url = %self.url, "session closed");
        Ok(())
    }

    pub fn latest_revision(&mut self) -> RaResult<Revision> {
        let revision = self.backend()?.latest_revision()?;
        debug!(url = %self.url, %revision, "latest revision");
        Ok(revision)
    }

    /// Begin a commit. The result handle is filled once `close_edit` on the
    /// returned editor succeeds.
    pub fn commit_editor<'a>(
        &'a mut self,
        log_message: &str,
        callbacks: CommitCallbacks<'a>,
    ) -> RaResult<(Box<dyn Editor + 'a>, CommitResultHandle)> {
        self.backend()?.commit_editor(log_message, callbacks)
    }

    /// Stream the subtree at `root_path` into `editor`. Returns the revision
    /// checked out.
    pub fn do_checkout(
        &mut self,
        root_path: &RepoPath,
        revision: Option<Revision>,
        editor: &mut dyn Editor,
    ) -> RaResult<Revision> {
        self.backend()?.do_checkout(root_path, revision, editor)
    }

    /// Begin a two-phase update into `editor`.
    pub fn do_update<'a>(
        &'a mut self,
        revision: Option<Revision>,
        editor: &'a mut dyn Editor,
    ) -> RaResult<Box<dyn Reporter + 'a>> {
        self.backend()?.do_update(revision, editor)
    }

    fn backend(&mut self) -> RaResult<&mut (dyn BackendSession + 'static)> {
        self.inner.as_deref_mut().ok_or(RaError::UseAfterClose)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Err(e) = inner.close() {
                warn!(url = %self.url, error = %e, "closing dropped session failed");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.url)
            .field("backend", &self.backend_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use ra_delta::RecordingEditor;

    use super::*;
    use crate::backend::{BackendDescriptor, RaBackend};
    use crate::abi::RA_ABI_VERSION;

    struct Counting {
        descriptor: BackendDescriptor,
        closes: Arc<AtomicUsize>,
    }

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    impl RaBackend for Counting {
        fn descriptor(&self) -> &BackendDescriptor {
            &self.descriptor
        }

        fn open(&self, _url: &RepoUrl) -> RaResult<Box<dyn BackendSession>> {
            Ok(Box::new(CountingSession {
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    impl BackendSession for CountingSession {
        fn latest_revision(&mut self) -> RaResult<Revision> {
            Ok(Revision::new(42))
        }

        fn commit_editor<'a>(
            &'a mut self,
            _log_message: &str,
            _callbacks: CommitCallbacks<'a>,
        ) -> RaResult<(Box<dyn Editor + 'a>, CommitResultHandle)> {
            Ok((Box::new(RecordingEditor::new()), CommitResultHandle::new()))
        }

        fn do_checkout(
            &mut self,
            _root_path: &RepoPath,
            _revision: Option<Revision>,
            _editor: &mut dyn Editor,
        ) -> RaResult<Revision> {
            Ok(Revision::ZERO)
        }

        fn do_update<'a>(
            &'a mut self,
            _revision: Option<Revision>,
            _editor: &'a mut dyn Editor,
        ) -> RaResult<Box<dyn Reporter + 'a>> {
            Err(RaError::TransportError("not supported".into()))
        }

        fn close(&mut self) -> RaResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry(closes: &Arc<AtomicUsize>) -> BackendRegistry {
        BackendRegistry::builder()
            .register(Counting {
                descriptor: BackendDescriptor::new("counting", "test", RA_ABI_VERSION)
                    .with_scheme("count"),
                closes: Arc::clone(closes),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn calls_after_close_fail() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = registry(&closes);
        let mut session = Session::open(&registry, "count://host/repo").unwrap();
        assert_eq!(session.backend_name(), "counting");
        assert_eq!(session.latest_revision().unwrap(), Revision::new(42));

        session.close().unwrap();
        assert!(session.is_closed());
        assert_eq!(session.close(), Err(RaError::UseAfterClose));
        assert_eq!(session.latest_revision(), Err(RaError::UseAfterClose));
        assert!(matches!(
            session.commit_editor("msg", CommitCallbacks::new()),
            Err(RaError::UseAfterClose)
        ));
        drop(session);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_open_session() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = registry(&closes);
        {
            let _session = Session::open(&registry, "count://host/repo").unwrap();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_reports_bad_urls_and_schemes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = registry(&closes);
        assert!(matches!(
            Session::open(&registry, "::"),
            Err(RaError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Session::open(&registry, "http://host/repo"),
            Err(RaError::NoBackendForScheme(_))
        ));
    }
}

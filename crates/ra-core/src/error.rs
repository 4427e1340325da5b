use ra_delta::DeltaError;
use ra_types::{RepoPath, Revision, TypeError};

use crate::abi::AbiVersion;

/// Errors surfaced by the repository access layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaError {
    /// No registered backend understands the URL's scheme.
    #[error("no backend registered for scheme '{0}'")]
    NoBackendForScheme(String),

    /// The selected backend cannot serve the requested ABI.
    #[error("backend '{backend}' implements ABI {supported}, cannot serve {requested}")]
    IncompatibleVersion {
        backend: String,
        requested: AbiVersion,
        supported: AbiVersion,
    },

    /// The backend could not establish a connection.
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The backend is reachable but has no repository at the URL.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// A session was used after `close`.
    #[error("session used after close")]
    UseAfterClose,

    /// Out-of-order or foreign editor/reporter call.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A live connection failed mid-operation.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The commit is out of date against the repository.
    #[error("commit conflict at {path}: {reason}")]
    CommitConflict { path: RepoPath, reason: String },

    /// The repository could not make a change durable.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// The requested revision does not exist yet.
    #[error("no such revision: {0}")]
    NoSuchRevision(Revision),

    #[error("invalid repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Checksum, window, path, or cancellation errors from an editor.
    #[error(transparent)]
    Delta(DeltaError),
}

impl RaError {
    /// `true` when repeating the whole commit against a fresh base may
    /// succeed. Nothing in this workspace retries automatically.
    pub fn is_retryable_commit(&self) -> bool {
        matches!(self, RaError::CommitConflict { .. })
    }
}

impl From<DeltaError> for RaError {
    fn from(err: DeltaError) -> Self {
        match err {
            DeltaError::ProtocolViolation(msg) => RaError::ProtocolViolation(msg),
            DeltaError::Conflict { path, reason } => RaError::CommitConflict { path, reason },
            DeltaError::Storage(msg) => RaError::StorageFailure(msg),
            DeltaError::Transport(msg) => RaError::TransportError(msg),
            other => RaError::Delta(other),
        }
    }
}

impl From<TypeError> for RaError {
    fn from(err: TypeError) -> Self {
        RaError::Delta(DeltaError::Type(err))
    }
}

/// Callback errors travel back through editor calls as [`DeltaError`]s.
impl From<RaError> for DeltaError {
    fn from(err: RaError) -> Self {
        match err {
            RaError::ProtocolViolation(msg) => DeltaError::ProtocolViolation(msg),
            RaError::CommitConflict { path, reason } => DeltaError::Conflict { path, reason },
            RaError::StorageFailure(msg) => DeltaError::Storage(msg),
            RaError::TransportError(msg) => DeltaError::Transport(msg),
            RaError::Delta(inner) => inner,
            other => DeltaError::Cancelled(other.to_string()),
        }
    }
}

/// Result alias for repository access operations.
pub type RaResult<T> = Result<T, RaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_errors_keep_their_kind() {
        let path = RepoPath::parse("trunk/a").unwrap();
        assert_eq!(
            RaError::from(DeltaError::Conflict {
                path: path.clone(),
                reason: "out of date".into()
            }),
            RaError::CommitConflict {
                path,
                reason: "out of date".into()
            }
        );
        assert!(matches!(
            RaError::from(DeltaError::ProtocolViolation("x".into())),
            RaError::ProtocolViolation(_)
        ));
        assert!(matches!(
            RaError::from(DeltaError::InvalidWindow("x".into())),
            RaError::Delta(DeltaError::InvalidWindow(_))
        ));
    }

    #[test]
    fn round_trip_through_delta_error() {
        let err = RaError::StorageFailure("disk full".into());
        assert_eq!(RaError::from(DeltaError::from(err.clone())), err);
        assert!(matches!(
            DeltaError::from(RaError::UseAfterClose),
            DeltaError::Cancelled(_)
        ));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = RaError::CommitConflict {
            path: RepoPath::root(),
            reason: "stale".into(),
        };
        assert!(conflict.is_retryable_commit());
        assert!(!RaError::TransportError("reset".into()).is_retryable_commit());
    }
}

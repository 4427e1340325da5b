use ra_core::RaError;
use ra_delta::DeltaError;
use ra_types::{RepoPath, TypeError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Ra(#[from] RaError),

    #[error("invalid commit plan: {0}")]
    InvalidPlan(String),

    #[error("not in working tree: {0}")]
    NotFound(RepoPath),
}

impl ClientError {
    /// `true` when updating and re-running the commit may succeed.
    pub fn is_retryable_commit(&self) -> bool {
        matches!(self, ClientError::Ra(e) if e.is_retryable_commit())
    }
}

impl From<DeltaError> for ClientError {
    fn from(err: DeltaError) -> Self {
        ClientError::Ra(err.into())
    }
}

impl From<TypeError> for ClientError {
    fn from(err: TypeError) -> Self {
        ClientError::Ra(err.into())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

//! Error types for the editor protocol.

use ra_types::{Checksum, RepoPath, TypeError};

/// Errors raised by editor calls and text-delta application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    /// Out-of-order, duplicate, or foreign baton/finalization call.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A node named by the driver does not exist on the consumer side.
    #[error("no such node: {0}")]
    NotFound(RepoPath),

    /// Text did not match the checksum declared for it.
    #[error("checksum mismatch for {path}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        path: RepoPath,
        expected: Checksum,
        actual: Checksum,
    },

    /// A delta window references data outside its views.
    #[error("invalid delta window: {0}")]
    InvalidWindow(String),

    /// The consumer rejects the change because its state moved on.
    #[error("conflict at {path}: {reason}")]
    Conflict { path: RepoPath, reason: String },

    /// The consumer could not make the edit durable.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The connection carrying the edit failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A callback asked for the edit to stop.
    #[error("edit cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Convenience alias for editor results.
pub type DeltaResult<T> = Result<T, DeltaError>;

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid revision: {0}")]
    InvalidRevision(String),
}

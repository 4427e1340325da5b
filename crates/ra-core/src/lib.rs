//! Repository access contract.
//!
//! A client reaches a versioned tree store through a [`Session`], opened
//! against a URL whose scheme selects a backend from the
//! [`BackendRegistry`]. Every data exchange is a tree-delta drive over the
//! [`ra_delta::Editor`] protocol:
//!
//! - **Commit**: the caller drives the backend's editor; `close_edit` makes
//!   the whole edit one new revision.
//! - **Checkout**: the backend drives the caller's editor with a full tree.
//! - **Update**: the caller describes what it has through a [`Reporter`];
//!   `finish_report` makes the backend drive the caller's editor with only
//!   the differences.

pub mod abi;
pub mod backend;
pub mod commit;
pub mod config;
pub mod error;
pub mod registry;
pub mod repo_url;
pub mod report;
pub mod session;

pub use abi::{AbiVersion, RA_ABI_VERSION};
pub use backend::{BackendDescriptor, BackendSession, RaBackend};
pub use commit::{CommitCallbacks, CommitResultHandle};
pub use config::RaConfig;
pub use error::{RaError, RaResult};
pub use registry::{BackendRegistry, RegistryBuilder};
pub use repo_url::RepoUrl;
pub use report::{ReportEntry, ReportTable, Reporter};
pub use session::Session;

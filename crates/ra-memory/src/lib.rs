//! In-process repository access backend.
//!
//! Repositories live on named [`RepositoryHost`]s and keep every revision
//! as an immutable, structurally shared tree. The backend serves the full
//! session contract (commit, checkout, update) and can inject faults: an
//! unreachable host, or a read-only repository.
//!
//! ```no_run
//! use ra_core::{BackendRegistry, Session};
//! use ra_memory::MemoryBackend;
//!
//! let backend = MemoryBackend::new();
//! backend.create_repository("host", "proj").unwrap();
//! let registry = BackendRegistry::builder()
//!     .register(backend.clone())
//!     .build()
//!     .unwrap();
//! let mut session = Session::open(&registry, "memory://host/proj").unwrap();
//! assert_eq!(session.latest_revision().unwrap().get(), 0);
//! ```

pub mod backend;
pub mod commit;
mod delta;
pub mod host;
pub mod node;
pub mod reporter;
pub mod repository;

pub use backend::{MemSession, MemoryBackend, DEFAULT_HOST, MEMORY_SCHEME};
pub use commit::{CommitEditor, PROP_COMMITTED_DATE, PROP_COMMITTED_REV, PROP_TXN};
pub use host::RepositoryHost;
pub use node::{DirNode, FileNode, Node};
pub use reporter::MemReporter;
pub use repository::{ChangeAction, ChangedPath, MemRepository, RevisionInfo};

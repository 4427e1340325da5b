//! Foundation types for the repository access (RA) layer.
//!
//! Every other `ra-*` crate depends on `ra-types`. Nothing here knows about
//! sessions, editors or backends; these are the values that flow through
//! them.
//!
//! # Key Types
//!
//! - [`Revision`]: Monotonic repository revision number
//! - [`RepoPath`]: Canonical `/`-separated path inside a repository
//! - [`Checksum`]: BLAKE3 digest of a file's full text
//! - [`NodeKind`]: File or directory
//! - [`PropMap`] / [`PropChange`]: Versioned node properties and their edits

pub mod checksum;
pub mod error;
pub mod node;
pub mod path;
pub mod props;
pub mod revision;

pub use checksum::Checksum;
pub use error::TypeError;
pub use node::NodeKind;
pub use path::{validate_name, RepoPath};
pub use props::{diff_props, apply_prop_change, PropChange, PropMap};
pub use revision::Revision;

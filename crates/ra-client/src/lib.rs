//! Reference client for the repository access layer.
//!
//! Everything a client needs on its side of a [`ra_core::Session`]:
//!
//! - [`WorkingTree`]: local copy of a repository subtree, each node
//!   tagged with the revision it was last brought to
//! - [`TreePatcher`]: the consuming [`ra_delta::Editor`] for checkouts and
//!   updates; effects are staged and land only on `close_edit`
//! - [`CommitPlan`]: a list of local changes, driven into a commit editor
//!   with correct nesting
//! - [`checkout`], [`update`], [`commit`]: the workflows tying them
//!   together

mod driver;
pub mod error;
pub mod patcher;
pub mod plan;
pub mod tree;
pub mod workflow;

pub use error::{ClientError, ClientResult};
pub use patcher::TreePatcher;
pub use plan::{Change, CommitPlan};
pub use tree::{WorkingNode, WorkingTree};
pub use workflow::{checkout, commit, update, update_to};

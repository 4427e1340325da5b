//! Tree-delta editor protocol.
//!
//! An [`Editor`] is the one streaming interface every repository-access
//! workflow is built from: a commit uploads a tree delta through a backend's
//! editor, a checkout or update downloads one into the client's editor. The
//! protocol is direction-agnostic; what differs is who drives and who
//! consumes.
//!
//! # Protocol Rules
//!
//! 1. Batons nest strictly: a node is closed before its parent.
//! 2. `delete_entry` names a child of an open directory; it has no baton.
//! 3. A property change with no value removes the property.
//! 4. Only `close_edit` may have durable effect. `abort_edit`, or any error
//!    returned mid-stream, discards everything buffered so far.
//! 5. After an error the only legal call is `abort_edit`.
//! 6. File text arrives as an ordered sequence of [`DeltaWindow`]s that the
//!    consumer applies sequentially against the declared base.
//!
//! Every editor in the workspace enforces rules 1, 2 and 5 by embedding a
//! [`BatonTree`].

pub mod baton;
pub mod editor;
pub mod error;
pub mod recorder;
pub mod text;
pub mod window;

pub use baton::{BatonTree, DirBaton, EditState, FileBaton, NodeHandle};
pub use editor::{Editor, WindowSink};
pub use error::{DeltaError, DeltaResult};
pub use recorder::{EditorCall, RecordingEditor};
pub use text::{delta_windows, send_windows, transmit_text, DEFAULT_WINDOW_SIZE};
pub use window::{DeltaOp, DeltaWindow, TextApplier};

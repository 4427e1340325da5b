//! The [`Editor`] trait and its text-delta sink.

use ra_types::{Checksum, Revision};

use crate::baton::{DirBaton, FileBaton};
use crate::error::DeltaResult;
use crate::window::DeltaWindow;

/// Consumer of a hierarchical tree delta.
///
/// The same trait serves commit upload, checkout download, and update
/// download. Implementations must uphold:
///
/// - Batons nest strictly; closing a node with open children, or using a
///   closed baton, is a `ProtocolViolation`.
/// - Nothing reaches durable state before `close_edit` succeeds.
/// - After any error every call except `abort_edit` fails, and the driver
///   must call `abort_edit` exactly once.
/// - `close_edit` and `abort_edit` are mutually exclusive and each may
///   happen at most once.
pub trait Editor {
    /// Open the root of the edit. `base_revision` is the revision the
    /// driver believes the root is at (`None` when it has no base, as in a
    /// checkout).
    fn open_root(&mut self, base_revision: Option<Revision>) -> DeltaResult<DirBaton>;

    fn add_directory(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<DirBaton>;

    fn open_directory(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base_revision: Revision,
    ) -> DeltaResult<DirBaton>;

    /// Set (`Some`) or remove (`None`) a directory property.
    fn change_dir_prop(
        &mut self,
        dir: &DirBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()>;

    fn close_directory(&mut self, dir: DirBaton) -> DeltaResult<()>;

    fn add_file(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<FileBaton>;

    fn open_file(
        &mut self,
        parent: &DirBaton,
        name: &str,
        base_revision: Revision,
    ) -> DeltaResult<FileBaton>;

    /// Start receiving new text for a file.
    ///
    /// `base_checksum` identifies the text the windows apply to; `None`
    /// means the empty text. The returned sink borrows the editor, so no
    /// other call can interleave until it is finished or dropped. Dropping
    /// the sink without `finish` leaves the file text unchanged.
    fn apply_text_delta<'s>(
        &'s mut self,
        file: &FileBaton,
        base_checksum: Option<&Checksum>,
    ) -> DeltaResult<Box<dyn WindowSink + 's>>;

    /// Set (`Some`) or remove (`None`) a file property.
    fn change_file_prop(
        &mut self,
        file: &FileBaton,
        name: &str,
        value: Option<&[u8]>,
    ) -> DeltaResult<()>;

    /// Close a file. `result_checksum`, when given, is verified against the
    /// file's final text.
    fn close_file(&mut self, file: FileBaton, result_checksum: Option<&Checksum>)
        -> DeltaResult<()>;

    /// Remove the entry `name` from an open directory.
    fn delete_entry(&mut self, parent: &DirBaton, name: &str) -> DeltaResult<()>;

    /// Finish the edit and make it durable as a unit.
    fn close_edit(&mut self) -> DeltaResult<()>;

    /// Abandon the edit, discarding everything buffered.
    fn abort_edit(&mut self) -> DeltaResult<()>;
}

/// Receiver for the delta windows of one file.
pub trait WindowSink {
    /// Apply the next window, in order.
    fn window(&mut self, window: &DeltaWindow) -> DeltaResult<()>;

    /// End of the window stream; the text is complete.
    fn finish(self: Box<Self>) -> DeltaResult<()>;
}

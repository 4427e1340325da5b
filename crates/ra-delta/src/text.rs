//! Producing text deltas.
//!
//! Uses the `similar` crate (Myers diff over bytes) to find the runs of the
//! target that already exist in the base, then cuts the result into
//! windows of at most `window_size` target bytes.

use bytes::Bytes;
use ra_types::Checksum;
use similar::{capture_diff_slices, Algorithm, DiffOp};

use crate::baton::FileBaton;
use crate::editor::{Editor, WindowSink};
use crate::error::DeltaResult;
use crate::window::{DeltaOp, DeltaWindow};

/// Default number of target bytes per window.
pub const DEFAULT_WINDOW_SIZE: usize = 100 * 1024;

/// Equal runs shorter than this are sent as new data; a copy instruction
/// would not be smaller.
const MIN_COPY_LEN: usize = 4;

#[derive(Clone, Copy, Debug)]
enum Segment {
    Copy { source: usize, len: usize },
    New { start: usize, len: usize },
}

impl Segment {
    fn len(&self) -> usize {
        match *self {
            Segment::Copy { len, .. } | Segment::New { len, .. } => len,
        }
    }

    /// The first `n` bytes of this segment, and the rest.
    fn split(self, n: usize) -> (Segment, Option<Segment>) {
        if n >= self.len() {
            return (self, None);
        }
        match self {
            Segment::Copy { source, len } => (
                Segment::Copy { source, len: n },
                Some(Segment::Copy {
                    source: source + n,
                    len: len - n,
                }),
            ),
            Segment::New { start, len } => (
                Segment::New { start, len: n },
                Some(Segment::New {
                    start: start + n,
                    len: len - n,
                }),
            ),
        }
    }
}

/// Append new data, merging with a directly preceding new-data segment.
fn push_new(out: &mut Vec<Segment>, start: usize, len: usize) {
    if len == 0 {
        return;
    }
    if let Some(Segment::New { start: s, len: l }) = out.last_mut() {
        if *s + *l == start {
            *l += len;
            return;
        }
    }
    out.push(Segment::New { start, len });
}

fn segments(base: &[u8], target: &[u8]) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::new();
    if base.is_empty() {
        push_new(&mut out, 0, target.len());
        return out;
    }

    for op in capture_diff_slices(Algorithm::Myers, base, target) {
        match op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => {
                if len < MIN_COPY_LEN {
                    push_new(&mut out, new_index, len);
                } else {
                    out.push(Segment::Copy {
                        source: old_index,
                        len,
                    });
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            }
            | DiffOp::Replace {
                new_index, new_len, ..
            } => push_new(&mut out, new_index, new_len),
            DiffOp::Delete { .. } => {}
        }
    }
    out
}

#[derive(Default)]
struct WindowBuilder {
    pieces: Vec<Segment>,
    target_len: usize,
}

impl WindowBuilder {
    fn push(&mut self, piece: Segment) {
        self.target_len += piece.len();
        self.pieces.push(piece);
    }

    fn build(self, target: &[u8]) -> DeltaWindow {
        let (mut lo, mut hi) = (usize::MAX, 0usize);
        for piece in &self.pieces {
            if let Segment::Copy { source, len } = *piece {
                lo = lo.min(source);
                hi = hi.max(source + len);
            }
        }
        let source_offset = if lo == usize::MAX { 0 } else { lo };
        let source_len = hi.saturating_sub(source_offset);

        let mut ops = Vec::with_capacity(self.pieces.len());
        let mut new_data = Vec::new();
        for piece in self.pieces {
            match piece {
                Segment::Copy { source, len } => ops.push(DeltaOp::CopySource {
                    offset: source - source_offset,
                    len,
                }),
                Segment::New { start, len } => {
                    ops.push(DeltaOp::NewData {
                        offset: new_data.len(),
                        len,
                    });
                    new_data.extend_from_slice(&target[start..start + len]);
                }
            }
        }
        DeltaWindow {
            source_offset,
            source_len,
            target_len: self.target_len,
            ops,
            new_data: Bytes::from(new_data),
        }
    }
}

/// Compute the windows that turn `base` into `target`.
///
/// An empty target yields no windows. A `window_size` of 0 is treated as
/// [`DEFAULT_WINDOW_SIZE`].
pub fn delta_windows(base: &[u8], target: &[u8], window_size: usize) -> Vec<DeltaWindow> {
    let window_size = if window_size == 0 {
        DEFAULT_WINDOW_SIZE
    } else {
        window_size
    };

    let mut windows = Vec::new();
    let mut builder = WindowBuilder::default();
    for segment in segments(base, target) {
        let mut rest = Some(segment);
        while let Some(segment) = rest {
            let room = window_size - builder.target_len;
            let (head, tail) = segment.split(room);
            builder.push(head);
            rest = tail;
            if builder.target_len == window_size {
                windows.push(std::mem::take(&mut builder).build(target));
            }
        }
    }
    if builder.target_len > 0 {
        windows.push(builder.build(target));
    }
    windows
}

/// Push every window into `sink`, then finish it.
pub fn send_windows(mut sink: Box<dyn WindowSink + '_>, windows: &[DeltaWindow]) -> DeltaResult<()> {
    for window in windows {
        sink.window(window)?;
    }
    sink.finish()
}

/// Send the text of an open file as a delta against `base`.
///
/// `base: None` means the file has no prior text (an add); the delta is
/// then computed against the empty text and no base checksum is declared.
pub fn transmit_text(
    editor: &mut dyn Editor,
    file: &FileBaton,
    base: Option<&[u8]>,
    target: &[u8],
    window_size: usize,
) -> DeltaResult<()> {
    let base_checksum = base.map(Checksum::of);
    let windows = delta_windows(base.unwrap_or_default(), target, window_size);
    let sink = editor.apply_text_delta(file, base_checksum.as_ref())?;
    send_windows(sink, &windows)
}

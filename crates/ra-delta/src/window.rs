//! Delta windows and their application.
//!
//! A window rebuilds one contiguous slice of the target text from three
//! inputs: a view into the base text (`source_offset..+source_len`), the
//! target bytes the window has produced so far, and the window's own new
//! data. Windows are applied strictly in order; the target is the
//! concatenation of every window's output.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DeltaError, DeltaResult};

/// One instruction of a delta window. Offsets are relative to the view the
/// instruction reads from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Copy from the window's source view.
    CopySource { offset: usize, len: usize },
    /// Copy from the target bytes this window already produced. The range
    /// may overlap the bytes being produced, which repeats a pattern.
    CopyTarget { offset: usize, len: usize },
    /// Copy from the window's new data.
    NewData { offset: usize, len: usize },
}

/// A self-contained slice of a text delta.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaWindow {
    pub source_offset: usize,
    pub source_len: usize,
    pub target_len: usize,
    pub ops: Vec<DeltaOp>,
    pub new_data: Bytes,
}

impl DeltaWindow {
    /// A window that writes `data` verbatim.
    pub fn literal(data: impl Into<Bytes>) -> Self {
        let new_data: Bytes = data.into();
        let len = new_data.len();
        Self {
            source_offset: 0,
            source_len: 0,
            target_len: len,
            ops: vec![DeltaOp::NewData { offset: 0, len }],
            new_data,
        }
    }

    /// Apply this window against the full base text, appending the produced
    /// bytes to `out`.
    pub fn apply(&self, base: &[u8], out: &mut Vec<u8>) -> DeltaResult<()> {
        let view_end = self
            .source_offset
            .checked_add(self.source_len)
            .filter(|end| *end <= base.len())
            .ok_or_else(|| {
                DeltaError::InvalidWindow(format!(
                    "source view {}..+{} exceeds base of {} bytes",
                    self.source_offset,
                    self.source_len,
                    base.len()
                ))
            })?;
        let view = &base[self.source_offset..view_end];

        // Reserve no more than the view and new data can supply.
        let reserve = self.target_len.min(view.len().saturating_add(self.new_data.len()));
        let mut target = Vec::with_capacity(reserve);
        for op in &self.ops {
            let (DeltaOp::CopySource { len, .. }
            | DeltaOp::CopyTarget { len, .. }
            | DeltaOp::NewData { len, .. }) = *op;
            if target
                .len()
                .checked_add(len)
                .map_or(true, |end| end > self.target_len)
            {
                return Err(DeltaError::InvalidWindow(format!(
                    "window overruns its target length of {}",
                    self.target_len
                )));
            }
            match *op {
                DeltaOp::CopySource { offset, len } => {
                    let range = checked_range(offset, len, view.len(), "source view")?;
                    target.extend_from_slice(&view[range]);
                }
                DeltaOp::CopyTarget { offset, len } => {
                    if len > 0 && offset >= target.len() {
                        return Err(DeltaError::InvalidWindow(format!(
                            "target copy at {offset} before {} bytes were produced",
                            offset + 1
                        )));
                    }
                    for i in 0..len {
                        let byte = target[offset + i];
                        target.push(byte);
                    }
                }
                DeltaOp::NewData { offset, len } => {
                    let range = checked_range(offset, len, self.new_data.len(), "new data")?;
                    target.extend_from_slice(&self.new_data[range]);
                }
            }
        }
        if target.len() != self.target_len {
            return Err(DeltaError::InvalidWindow(format!(
                "window produced {} bytes, declared {}",
                target.len(),
                self.target_len
            )));
        }
        out.extend_from_slice(&target);
        Ok(())
    }
}

fn checked_range(
    offset: usize,
    len: usize,
    available: usize,
    what: &str,
) -> DeltaResult<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= available => Ok(offset..end),
        _ => Err(DeltaError::InvalidWindow(format!(
            "{what} range {offset}..+{len} exceeds {available} bytes"
        ))),
    }
}

/// Rebuilds a full text by applying windows in order.
#[derive(Debug)]
pub struct TextApplier {
    base: Bytes,
    output: Vec<u8>,
    windows: usize,
}

impl TextApplier {
    pub fn new(base: Bytes) -> Self {
        Self {
            base,
            output: Vec::new(),
            windows: 0,
        }
    }

    pub fn apply(&mut self, window: &DeltaWindow) -> DeltaResult<()> {
        window.apply(&self.base, &mut self.output)?;
        self.windows += 1;
        Ok(())
    }

    /// Number of windows applied so far.
    pub fn windows(&self) -> usize {
        self.windows
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.output)
    }
}

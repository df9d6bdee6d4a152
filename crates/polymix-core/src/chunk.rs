//! Chunk model: declared byte regions with placement constraints.
//!
//! A chunk names a payload slice of some backing buffer and says where that
//! slice may land in the output coordinate space. Fixed chunks carry an
//! absolute coordinate (negative means "relative to end of file", resolved
//! by tail normalisation); flexible chunks carry a window and are placed
//! greedily.
//!
//! Buffers are shared and interior-mutable: the producing module keeps a
//! handle so it can patch cross-references (central-directory offsets, CRCs,
//! re-encrypted headers) after placement, while the layout engine only ever
//! reads through its handle.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

/// Shared, interior-mutable byte buffer backing one or more chunks.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Rc::new(RefCell::new(bytes)))
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    /// Zero-filled buffer of the given length
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn borrow(&self) -> Ref<'_, Vec<u8>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<u8>> {
        self.0.borrow_mut()
    }

    /// Overwrite `bytes.len()` bytes starting at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos + bytes.len()` exceeds the buffer length; patch
    /// positions come from parsing the same buffer, so a miss is a bug in
    /// the calling module.
    pub fn write_at(&self, pos: usize, bytes: &[u8]) {
        self.0.borrow_mut()[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy of the byte range `range`
    pub fn slice(&self, range: Range<usize>) -> Vec<u8> {
        self.0.borrow()[range].to_vec()
    }
}

impl fmt::Debug for SharedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedBuf({} bytes)", self.len())
    }
}

/// Placement constraint for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A single absolute coordinate. Negative values anchor the chunk
    /// relative to the final end of file and are resolved once by
    /// [`crate::layout::Layout::normalize_tail`].
    Fixed { position: i64 },
    /// Greedy placement inside `[lo, hi)`. `lo = None` falls back to the
    /// layout's current minimum begin; `hi = None` leaves the upper end
    /// unbounded, so the layout may grow to fit the chunk.
    Flexible { lo: Option<i64>, hi: Option<i64> },
}

/// A declared byte region: payload source plus placement constraint.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Payload length in bytes
    pub size: usize,
    /// Start of the payload inside `data`
    pub offset: usize,
    /// Backing buffer the payload is drawn from
    pub data: SharedBuf,
    /// Where the chunk may go
    pub placement: Placement,
    /// Name of the producing module, if any
    pub module: Option<&'static str>,
    /// Module-private tag used to recognise the chunk in hook callbacks
    pub tag: Option<usize>,
}

impl Chunk {
    /// Chunk at an absolute position (negative = relative to end of file)
    pub fn fixed(position: i64, size: usize, offset: usize, data: SharedBuf) -> Self {
        Self {
            size,
            offset,
            data,
            placement: Placement::Fixed { position },
            module: None,
            tag: None,
        }
    }

    /// Chunk placed greedily inside a window
    pub fn flexible(
        lo: Option<i64>,
        hi: Option<i64>,
        size: usize,
        offset: usize,
        data: SharedBuf,
    ) -> Self {
        Self {
            size,
            offset,
            data,
            placement: Placement::Flexible { lo, hi },
            module: None,
            tag: None,
        }
    }

    #[must_use]
    pub fn with_module(mut self, name: &'static str) -> Self {
        self.module = Some(name);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: usize) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.placement, Placement::Fixed { .. })
    }

    /// The payload's byte range inside `data`
    pub fn payload_range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }

    /// Payload bounds must hold before placement: `offset + size` may not
    /// run past the backing buffer.
    pub fn payload_in_bounds(&self) -> bool {
        self.offset + self.size <= self.data.len()
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.module {
            Some(name) => write!(f, "{name} chunk")?,
            None => write!(f, "chunk")?,
        }
        if let Some(tag) = self.tag {
            write!(f, " #{tag}")?;
        }
        write!(f, " ({} bytes)", self.size)
    }
}

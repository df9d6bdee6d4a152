//! Layout engine: places chunks into the output coordinate space.
//!
//! Fixed chunks assert hard positions; flexible chunks are fitted greedily
//! into the remaining gaps. Chunks placed at negative coordinates are tail
//! chunks ("k bytes before end of file") and are re-anchored once by
//! [`Layout::normalize_tail`] after every positive-coordinate chunk is
//! known. [`Layout::read`] materialises the byte view so modules can inspect
//! final content from their `placing:complete` callbacks.

use std::cmp::min;
use std::ops::Range;
use std::rc::Rc;

use tracing::debug;

use crate::chunk::{Chunk, Placement, SharedBuf};
use crate::error::{Error, Result};
use crate::interval::IntervalMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accepting placements
    Accepting,
    /// Inside `normalize_tail`; no external `place` calls
    Normalizing,
    /// Final emission has begun; placement is over
    Frozen,
}

/// One placed payload, ready for emission.
#[derive(Debug, Clone)]
pub struct DataBlock {
    /// Output coordinate the payload starts at
    pub start: i64,
    /// Backing buffer
    pub data: SharedBuf,
    /// Payload range inside `data`
    pub span: Range<usize>,
}

/// Chunk placement engine over an [`IntervalMap`].
#[derive(Debug, Default)]
pub struct Layout {
    index: IntervalMap,
    state: State,
}

impl Default for State {
    fn default() -> Self {
        Self::Accepting
    }
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `chunk` as occupying `[start, start + chunk.size)`.
    ///
    /// Negative `start` values are permitted; they are resolved later by
    /// [`Self::normalize_tail`].
    ///
    /// # Panics
    ///
    /// Panics when called after the layout has been frozen for emission;
    /// that is a bug in the caller, not a recoverable condition.
    pub fn place(&mut self, start: i64, chunk: Rc<Chunk>) -> Result<()> {
        assert!(
            self.state != State::Frozen,
            "place called on a frozen layout"
        );
        if !chunk.payload_in_bounds() {
            return Err(Error::invalid_input(format!(
                "{chunk}: payload [{}, {}) runs past its {}-byte buffer",
                chunk.offset,
                chunk.offset + chunk.size,
                chunk.data.len(),
            )));
        }

        let end = start + chunk.size as i64;
        let conflicts = self.index.overlap(start, end);
        if let Some(existing) = conflicts.first() {
            return Err(Error::Overlap {
                start,
                end,
                existing: existing.chunk.to_string(),
                incoming: chunk.to_string(),
            });
        }

        debug!("placing {chunk} at [{start}, {end})");
        self.index.insert(start, end, chunk);
        Ok(())
    }

    /// Lowest free coordinate a flexible chunk fits at.
    ///
    /// Candidates are the window floor and the end of every interval
    /// overlapping the window. A missing floor falls back to the layout's
    /// minimum begin; a missing ceiling bounds the candidate scan by the
    /// current maximum end but leaves the chunk's end unchecked, so the
    /// layout may grow.
    pub fn find_position(&self, chunk: &Chunk) -> Result<i64> {
        let Placement::Flexible { lo, hi } = chunk.placement else {
            return Err(Error::invalid_input(format!(
                "{chunk}: find_position needs a flexible chunk"
            )));
        };

        let size = chunk.size as i64;
        let lo = lo.or_else(|| self.index.min_begin()).unwrap_or(0);
        let scan_hi = hi.or_else(|| self.index.max_end()).unwrap_or(lo);

        let mut candidates = vec![lo];
        for interval in self.index.overlap(lo, scan_hi) {
            if interval.end <= scan_hi {
                candidates.push(interval.end);
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        for position in candidates {
            if let Some(hi) = hi {
                if position + size > hi {
                    continue;
                }
            }
            if !self.index.overlaps(position, position + size) {
                return Ok(position);
            }
        }

        Err(Error::NoFreeSpace {
            chunk: chunk.to_string(),
        })
    }

    /// Re-anchor tail chunks to the positive half of the coordinate space.
    ///
    /// Slices the index at 0, removes every interval wholly in the negative
    /// half, and returns them re-anchored at `begin + (max_end - min(0,
    /// min_begin))`, ascending. The caller re-inserts them via
    /// [`Self::place`].
    pub fn normalize_tail(&mut self) -> Vec<(i64, Rc<Chunk>)> {
        self.state = State::Normalizing;

        let resolved = match (self.index.min_begin(), self.index.max_end()) {
            (Some(min_begin), Some(max_end)) if min_begin < 0 => {
                let new_size = max_end - min(0, min_begin);
                self.index.slice_at(0);
                self.index
                    .remove_overlap(min_begin, 0)
                    .into_iter()
                    .map(|interval| (interval.begin + new_size, interval.chunk))
                    .collect()
            }
            _ => Vec::new(),
        };

        self.state = State::Accepting;
        resolved
    }

    /// Stop accepting placements; the layout is being emitted.
    pub fn freeze(&mut self) {
        self.state = State::Frozen;
    }

    /// Every placed payload, ascending by start coordinate.
    pub fn data_blocks(&self) -> Vec<DataBlock> {
        self.index
            .iter()
            .map(|interval| DataBlock {
                start: interval.begin,
                data: interval.chunk.data.clone(),
                span: interval.chunk.payload_range(),
            })
            .collect()
    }

    /// Materialise the byte view over `[start, end)`.
    ///
    /// Gaps between placed intervals, and any part of the range outside the
    /// layout's extent, read as zero bytes. The view is purely functional
    /// over the current index state.
    pub fn read(&self, start: i64, end: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity((end - start).max(0) as usize);
        let mut cursor = start;

        for interval in self.index.overlap(start, end) {
            if interval.begin > cursor {
                out.resize(out.len() + (interval.begin - cursor) as usize, 0);
                cursor = interval.begin;
            }
            let chunk = &interval.chunk;
            let stop = min(end, interval.end);
            let from = chunk.offset + (cursor - interval.begin) as usize;
            let to = chunk.offset + (stop - interval.begin) as usize;
            out.extend_from_slice(&chunk.data.borrow()[from..to]);
            cursor = stop;
        }

        if cursor < end {
            out.resize(out.len() + (end - cursor) as usize, 0);
        }
        out
    }

    /// Smallest placed begin
    pub fn min_begin(&self) -> Option<i64> {
        self.index.min_begin()
    }

    /// Largest placed end
    pub fn max_end(&self) -> Option<i64> {
        self.index.max_end()
    }

    /// Extent of the layout (`max_end - min_begin`)
    pub fn span(&self) -> i64 {
        self.index.span()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

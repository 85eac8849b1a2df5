//! Segment range iterator — lazy, bounded, forward-only.
//!
//! [`SegmentEntries`] walks one segment's cells over the half-open interval
//! `[from, to)`, decoding each cell on demand from the memory map. Cell
//! boundaries were validated when the segment was opened, so iteration is
//! just index arithmetic plus slicing.
//!
//! The iterator is generic over how the segment is held: `&Segment` for
//! local borrows, or any other `Deref<Target = Segment>` handle (the manager
//! hands out [`SegmentView`](crate::manager::SegmentView)s so iterators stay
//! valid after its lock snapshot is released).

use std::ops::Deref;

use crate::entry::Entry;

use super::Segment;

/// Iterator over one segment's entries within `[from, to)`.
///
/// Forward-only and non-restartable; finite by construction.
pub struct SegmentEntries<S: Deref<Target = Segment>> {
    /// Reference to (or owned handle on) the segment being iterated.
    segment: S,

    /// Index of the next entry to yield.
    idx: usize,

    /// Exclusive upper bound; `None` = unbounded.
    to: Option<Vec<u8>>,
}

impl<S: Deref<Target = Segment>> SegmentEntries<S> {
    /// Create an iterator positioned at the first entry with key `>= from`
    /// (or the first entry overall when `from` is `None`).
    pub(crate) fn new(segment: S, from: Option<&[u8]>, to: Option<&[u8]>) -> Self {
        let idx = match from {
            Some(from) => segment.lower_bound(from),
            None => 0,
        };
        Self {
            segment,
            idx,
            to: to.map(<[u8]>::to_vec),
        }
    }

    /// Returns `true` if at least one more entry will be yielded.
    ///
    /// Used by the manager to drop empty per-segment sequences from scan
    /// results without consuming anything.
    pub fn has_next(&self) -> bool {
        self.idx < self.segment.entry_count()
            && self
                .to
                .as_deref()
                .is_none_or(|to| self.segment.key_at(self.idx) < to)
    }
}

impl<S: Deref<Target = Segment>> Iterator for SegmentEntries<S> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        let entry = self.segment.entry_at(self.idx);
        self.idx += 1;
        Some(entry)
    }
}

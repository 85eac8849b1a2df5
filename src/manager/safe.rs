//! SafeSegment — decouples "no longer visible" from "physically deleted".
//!
//! Retirement of a superseded segment is two-phase:
//!
//! 1. The manager removes the [`SafeSegment`] from the active set under its
//!    write lock — an atomic, instantaneous change after which no *new*
//!    lookup can reach the segment.
//! 2. [`SafeSegment::delete`] unlinks the backing file on the deletion pool,
//!    concurrently and in no particular order relative to other deletions.
//!
//! In-flight readers are unaffected by either phase: they hold
//! `Arc<SafeSegment>` clones taken from an active-set snapshot, so the
//! memory mapping stays alive until the last reader drops its handle, and
//! the unlinked inode stays alive until the mapping goes away. The `Arc`
//! strong count is the per-segment read count.

use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::entry::Entry;
use crate::segment::{Segment, SegmentEntries};

// ------------------------------------------------------------------------------------------------
// SafeSegment
// ------------------------------------------------------------------------------------------------

/// A segment wrapped for two-phase retirement.
///
/// Delegates all read operations to the wrapped [`Segment`]; the active set
/// orders these by id, descending, so iteration is newest-first.
pub struct SafeSegment {
    segment: Segment,
}

impl SafeSegment {
    pub(crate) fn new(segment: Segment) -> Self {
        Self { segment }
    }

    /// Id of the wrapped segment.
    pub fn id(&self) -> u64 {
        self.segment.id()
    }

    /// The wrapped segment.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Point lookup, delegated to the wrapped segment.
    pub fn find_entry(&self, key: &[u8]) -> Option<Entry> {
        self.segment.find_entry(key)
    }

    /// Bounded range iteration, delegated to the wrapped segment.
    pub fn find_entries(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> SegmentEntries<&Segment> {
        self.segment.find_entries(from, to)
    }

    /// Unlinks the backing data file under `dir` (retirement phase two).
    ///
    /// The mapping held by this handle remains valid; failure leaves an
    /// inert file that the next directory scan removes.
    pub(crate) fn delete(&self, dir: &Path) -> io::Result<()> {
        std::fs::remove_file(Segment::data_path(dir, self.id()))
    }
}

// ------------------------------------------------------------------------------------------------
// SegmentView
// ------------------------------------------------------------------------------------------------

/// A shared handle on an active-set segment that derefs to [`Segment`].
///
/// Range iterators returned by the manager are parameterized over this
/// handle, so they remain valid after the active-set snapshot they came
/// from is gone — even if the segment is retired mid-iteration.
pub struct SegmentView(pub(crate) Arc<SafeSegment>);

impl Deref for SegmentView {
    type Target = Segment;

    fn deref(&self) -> &Segment {
        self.0.segment()
    }
}

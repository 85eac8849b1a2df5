//! Merge engine — priority-tagged n-way merge over sorted entry streams.
//!
//! This module provides the three pieces compaction composes:
//!
//! - [`PriorityIterator`] — pairs a lazy entry stream with a static priority,
//!   assigned `0..n` in oldest-to-newest order over the exact sources of one
//!   merge.
//! - [`GatheringIterator`] — a heap-based n-way merge over already-sorted
//!   sources. The globally minimal key wins each step; a key present in
//!   several sources is resolved to the **highest-priority** (most recent)
//!   one, and every source that presented it is advanced so shadowed
//!   duplicates are consumed rather than re-emitted. The output carries
//!   exactly one entry per distinct key, ascending.
//! - [`TombstoneFilter`] — drops tombstone entries from a merged stream.
//!
//! # Tombstone filtering is only safe over a *full* merge
//!
//! Dropping a tombstone is correct only when every segment below the
//! compaction cutoff participates in the merge — then no older, lower-priority
//! source remains for the tombstone to shadow. Filtering a partial merge
//! would silently resurrect an older value, which is why external scans get
//! the raw per-segment sequences and only compaction applies this filter.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::Entry;

// ------------------------------------------------------------------------------------------------
// PriorityIterator
// ------------------------------------------------------------------------------------------------

/// A sorted entry stream tagged with a static merge priority.
///
/// Priority 0 is the oldest source; higher priorities shadow lower ones when
/// the same key appears in several sources.
pub struct PriorityIterator<I> {
    iter: I,
    priority: usize,
}

impl<I> PriorityIterator<I> {
    /// Wraps `iter` with the given priority.
    pub fn new(iter: I, priority: usize) -> Self {
        Self { iter, priority }
    }

    /// Returns the static priority of this source.
    pub fn priority(&self) -> usize {
        self.priority
    }
}

impl<I: Iterator<Item = Entry>> Iterator for PriorityIterator<I> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

// ------------------------------------------------------------------------------------------------
// GatheringIterator — heap-based n-way merge with recency tie-break
// ------------------------------------------------------------------------------------------------

struct GatherHeapEntry {
    entry: Entry,
    priority: usize,
    source_idx: usize,
}

impl Ord for GatherHeapEntry {
    /// Pop order for the max-heap: smallest key first; on equal keys, the
    /// highest-priority (most recent) source first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .entry
            .key
            .cmp(&self.entry.key)
            .then_with(|| self.priority.cmp(&other.priority))
    }
}

impl PartialOrd for GatherHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GatherHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.priority == other.priority
    }
}

impl Eq for GatherHeapEntry {}

/// An n-way merge over sorted, priority-tagged sources.
///
/// Yields one entry per distinct key in ascending key order; ties across
/// sources resolve to the highest priority. The result is a single forward,
/// non-restartable sequence, finite iff all inputs are finite.
pub struct GatheringIterator<I> {
    sources: Vec<PriorityIterator<I>>,
    heap: BinaryHeap<GatherHeapEntry>,
}

impl<I: Iterator<Item = Entry>> GatheringIterator<I> {
    /// Builds the merge over the given sources, priming the heap with each
    /// source's head entry.
    pub fn new(mut sources: Vec<PriorityIterator<I>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());

        for (idx, source) in sources.iter_mut().enumerate() {
            if let Some(entry) = source.iter.next() {
                heap.push(GatherHeapEntry {
                    entry,
                    priority: source.priority,
                    source_idx: idx,
                });
            }
        }

        Self { sources, heap }
    }

    /// Pushes the next entry of source `idx` onto the heap, if any.
    fn refill(&mut self, idx: usize) {
        let source = &mut self.sources[idx];
        if let Some(entry) = source.iter.next() {
            self.heap.push(GatherHeapEntry {
                entry,
                priority: source.priority,
                source_idx: idx,
            });
        }
    }
}

impl<I: Iterator<Item = Entry>> Iterator for GatheringIterator<I> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let winner = self.heap.pop()?;
        self.refill(winner.source_idx);

        // Consume shadowed duplicates of the winning key so lower-priority
        // sources do not re-emit them.
        while self
            .heap
            .peek()
            .is_some_and(|shadowed| shadowed.entry.key == winner.entry.key)
        {
            if let Some(dup) = self.heap.pop() {
                self.refill(dup.source_idx);
            }
        }

        Some(winner.entry)
    }
}

// ------------------------------------------------------------------------------------------------
// TombstoneFilter
// ------------------------------------------------------------------------------------------------

/// Drops tombstone entries from a merged stream.
///
/// Only correct downstream of a [`GatheringIterator`] spanning *every*
/// segment below a compaction cutoff — see the module docs.
pub struct TombstoneFilter<I> {
    inner: I,
}

impl<I> TombstoneFilter<I> {
    /// Wraps the merged stream.
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I: Iterator<Item = Entry>> Iterator for TombstoneFilter<I> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.find(|entry| !entry.is_tombstone())
    }
}

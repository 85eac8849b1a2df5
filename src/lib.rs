//! # segstore
//!
//! The **immutable-segment subsystem** of a log-structured key-value store:
//! sorted, memory-mapped on-disk tables ("segments"), point and range
//! lookups across an unbounded segment set with last-writer-wins shadowing,
//! and background compaction that merges old segments into one and safely
//! retires the inputs while concurrent readers drain.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segstore::{Entry, ManagerConfig, SegmentManager};
//!
//! let manager = SegmentManager::open("/tmp/segments", ManagerConfig::default()).unwrap();
//!
//! // A write buffer flushes its sorted contents as one batch.
//! let id = manager
//!     .save_entries(vec![
//!         Entry::new("hello", "world"),
//!         Entry::tombstone("stale"),
//!     ])
//!     .unwrap();
//! assert_eq!(id, Some(0));
//!
//! // Point lookup — newest segment wins; tombstones are reported, not hidden.
//! let entry = manager.get(b"hello").unwrap();
//! assert_eq!(entry.unwrap().value.as_deref(), Some(&b"world"[..]));
//!
//! // Merge everything into a single tombstone-free segment, in the background.
//! manager.compact().unwrap();
//!
//! // Graceful shutdown: drain background work, then release all mappings.
//! manager.close();
//! ```
//!
//! ## Features
//!
//! - **Immutable segments** — written atomically (tmp → rename), CRC32
//!   checksummed, bloom filtered, binary searchable.
//! - **Shadowing reads** — `get` scans the active set newest-first and
//!   short-circuits; `scan` returns per-segment lazy sequences for the
//!   caller to merge.
//! - **Background compaction** — a priority-tagged k-way merge yields one
//!   entry per key, drops spent tombstones, and retires superseded segments
//!   in two phases: atomic unpublish, asynchronous unlink.
//! - **Startup recovery** — the directory scan rebuilds the active set from
//!   segment files and removes residue.
//!
//! ## What lives elsewhere
//!
//! The in-memory write buffer, the write-ahead log, and request handling are
//! external collaborators: [`SegmentManager::save_entries`] is the flush
//! entry point, and [`SegmentManager::scan`] deliberately returns un-merged
//! per-segment sequences for the caller to combine with its own live state.

pub mod entry;
pub mod manager;
pub mod merge;
pub mod segment;

pub use entry::Entry;
pub use manager::{ManagerConfig, SafeSegment, SegmentManager, SegmentView, StoreError};
pub use merge::{GatheringIterator, PriorityIterator, TombstoneFilter};
pub use segment::{Segment, SegmentEntries, SegmentError};

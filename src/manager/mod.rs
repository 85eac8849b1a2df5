//! Segment manager — orchestrates the active segment set.
//!
//! The [`SegmentManager`] owns everything above individual segments: the
//! id counter, the active set, lookup and scan dispatch, the save/publish
//! critical section, background compaction, and two-phase retirement of
//! superseded files.
//!
//! ## Concurrency model
//!
//! - **Lookups and scans** clone an `Arc` snapshot of the active set under a
//!   brief read lock and never block on saves, compactions, or deletions.
//!   They observe any segment's membership either before or after a
//!   mutation, never a torn view.
//! - **`save_entries`** is a single mutual-exclusion critical section: id
//!   claim, file write, and set insertion happen as one atomic unit, so two
//!   saves can never collide on an id and a concurrent compaction's
//!   "segments below cutoff" snapshot stays consistent.
//! - **Compaction** runs on a dedicated single worker thread — at most one
//!   merge-publish-prune cycle executes system-wide, and further
//!   [`SegmentManager::compact`] calls queue behind it.
//! - **Deletions** run on a small concurrent pool, unordered and
//!   independent; a failure is logged and the file becomes inert garbage
//!   for the next [`SegmentManager::open`] scan to remove.
//!
//! ## Shutdown
//!
//! [`SegmentManager::close`] is idempotent: it stops intake, drops both work
//! queues' senders so the workers drain and exit, joins them, and only then
//! clears the active set — releasing every segment mapping after the last
//! in-flight background operation has finished. `Drop` performs the same
//! cleanup, best-effort.

mod safe;

#[cfg(test)]
mod tests;

pub use safe::{SafeSegment, SegmentView};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use crossbeam::channel::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::Entry;
use crate::merge::{GatheringIterator, PriorityIterator, TombstoneFilter};
use crate::segment::{DATA_FILE_EXT, Segment, SegmentEntries, SegmentError};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`SegmentManager`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The manager has been closed.
    #[error("segment store is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Error originating from the segment subsystem.
    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`SegmentManager`] instance.
///
/// All fields have sensible defaults via [`ManagerConfig::default()`]; the
/// configuration is validated by [`SegmentManager::open`].
pub struct ManagerConfig {
    /// Number of worker threads servicing background file deletions.
    ///
    /// Deletions are independent of each other, so more workers only help
    /// when compaction retires many segments at once.
    ///
    /// Default: 2. Must be ≥ 1.
    pub delete_workers: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { delete_workers: 2 }
    }
}

impl ManagerConfig {
    /// Validates all configuration parameters.
    fn validate(&self) -> Result<(), StoreError> {
        if self.delete_workers < 1 {
            return Err(StoreError::InvalidConfig(
                "delete_workers must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Background worker state
// ------------------------------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send>;

/// Holds the queue senders and worker handles.
/// Taken (`Option::take`) on shutdown to ensure single cleanup.
struct Workers {
    compact_tx: Sender<Job>,
    delete_tx: Sender<Job>,
    handles: Vec<thread::JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// Shared core — everything the background workers need
// ------------------------------------------------------------------------------------------------

/// State shared between the caller-facing handle and the worker threads.
struct ManagerCore {
    /// Base directory holding the segment files.
    dir: PathBuf,

    /// Next unclaimed segment id. Monotonic, never reused.
    next_id: AtomicU64,

    /// The active set: every currently-queryable segment, keyed by id.
    /// Descending iteration = newest-first.
    segments: RwLock<BTreeMap<u64, Arc<SafeSegment>>>,

    /// Serializes id claim + file write + publish in `save_entries`.
    save_lock: Mutex<()>,
}

impl ManagerCore {
    fn read_set(
        &self,
    ) -> Result<RwLockReadGuard<'_, BTreeMap<u64, Arc<SafeSegment>>>, StoreError> {
        self.segments
            .read()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    fn write_set(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<u64, Arc<SafeSegment>>>, StoreError> {
        self.segments
            .write()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    /// Newest-first snapshot of the active set.
    fn snapshot(&self) -> Result<Vec<Arc<SafeSegment>>, StoreError> {
        Ok(self.read_set()?.values().rev().cloned().collect())
    }

    /// Point lookup across the active set, newest-first, first hit wins.
    fn get(&self, key: &[u8]) -> Result<Option<Entry>, StoreError> {
        for segment in self.snapshot()? {
            if let Some(entry) = segment.find_entry(key) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Per-segment range iterators over `[from, to)`, oldest-to-newest.
    ///
    /// When `below` is given, only segments with a smaller id are selected —
    /// compaction uses this to exclude segments published while its merge is
    /// in flight. Empty sequences are dropped.
    fn scan(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        below: Option<u64>,
    ) -> Result<Vec<SegmentEntries<SegmentView>>, StoreError> {
        let set = self.read_set()?;
        let mut sequences = Vec::new();

        for (id, segment) in set.iter() {
            if below.is_some_and(|cutoff| *id >= cutoff) {
                break;
            }
            let entries = SegmentEntries::new(SegmentView(Arc::clone(segment)), from, to);
            if entries.has_next() {
                sequences.push(entries);
            }
        }

        Ok(sequences)
    }

    fn lock_save(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.save_lock
            .lock()
            .map_err(|_| StoreError::Internal("Mutex poisoned".into()))
    }

    /// Persists `entries` as a new segment and publishes it.
    ///
    /// The whole operation — id claim, file write, set insertion — runs
    /// under one mutex, making it the single serialization point for id
    /// assignment and set mutation. Returns `Ok(None)` when the stream
    /// turned out empty and no segment was produced.
    fn save_entries(
        &self,
        entries: impl IntoIterator<Item = Entry>,
    ) -> Result<Option<u64>, StoreError> {
        let _guard = self.lock_save()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.save_entries_locked(entries, id)
    }

    /// The write-and-publish half of `save_entries`; the save mutex must be
    /// held by the caller.
    fn save_entries_locked(
        &self,
        entries: impl IntoIterator<Item = Entry>,
        id: u64,
    ) -> Result<Option<u64>, StoreError> {
        if !Segment::save(&self.dir, id, entries)? {
            debug!(id, "empty entry stream, no segment produced");
            return Ok(None);
        }

        let segment = Segment::open(&self.dir, id)?;
        self.write_set()?
            .insert(id, Arc::new(SafeSegment::new(segment)));
        debug!(id, "segment published");

        Ok(Some(id))
    }
}

// ------------------------------------------------------------------------------------------------
// Compaction cycle — runs on the dedicated compaction worker
// ------------------------------------------------------------------------------------------------

/// One merge-publish-prune cycle.
///
/// Claims a cutoff id, merges every segment below it into a tombstone-free
/// stream, saves that as one new segment (reusing the cutoff id), then
/// atomically retires the inputs. Any failure before the save is proven
/// published-or-intentionally-empty aborts the cycle with the active set
/// untouched.
///
/// The cutoff claim, source selection, merge, and publish all happen under
/// the save mutex: a flush holding the mutex has either published its
/// segment (so the merge sees it) or will claim an id above the cutoff.
/// Pruning then runs outside the mutex against the cutoff alone.
fn run_compaction(core: &ManagerCore, delete_tx: &Sender<Job>) {
    let (prepare_id, new_id) = {
        let _guard = match core.lock_save() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(%e, "compaction aborted");
                return;
            }
        };
        let prepare_id = core.next_id.fetch_add(1, Ordering::SeqCst);

        let sources = match core.scan(None, None, Some(prepare_id)) {
            Ok(sources) => sources,
            Err(e) => {
                warn!(prepare_id, %e, "compaction aborted while collecting sources");
                return;
            }
        };
        if sources.is_empty() {
            debug!(prepare_id, "no segments below cutoff, nothing to compact");
            return;
        }

        let tagged: Vec<_> = sources
            .into_iter()
            .enumerate()
            .map(|(priority, entries)| PriorityIterator::new(entries, priority))
            .collect();
        let merged = TombstoneFilter::new(GatheringIterator::new(tagged));

        match core.save_entries_locked(merged, prepare_id) {
            Ok(new_id) => (prepare_id, new_id),
            Err(e) => {
                warn!(prepare_id, %e, "compaction failed, active set unchanged");
                return;
            }
        }
    };
    match new_id {
        Some(id) => info!(id, "segments compacted into new segment"),
        None => info!(prepare_id, "segments compacted, all entries were deleted"),
    }

    // Prune: atomically unpublish every superseded segment below the cutoff,
    // then hand each one to the deletion pool. Segments published during the
    // merge have ids >= prepare_id and are never touched.
    let stale = {
        let mut set = match core.write_set() {
            Ok(set) => set,
            Err(e) => {
                warn!(prepare_id, %e, "compaction pruning skipped");
                return;
            }
        };
        let mut stale = Vec::new();
        set.retain(|id, segment| {
            let retire = *id < prepare_id && Some(*id) != new_id;
            if retire {
                stale.push(Arc::clone(segment));
            }
            !retire
        });
        stale
    };

    for segment in stale {
        let dir = core.dir.clone();
        let id = segment.id();
        let job: Job = Box::new(move || {
            if let Err(e) = segment.delete(&dir) {
                warn!(id, %e, "failed to delete retired segment file");
            }
        });
        // Send fails only during shutdown, after the queues were drained —
        // the file is then inert garbage for the next open scan.
        let _ = delete_tx.send(job);
    }
}

// ------------------------------------------------------------------------------------------------
// Directory scan
// ------------------------------------------------------------------------------------------------

/// Extracts a segment id from a file name of the form `<integer>.seg`.
fn parse_segment_id(path: &Path) -> Option<u64> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(DATA_FILE_EXT) {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<u64>().ok())
}

/// Shallow-scans `dir`, opening every valid segment file and deleting
/// everything else as residue. Returns the loaded set and the highest id.
fn load_segments(
    dir: &Path,
) -> Result<(BTreeMap<u64, Arc<SafeSegment>>, Option<u64>), StoreError> {
    let mut segments = BTreeMap::new();

    for dir_entry in fs::read_dir(dir)? {
        let path = dir_entry?.path();
        if !path.is_file() {
            continue;
        }

        match parse_segment_id(&path) {
            Some(id) => {
                let segment = Segment::open(dir, id)?;
                segments.insert(id, Arc::new(SafeSegment::new(segment)));
            }
            None => {
                debug!(path = %path.display(), "removing residue file");
                fs::remove_file(&path)?;
            }
        }
    }

    let max_id = segments.keys().next_back().copied();
    Ok((segments, max_id))
}

// ------------------------------------------------------------------------------------------------
// SegmentManager — public handle
// ------------------------------------------------------------------------------------------------

/// The immutable-segment store handle.
///
/// Owns the active segment set and the id counter; coordinates saves,
/// lookups, background compaction, and retirement. `Send + Sync` — share it
/// across threads via `Arc<SegmentManager>`.
///
/// # Background compaction
///
/// [`SegmentManager::compact`] is fire-and-forget: it enqueues one cycle on
/// a dedicated single-worker queue, so at most one compaction executes at a
/// time and repeated calls run strictly one after another.
pub struct SegmentManager {
    core: Arc<ManagerCore>,
    workers: Mutex<Option<Workers>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentManager")
            .field("dir", &self.core.dir)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SegmentManager {
    /// Opens (or creates) a segment store rooted at `dir`.
    ///
    /// Scans the directory shallowly: files named `<integer>.seg` become
    /// active segments, anything else is deleted as residue. The id counter
    /// starts at `max(existing ids) + 1`, or 0 for an empty directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or read, when a segment
    /// file is corrupt, or when the configuration is invalid.
    pub fn open(dir: impl AsRef<Path>, config: ManagerConfig) -> Result<Self, StoreError> {
        config.validate()?;

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let (segments, max_id) = load_segments(&dir)?;
        let segment_count = segments.len();

        let core = Arc::new(ManagerCore {
            dir,
            next_id: AtomicU64::new(max_id.map_or(0, |max| max + 1)),
            segments: RwLock::new(segments),
            save_lock: Mutex::new(()),
        });

        // Compaction queue: one worker = strict serialization.
        let (compact_tx, compact_rx) = crossbeam::channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(1 + config.delete_workers);
        handles.push(
            thread::Builder::new()
                .name("segstore-compact".into())
                .spawn(move || {
                    while let Ok(job) = compact_rx.recv() {
                        job();
                    }
                })
                .expect("failed to spawn background thread"),
        );

        // Deletion pool: independent jobs, shared queue.
        let (delete_tx, delete_rx) = crossbeam::channel::unbounded::<Job>();
        for id in 0..config.delete_workers {
            let rx = delete_rx.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("segstore-delete-{id}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn background thread"),
            );
        }
        // Workers hold their own receiver clones; drop ours.
        drop(delete_rx);

        info!(
            path = %core.dir.display(),
            segments = segment_count,
            "segment store opened"
        );

        Ok(Self {
            core,
            workers: Mutex::new(Some(Workers {
                compact_tx,
                delete_tx,
                handles,
            })),
            closed: AtomicBool::new(false),
        })
    }

    /// Retrieves the newest entry for `key` across the active set.
    ///
    /// Returns the first hit scanning newest-first — **including a
    /// tombstone entry**, which callers interpret as "deleted", not
    /// "absent". `Ok(None)` means no active segment knows the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, StoreError> {
        self.check_open()?;
        self.core.get(key)
    }

    /// Returns per-segment lazy iterators over `[from, to)`, oldest-to-newest.
    ///
    /// A `None` bound is unbounded on that side. The sequences are **not**
    /// merged: the caller combines them (together with any live write-buffer
    /// state) under shadowing rules, e.g. via
    /// [`GatheringIterator`](crate::merge::GatheringIterator). Segments with
    /// nothing in range are omitted.
    pub fn scan(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<Vec<SegmentEntries<SegmentView>>, StoreError> {
        self.check_open()?;
        self.core.scan(from, to, None)
    }

    /// Persists a sorted entry batch as a new segment and publishes it.
    ///
    /// This is the flush entry point for an external write buffer. Returns
    /// the new segment's id, or `Ok(None)` when the batch was empty and no
    /// segment was produced.
    ///
    /// # Errors
    ///
    /// I/O failures are propagated and nothing is published.
    pub fn save_entries(
        &self,
        entries: impl IntoIterator<Item = Entry>,
    ) -> Result<Option<u64>, StoreError> {
        self.check_open()?;
        self.core.save_entries(entries)
    }

    /// Schedules a full compaction; fire-and-forget.
    ///
    /// Merges every segment that exists when the cycle starts into a single
    /// tombstone-free segment, then retires the inputs (atomic removal from
    /// the active set, asynchronous file deletion). Cycles are strictly
    /// serialized; calls made while one runs queue behind it.
    pub fn compact(&self) -> Result<(), StoreError> {
        self.check_open()?;

        let guard = self.workers.lock().unwrap();
        if let Some(workers) = guard.as_ref() {
            let core = Arc::clone(&self.core);
            let delete_tx = workers.delete_tx.clone();
            let _ = workers
                .compact_tx
                .send(Box::new(move || run_compaction(&core, &delete_tx)));
        }
        Ok(())
    }

    /// Ids of the currently active segments, newest first.
    pub fn segment_ids(&self) -> Result<Vec<u64>, StoreError> {
        self.check_open()?;
        Ok(self.core.read_set()?.keys().rev().copied().collect())
    }

    /// Gracefully shuts down the store.
    ///
    /// Stops accepting new work, drains both worker queues, joins the
    /// workers, and then releases every segment mapping. Calling `close`
    /// more than once is harmless; subsequent operations on this handle
    /// return [`StoreError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return; // Already closed.
        }

        if let Some(workers) = self.workers.lock().unwrap().take() {
            // Drop senders → workers drain remaining jobs then exit.
            drop(workers.compact_tx);
            drop(workers.delete_tx);
            for handle in workers.handles {
                let _ = handle.join();
            }
        }

        // All background work has finished; releasing the active set now
        // invalidates every mapping at once.
        if let Ok(mut set) = self.core.segments.write() {
            set.clear();
        }

        info!("segment store closed");
    }

    /// Returns `Err(StoreError::Closed)` once the store has been closed.
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Drop for SegmentManager {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.close();
        }
    }
}

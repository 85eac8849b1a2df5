//! Segment — an immutable, sorted, file-backed table of entries.
//!
//! A segment is written once via [`Segment::save`] and never modified
//! afterward. It stores [`Entry`] cells in key order together with a bloom
//! filter for fast negative point lookups and a per-cell offsets array that
//! supports binary search and bounded range iteration.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES]
//! [CELL][CELL]...[CELL]
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [OFFSETS_LEN_LE][OFFSETS_BYTES][OFFSETS_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! - **Header** — magic, format version, CRC32.
//! - **Cells** — `key_len (u32) | value_len (u32) | flags (u8) | key | value`;
//!   flag bit 0 marks a tombstone, which carries no value bytes.
//! - **Bloom filter block** — serialized filter over all point keys.
//! - **Offsets block** — one `u64` file offset per cell, ascending, enabling
//!   binary search without decoding the whole table.
//! - **Footer** — block handles, a CRC32 over the cell region, the total file
//!   size, and its own CRC32.
//!
//! All integers are little-endian fixed width.
//!
//! # Sub-modules
//!
//! - [`builder`] — [`SegmentWriter`] for persisting sorted entry streams.
//! - [`iterator`] — [`SegmentEntries`], the lazy bounded range iterator.
//!
//! # Concurrency model
//!
//! Segments are immutable, so reads are lock-free and thread-safe; any number
//! of readers may share one segment. The whole lifecycle of the backing file
//! is append-elsewhere: updates and deletions arrive as *new* segments, and
//! superseded segments are retired by the manager, never rewritten.
//!
//! # Guarantees
//!
//! - **Immutability:** once [`Segment::save`] returns, the file never changes.
//! - **Atomic visibility:** files are written to a temporary path and renamed
//!   into place, so a concurrent opener never observes a partial table.
//! - **Integrity:** header, footer, bloom, offsets, and the cell region are
//!   all CRC32-checked; every cell boundary is validated at [`Segment::open`],
//!   so the lookup and iteration paths slice the map without re-validating.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

pub use builder::SegmentWriter;
pub use iterator::SegmentEntries;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use crate::entry::Entry;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// File extension of segment data files, without the dot.
pub const DATA_FILE_EXT: &str = "seg";

pub(crate) const SEG_MAGIC: [u8; 4] = *b"SEG1";
pub(crate) const SEG_VERSION: u32 = 1;
pub(crate) const SEG_HDR_SIZE: usize = 12;
pub(crate) const SEG_FOOTER_SIZE: usize = 48;
pub(crate) const SEG_BLOCK_LEN_SIZE: usize = 4;
pub(crate) const SEG_BLOCK_CHECKSUM_SIZE: usize = 4;
pub(crate) const SEG_CELL_HDR_SIZE: usize = 9;
pub(crate) const SEG_CELL_FLAG_TOMBSTONE: u8 = 0b0000_0001;
pub(crate) const SEG_BLOOM_FP_RATE: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by segment operations (save, open, lookup).
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Checksum mismatch.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Malformed on-disk structure or internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// Handle to a checksummed block in the segment file.
///
/// `size` is the full on-disk footprint of the block: length prefix, payload,
/// and trailing CRC32.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// Segment footer, stored at the very end of the file.
pub(crate) struct SegmentFooter {
    /// Handle of the bloom filter block.
    pub(crate) bloom: BlockHandle,

    /// Handle of the cell offsets block.
    pub(crate) offsets: BlockHandle,

    /// CRC32 over the whole cell region (everything between header and bloom).
    pub(crate) data_crc32: u32,

    /// Total size of the segment file, including this footer.
    pub(crate) total_file_size: u64,

    /// CRC32 over the footer fields above.
    pub(crate) footer_crc32: u32,
}

impl SegmentFooter {
    pub(crate) fn encode(&self) -> [u8; SEG_FOOTER_SIZE] {
        let mut buf = [0u8; SEG_FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.bloom.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.bloom.size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.offsets.offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.offsets.size.to_le_bytes());
        buf[32..36].copy_from_slice(&self.data_crc32.to_le_bytes());
        buf[36..44].copy_from_slice(&self.total_file_size.to_le_bytes());
        buf[44..48].copy_from_slice(&self.footer_crc32.to_le_bytes());
        buf
    }

    pub(crate) fn decode(buf: &[u8; SEG_FOOTER_SIZE]) -> Self {
        Self {
            bloom: BlockHandle {
                offset: read_u64(buf, 0),
                size: read_u64(buf, 8),
            },
            offsets: BlockHandle {
                offset: read_u64(buf, 16),
                size: read_u64(buf, 24),
            },
            data_crc32: read_u32(buf, 32),
            total_file_size: read_u64(buf, 36),
            footer_crc32: read_u32(buf, 44),
        }
    }
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}

// ------------------------------------------------------------------------------------------------
// Segment — immutable reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable sorted table of entries.
#[derive(Debug)]
pub struct Segment {
    /// Unique id assigned by the manager. Higher ids shadow lower ones.
    id: u64,

    /// Memory-mapped file containing the full segment bytes.
    mmap: Mmap,

    /// Serialized bloom filter bytes over all point keys.
    bloom: Vec<u8>,

    /// File offset of every cell, ascending by key.
    offsets: Vec<u64>,

    /// End of the cell region (exclusive).
    data_end: usize,
}

impl Segment {
    /// Returns the path of the data file for segment `id` under `dir`.
    pub fn data_path(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("{id:06}.{DATA_FILE_EXT}"))
    }

    /// Persists a sorted entry stream as segment `id` under `dir`.
    ///
    /// Returns `Ok(false)` — and performs no filesystem mutation — when the
    /// stream is empty, so the caller can skip publishing. The write is
    /// atomic with respect to any concurrent [`Segment::open`]: bytes land in
    /// a temporary file which is fsynced and renamed into place.
    ///
    /// The input must be sorted by key with no duplicate keys; the resulting
    /// file will fail to open otherwise.
    pub fn save(
        dir: &Path,
        id: u64,
        entries: impl IntoIterator<Item = Entry>,
    ) -> Result<bool, SegmentError> {
        SegmentWriter::new(Self::data_path(dir, id)).build(entries.into_iter())
    }

    /// Opens segment `id` under `dir`, verifying every structural block.
    ///
    /// # Overview
    ///
    /// 1. **Open and mmap the file** — the whole table is mapped read-only
    ///    for zero-copy access.
    /// 2. **Decode and verify the header** — magic, version, CRC32.
    /// 3. **Decode and verify the footer** — CRC32, recorded file size.
    /// 4. **Load the bloom and offsets blocks** — each carries its own CRC32.
    /// 5. **Verify the cell region** — CRC32 over all cell bytes, then every
    ///    cell boundary and the strict key ordering are checked once, so the
    ///    read paths can slice the map without re-validating.
    ///
    /// # Errors
    ///
    /// [`SegmentError::ChecksumMismatch`] when any CRC fails;
    /// [`SegmentError::Internal`] for truncated files, magic/version
    /// mismatches, out-of-range blocks, malformed cells, or unsorted keys.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe because the file
    /// is never written after creation, the map is read-only, and all cell
    /// boundaries are verified before any slicing.
    pub fn open(dir: &Path, id: u64) -> Result<Self, SegmentError> {
        let path = Self::data_path(dir, id);
        let file = File::open(&path)?;

        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < SEG_HDR_SIZE + SEG_FOOTER_SIZE {
            return Err(SegmentError::Internal("File too small".into()));
        }

        // Header: magic + version, CRC over both.
        if crc32(&mmap[..8]) != read_u32(&mmap, 8) {
            return Err(SegmentError::ChecksumMismatch);
        }
        if mmap[0..4] != SEG_MAGIC {
            return Err(SegmentError::Internal("Segment header magic mismatch".into()));
        }
        if read_u32(&mmap, 4) != SEG_VERSION {
            return Err(SegmentError::Internal(
                "Segment header version mismatch".into(),
            ));
        }

        // Footer.
        let footer_start = file_len - SEG_FOOTER_SIZE;
        let mut footer_bytes = [0u8; SEG_FOOTER_SIZE];
        footer_bytes.copy_from_slice(&mmap[footer_start..]);
        let footer = SegmentFooter::decode(&footer_bytes);

        if crc32(&footer_bytes[..SEG_FOOTER_SIZE - 4]) != footer.footer_crc32 {
            return Err(SegmentError::ChecksumMismatch);
        }
        if footer.total_file_size != file_len as u64 {
            return Err(SegmentError::Internal(
                "Segment footer file size mismatch".into(),
            ));
        }

        // Bloom and offsets blocks.
        let bloom = Self::read_block_bytes(&mmap, &footer.bloom)?;

        let offsets_bytes = Self::read_block_bytes(&mmap, &footer.offsets)?;
        if offsets_bytes.is_empty() || offsets_bytes.len() % 8 != 0 {
            return Err(SegmentError::Internal("Malformed offsets block".into()));
        }
        let offsets: Vec<u64> = offsets_bytes
            .chunks_exact(8)
            .map(|chunk| read_u64(chunk, 0))
            .collect();

        // Cell region integrity.
        let data_end = usize::try_from(footer.bloom.offset)
            .map_err(|_| SegmentError::Internal("Cell region exceeds addressable range".into()))?;
        if data_end < SEG_HDR_SIZE || data_end > footer_start {
            return Err(SegmentError::Internal("Cell region out of range".into()));
        }
        if crc32(&mmap[SEG_HDR_SIZE..data_end]) != footer.data_crc32 {
            return Err(SegmentError::ChecksumMismatch);
        }

        let segment = Self {
            id,
            mmap,
            bloom,
            offsets,
            data_end,
        };
        segment.validate_cells()?;

        Ok(segment)
    }

    /// Checks every cell boundary and the strict ascending key order once.
    ///
    /// After this passes, `key_at` / `entry_at` may slice the map directly.
    fn validate_cells(&self) -> Result<(), SegmentError> {
        let mut prev_end = SEG_HDR_SIZE;
        let mut prev_key: Option<&[u8]> = None;

        for &offset in &self.offsets {
            let off = usize::try_from(offset)
                .map_err(|_| SegmentError::Internal("Cell offset exceeds addressable range".into()))?;
            if off != prev_end {
                return Err(SegmentError::Internal("Cell offsets not contiguous".into()));
            }
            if off + SEG_CELL_HDR_SIZE > self.data_end {
                return Err(SegmentError::Internal("Cell header out of range".into()));
            }

            let key_len = read_u32(&self.mmap, off) as usize;
            let value_len = read_u32(&self.mmap, off + 4) as usize;
            let flags = self.mmap[off + 8];

            if flags & SEG_CELL_FLAG_TOMBSTONE != 0 && value_len != 0 {
                return Err(SegmentError::Internal("Tombstone cell carries value".into()));
            }

            let end = off + SEG_CELL_HDR_SIZE + key_len + value_len;
            if end > self.data_end {
                return Err(SegmentError::Internal("Cell body out of range".into()));
            }

            let key = &self.mmap[off + SEG_CELL_HDR_SIZE..off + SEG_CELL_HDR_SIZE + key_len];
            if let Some(prev) = prev_key
                && prev >= key
            {
                return Err(SegmentError::Internal("Cell keys not strictly sorted".into()));
            }
            prev_key = Some(key);
            prev_end = end;
        }

        if prev_end != self.data_end {
            return Err(SegmentError::Internal(
                "Trailing bytes after last cell".into(),
            ));
        }
        if self.offsets.is_empty() {
            return Err(SegmentError::Internal("Segment contains no entries".into()));
        }

        Ok(())
    }

    /// Returns the id of this segment.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the number of entries stored in this segment. Never zero —
    /// empty segments are never persisted.
    pub fn entry_count(&self) -> usize {
        self.offsets.len()
    }

    /// Checks whether `key` *might* exist in this segment according to the
    /// bloom filter.
    ///
    /// Returns `false` only when the filter definitively excludes the key;
    /// a missing or corrupted filter cannot exclude anything.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.bloom.is_empty() {
            return true;
        }
        match Bloom::from_slice(&self.bloom) {
            Ok(bloom) => bloom.check(key),
            Err(_) => true,
        }
    }

    /// Performs a point lookup of `key` in this segment alone.
    ///
    /// A tombstone entry is a positive result here — shadowing across
    /// segments is the manager's concern.
    pub fn find_entry(&self, key: &[u8]) -> Option<Entry> {
        if !self.may_contain(key) {
            return None;
        }

        let idx = self.lower_bound(key);
        if idx < self.offsets.len() && self.key_at(idx) == key {
            Some(self.entry_at(idx))
        } else {
            None
        }
    }

    /// Returns a lazy, forward-only iterator over entries with
    /// `from <= key < to`; a `None` bound is unbounded on that side.
    pub fn find_entries(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> SegmentEntries<&Segment> {
        SegmentEntries::new(self, from, to)
    }

    /// Index of the first entry whose key is `>= key`.
    pub(crate) fn lower_bound(&self, key: &[u8]) -> usize {
        self.offsets
            .partition_point(|&offset| self.key_at_offset(offset as usize) < key)
    }

    /// Key bytes of the cell starting at `offset`. Bounds were validated at
    /// open.
    fn key_at_offset(&self, offset: usize) -> &[u8] {
        let key_len = read_u32(&self.mmap, offset) as usize;
        &self.mmap[offset + SEG_CELL_HDR_SIZE..offset + SEG_CELL_HDR_SIZE + key_len]
    }

    /// Key bytes of the `idx`-th entry.
    pub(crate) fn key_at(&self, idx: usize) -> &[u8] {
        self.key_at_offset(self.offsets[idx] as usize)
    }

    /// Decodes the `idx`-th entry into an owned [`Entry`].
    pub(crate) fn entry_at(&self, idx: usize) -> Entry {
        let off = self.offsets[idx] as usize;
        let key_len = read_u32(&self.mmap, off) as usize;
        let value_len = read_u32(&self.mmap, off + 4) as usize;
        let flags = self.mmap[off + 8];

        let key_start = off + SEG_CELL_HDR_SIZE;
        let key = self.mmap[key_start..key_start + key_len].to_vec();

        let value = if flags & SEG_CELL_FLAG_TOMBSTONE != 0 {
            None
        } else {
            Some(self.mmap[key_start + key_len..key_start + key_len + value_len].to_vec())
        };

        Entry { key, value }
    }

    /// Reads a block referenced by a [`BlockHandle`] from the mmap and
    /// verifies its checksum.
    pub(crate) fn read_block_bytes(
        mmap: &Mmap,
        handle: &BlockHandle,
    ) -> Result<Vec<u8>, SegmentError> {
        let start = usize::try_from(handle.offset)
            .map_err(|_| SegmentError::Internal("Block offset exceeds addressable range".into()))?;
        let size = usize::try_from(handle.size)
            .map_err(|_| SegmentError::Internal("Block size exceeds addressable range".into()))?;

        if size < SEG_BLOCK_LEN_SIZE + SEG_BLOCK_CHECKSUM_SIZE || start + size > mmap.len() {
            return Err(SegmentError::Internal("Block out of range".into()));
        }

        let content_len = read_u32(mmap, start) as usize;
        if content_len != size - SEG_BLOCK_LEN_SIZE - SEG_BLOCK_CHECKSUM_SIZE {
            return Err(SegmentError::Internal("Block length mismatch".into()));
        }

        let content_start = start + SEG_BLOCK_LEN_SIZE;
        let content = &mmap[content_start..content_start + content_len];
        let stored_checksum = read_u32(mmap, content_start + content_len);

        if crc32(content) != stored_checksum {
            return Err(SegmentError::ChecksumMismatch);
        }

        Ok(content.to_vec())
    }
}

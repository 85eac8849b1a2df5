//! Segment writer — builds a complete segment file from a sorted entry stream.
//!
//! [`SegmentWriter`] consumes one sorted stream of [`Entry`] values (puts and
//! tombstones) and writes a fully-structured segment: header, cells, bloom
//! filter block, offsets block, and footer.
//!
//! # Input requirements
//!
//! The entry stream **must be sorted by key with no duplicates** — the
//! manager's save path receives already-sorted batches (a write buffer flush
//! or the compaction merge output), so the writer does not sort.
//!
//! # Output guarantees
//!
//! - Every cell offset is recorded for binary search.
//! - The bloom filter covers all keys, tombstones included.
//! - Cell region, bloom, offsets, header, and footer are all CRC32-checked.
//!
//! # Atomicity
//!
//! 1. Write everything to `<path>.tmp`.
//! 2. Flush and sync the file.
//! 3. Rename `<path>.tmp` → `<path>` atomically.
//!
//! A crash cannot produce a partially-written segment; a leftover `.tmp`
//! file is residue, removed by the next directory scan.

use std::{
    fs::{OpenOptions, rename},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;

use crate::entry::Entry;

use super::{
    BlockHandle, SEG_BLOCK_CHECKSUM_SIZE, SEG_BLOCK_LEN_SIZE, SEG_BLOOM_FP_RATE,
    SEG_CELL_FLAG_TOMBSTONE, SEG_FOOTER_SIZE, SEG_HDR_SIZE, SEG_MAGIC, SEG_VERSION, SegmentError,
    SegmentFooter,
};

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

/// Writes a checksummed block: `[len_le (4 B)][data][crc32_le (4 B)]`.
///
/// `position` is the running file offset, advanced past the block. Returns
/// the handle of the full block footprint.
fn write_checksummed_block(
    writer: &mut impl Write,
    position: &mut u64,
    data: &[u8],
) -> Result<BlockHandle, SegmentError> {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let checksum = hasher.finalize();

    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(data)?;
    writer.write_all(&checksum.to_le_bytes())?;

    let handle = BlockHandle {
        offset: *position,
        size: (SEG_BLOCK_LEN_SIZE + data.len() + SEG_BLOCK_CHECKSUM_SIZE) as u64,
    };
    *position += handle.size;
    Ok(handle)
}

/// Writes the segment header: magic, version, CRC32 over both.
fn write_header(writer: &mut impl Write, position: &mut u64) -> Result<(), SegmentError> {
    let mut bytes = [0u8; 8];
    bytes[0..4].copy_from_slice(&SEG_MAGIC);
    bytes[4..8].copy_from_slice(&SEG_VERSION.to_le_bytes());

    let mut hasher = Crc32::new();
    hasher.update(&bytes);
    let crc = hasher.finalize();

    writer.write_all(&bytes)?;
    writer.write_all(&crc.to_le_bytes())?;
    *position += SEG_HDR_SIZE as u64;
    Ok(())
}

/// Encodes one cell: `key_len | value_len | flags | key | value`.
fn encode_cell(entry: &Entry, buf: &mut Vec<u8>) {
    buf.clear();
    let value = entry.value.as_deref().unwrap_or_default();
    let flags = if entry.is_tombstone() {
        SEG_CELL_FLAG_TOMBSTONE
    } else {
        0
    };

    buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.push(flags);
    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(value);
}

// ------------------------------------------------------------------------------------------------
// SegmentWriter — public entry point
// ------------------------------------------------------------------------------------------------

/// Builds a complete segment file on disk.
pub struct SegmentWriter {
    path: PathBuf,
}

impl SegmentWriter {
    /// Create a writer targeting the given output path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Consume a sorted entry stream and write a complete segment.
    ///
    /// Returns `Ok(false)` without touching the filesystem when the stream
    /// is empty — the "failure to produce" signal, distinct from an I/O
    /// error — and `Ok(true)` once the file is durably in place.
    pub fn build(self, entries: impl Iterator<Item = Entry>) -> Result<bool, SegmentError> {
        let mut entries = entries.peekable();
        if entries.peek().is_none() {
            return Ok(false);
        }

        let final_path: &Path = self.path.as_ref();
        let tmp_path = final_path.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(&file);
        let mut position = 0u64;

        // 1. Header.
        write_header(&mut writer, &mut position)?;

        // 2. Cells — tracking offsets, keys (for the bloom filter sized
        //    after the pass), and the region checksum.
        let mut offsets = Vec::<u64>::new();
        let mut keys = Vec::<Vec<u8>>::new();
        let mut data_hasher = Crc32::new();
        let mut cell_buf = Vec::new();

        for entry in entries {
            offsets.push(position);
            encode_cell(&entry, &mut cell_buf);
            writer.write_all(&cell_buf)?;
            data_hasher.update(&cell_buf);
            position += cell_buf.len() as u64;
            keys.push(entry.key);
        }
        let data_crc32 = data_hasher.finalize();

        // 3. Bloom filter block.
        let mut bloom: Bloom<[u8]> = Bloom::new_for_fp_rate(keys.len(), SEG_BLOOM_FP_RATE)
            .map_err(|e| SegmentError::Internal(e.to_string()))?;
        for key in &keys {
            bloom.set(key);
        }
        let bloom_handle = write_checksummed_block(&mut writer, &mut position, bloom.as_slice())?;

        // 4. Offsets block.
        let mut offsets_bytes = Vec::with_capacity(offsets.len() * 8);
        for offset in &offsets {
            offsets_bytes.extend_from_slice(&offset.to_le_bytes());
        }
        let offsets_handle = write_checksummed_block(&mut writer, &mut position, &offsets_bytes)?;

        // 5. Footer.
        let mut footer = SegmentFooter {
            bloom: bloom_handle,
            offsets: offsets_handle,
            data_crc32,
            total_file_size: position + SEG_FOOTER_SIZE as u64,
            footer_crc32: 0,
        };
        let encoded = footer.encode();
        let mut hasher = Crc32::new();
        hasher.update(&encoded[..SEG_FOOTER_SIZE - 4]);
        footer.footer_crc32 = hasher.finalize();
        writer.write_all(&footer.encode())?;

        // 6. Flush, sync, and atomically publish.
        writer.flush()?;
        drop(writer);
        file.sync_all()?;
        rename(&tmp_path, final_path)?;

        Ok(true)
    }
}

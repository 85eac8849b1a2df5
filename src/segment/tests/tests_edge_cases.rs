//! Corruption and malformed-file tests.
//!
//! `Segment::open` must reject anything that is not a complete, internally
//! consistent segment: truncated files, flipped bits, and files that are
//! too small to carry the fixed structures.

#[cfg(test)]
mod tests {
    use crate::entry::Entry;
    use crate::segment::{Segment, SegmentError};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn build_segment(dir: &std::path::Path) {
        Segment::save(
            dir,
            0,
            vec![
                Entry::new("alpha", "1"),
                Entry::new("beta", "2"),
                Entry::new("gamma", "3"),
            ],
        )
        .unwrap();
    }

    /// Flips one byte of the data file at `offset`.
    fn flip_byte(dir: &std::path::Path, offset: u64) {
        let path = Segment::data_path(dir, 0);
        let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        file.sync_all().unwrap();
    }

    /// # Scenario
    /// A flipped byte inside the cell region must fail the region checksum.
    ///
    /// # Expected behavior
    /// `Segment::open` returns `SegmentError::ChecksumMismatch`.
    #[test]
    fn open_rejects_corrupted_cells() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        build_segment(tmp.path());
        flip_byte(tmp.path(), 20); // inside the first cell

        let err = Segment::open(tmp.path(), 0).unwrap_err();
        assert!(matches!(err, SegmentError::ChecksumMismatch));
    }

    /// # Scenario
    /// A flipped byte in the header must fail the header checksum.
    #[test]
    fn open_rejects_corrupted_header() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        build_segment(tmp.path());
        flip_byte(tmp.path(), 1); // inside the magic

        let err = Segment::open(tmp.path(), 0).unwrap_err();
        assert!(matches!(err, SegmentError::ChecksumMismatch));
    }

    /// # Scenario
    /// Truncation strips the footer; whatever bytes now sit at the end
    /// cannot pass the footer checks.
    #[test]
    fn open_rejects_truncated_file() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        build_segment(tmp.path());

        let path = Segment::data_path(tmp.path(), 0);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();
        file.sync_all().unwrap();

        assert!(Segment::open(tmp.path(), 0).is_err());
    }

    /// # Scenario
    /// A file shorter than header + footer cannot be a segment at all.
    ///
    /// # Expected behavior
    /// `SegmentError::Internal` ("File too small"), not a panic.
    #[test]
    fn open_rejects_tiny_file() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        std::fs::write(Segment::data_path(tmp.path(), 0), b"not a segment").unwrap();

        let err = Segment::open(tmp.path(), 0).unwrap_err();
        assert!(matches!(err, SegmentError::Internal(_)));
    }

    /// # Scenario
    /// Opening an id with no file behind it is an I/O error, distinguishable
    /// from corruption.
    #[test]
    fn open_missing_file() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let err = Segment::open(tmp.path(), 42).unwrap_err();
        assert!(matches!(err, SegmentError::Io(_)));
    }

    /// # Scenario
    /// Keys and values containing every byte value, including 0x00 and 0xFF,
    /// must round-trip unchanged — the format is length-prefixed, not
    /// delimiter-based.
    #[test]
    fn binary_keys_and_values_roundtrip() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let all_bytes: Vec<u8> = (0..=255u8).collect();
        let entries = vec![
            Entry::new(vec![0u8, 0, 1], all_bytes.clone()),
            Entry::new(vec![0xFFu8, 0x00], vec![]),
        ];

        Segment::save(tmp.path(), 0, entries.clone()).unwrap();
        let segment = Segment::open(tmp.path(), 0).unwrap();

        for entry in &entries {
            assert_eq!(segment.find_entry(&entry.key).as_ref(), Some(entry));
        }
    }
}

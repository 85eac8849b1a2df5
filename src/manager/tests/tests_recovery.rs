//! Startup recovery tests: directory scan, id recovery, residue removal.

#[cfg(test)]
mod tests {
    use crate::entry::Entry;
    use crate::manager::{ManagerConfig, SegmentManager};
    use crate::segment::Segment;
    use std::fs;
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn open(dir: &std::path::Path) -> SegmentManager {
        SegmentManager::open(dir, ManagerConfig::default()).expect("open")
    }

    /// # Scenario
    /// Data written through the manager survives close → reopen, ids and
    /// shadowing intact.
    #[test]
    fn reopen_recovers_state() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let manager = open(tmp.path());
        manager.save_entries(vec![Entry::new("k", "old")]).unwrap();
        manager.save_entries(vec![Entry::new("k", "new")]).unwrap();
        manager.close();

        let manager = open(tmp.path());
        assert_eq!(manager.segment_ids().unwrap(), vec![1, 0]);
        assert_eq!(
            manager.get(b"k").unwrap().unwrap().value.as_deref(),
            Some(&b"new"[..])
        );

        // The id counter resumes past the recovered maximum.
        assert_eq!(
            manager.save_entries(vec![Entry::new("x", "y")]).unwrap(),
            Some(2)
        );
        manager.close();
    }

    /// # Scenario
    /// A directory seeded with segment files for ids {0, 2, 5} plus
    /// unrelated residue.
    ///
    /// # Actions
    /// 1. Write segments 0, 2, 5 directly via `Segment::save`.
    /// 2. Drop a stray text file, a leftover `.tmp`, and a `.seg` file whose
    ///    stem is not an integer.
    /// 3. `SegmentManager::open`.
    ///
    /// # Expected behavior
    /// - Active ids are exactly {5, 2, 0} (newest first).
    /// - All residue files are removed.
    /// - The next unreserved save produces id 6.
    #[test]
    fn open_recovers_sparse_ids_and_removes_residue() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        for id in [0u64, 2, 5] {
            Segment::save(tmp.path(), id, vec![Entry::new(format!("key-{id}"), "v")]).unwrap();
        }
        fs::write(tmp.path().join("notes.txt"), b"stray").unwrap();
        fs::write(tmp.path().join("000009.tmp"), b"half-written").unwrap();
        fs::write(tmp.path().join("junk.seg"), b"not a segment id").unwrap();

        let manager = open(tmp.path());

        assert_eq!(manager.segment_ids().unwrap(), vec![5, 2, 0]);
        assert!(!tmp.path().join("notes.txt").exists());
        assert!(!tmp.path().join("000009.tmp").exists());
        assert!(!tmp.path().join("junk.seg").exists());

        for id in [0u64, 2, 5] {
            assert!(manager.get(format!("key-{id}").as_bytes()).unwrap().is_some());
        }

        assert_eq!(
            manager.save_entries(vec![Entry::new("new", "v")]).unwrap(),
            Some(6)
        );
        manager.close();
    }

    /// # Scenario
    /// A corrupt file that *looks* like a segment fails the open scan — the
    /// manager refuses to start rather than silently dropping data.
    #[test]
    fn open_fails_on_corrupt_segment() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        Segment::save(tmp.path(), 0, vec![Entry::new("k", "v")]).unwrap();

        // Stomp the middle of the file.
        let path = Segment::data_path(tmp.path(), 0);
        let bytes = fs::read(&path).unwrap();
        let mut stomped = bytes.clone();
        stomped[bytes.len() / 2] ^= 0xFF;
        fs::write(&path, stomped).unwrap();

        assert!(SegmentManager::open(tmp.path(), ManagerConfig::default()).is_err());
    }

    /// # Scenario
    /// Dropping the handle without `close()` still releases background
    /// workers; the directory reopens cleanly.
    #[test]
    fn drop_without_close() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let manager = open(tmp.path());
        manager.save_entries(vec![Entry::new("k", "v")]).unwrap();
        drop(manager); // Drop handles cleanup

        let manager = open(tmp.path());
        assert!(manager.get(b"k").unwrap().is_some());
        manager.close();
    }
}

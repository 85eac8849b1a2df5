//! Intra-segment point lookup tests.
//!
//! A single segment resolves a key via bloom filter, binary search over the
//! offsets array, and exact-match check. Tombstones are positive results at
//! this layer — cross-segment shadowing is the manager's concern.

#[cfg(test)]
mod tests {
    use crate::entry::Entry;
    use crate::segment::Segment;
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    /// Builds a segment with `count` sequential zero-padded keys.
    fn sequential_segment(dir: &std::path::Path, count: u64) -> Segment {
        let entries: Vec<Entry> = (0..count)
            .map(|i| Entry::new(format!("key-{i:06}"), format!("value-{i}")))
            .collect();
        Segment::save(dir, 0, entries).unwrap();
        Segment::open(dir, 0).unwrap()
    }

    /// # Scenario
    /// Look up every key of a populated segment plus keys before, between,
    /// and after the stored range.
    ///
    /// # Expected behavior
    /// Every stored key resolves to its value; probes that fall outside or
    /// between stored keys return `None`.
    #[test]
    fn get_hits_and_misses() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let segment = sequential_segment(tmp.path(), 100);

        for i in 0..100u64 {
            let entry = segment
                .find_entry(format!("key-{i:06}").as_bytes())
                .expect("stored key must resolve");
            assert_eq!(entry.value.as_deref(), Some(format!("value-{i}").as_bytes()));
        }

        assert_eq!(segment.find_entry(b"key-"), None); // before first
        assert_eq!(segment.find_entry(b"key-000000x"), None); // between keys
        assert_eq!(segment.find_entry(b"key-999999"), None); // past last
    }

    /// # Scenario
    /// First and last keys are the binary-search boundary cases.
    ///
    /// # Expected behavior
    /// Both resolve correctly.
    #[test]
    fn get_boundary_keys() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let segment = sequential_segment(tmp.path(), 17);

        assert!(segment.find_entry(b"key-000000").is_some());
        assert!(segment.find_entry(b"key-000016").is_some());
    }

    /// # Scenario
    /// A tombstone is a positive lookup result within one segment.
    ///
    /// # Actions
    /// 1. Save `{alive: 1, dead: ⊥}`.
    /// 2. Look both keys up.
    ///
    /// # Expected behavior
    /// `alive` resolves to its value, `dead` resolves to a tombstone entry
    /// (not `None`).
    #[test]
    fn get_reports_tombstone() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        Segment::save(
            tmp.path(),
            0,
            vec![Entry::new("alive", "1"), Entry::tombstone("dead")],
        )
        .unwrap();
        let segment = Segment::open(tmp.path(), 0).unwrap();

        assert_eq!(
            segment.find_entry(b"alive").unwrap().value.as_deref(),
            Some(&b"1"[..])
        );

        let dead = segment.find_entry(b"dead").expect("tombstone is a hit");
        assert!(dead.is_tombstone());
    }

    /// # Scenario
    /// A single-entry segment — the degenerate binary-search case.
    ///
    /// # Expected behavior
    /// The one key resolves; neighbours on either side miss.
    #[test]
    fn get_single_entry_segment() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        Segment::save(tmp.path(), 0, vec![Entry::new("only", "one")]).unwrap();
        let segment = Segment::open(tmp.path(), 0).unwrap();

        assert!(segment.find_entry(b"only").is_some());
        assert_eq!(segment.find_entry(b"onl"), None);
        assert_eq!(segment.find_entry(b"onlz"), None);
    }
}

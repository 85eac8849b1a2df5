//! Tombstone filter tests.

#[cfg(test)]
mod tests {
    use crate::entry::Entry;
    use crate::merge::TombstoneFilter;

    /// # Scenario
    /// Tombstones disappear from the stream; live entries pass through in
    /// order.
    #[test]
    fn drops_tombstones_keeps_values() {
        let stream = vec![
            Entry::new("a", "1"),
            Entry::tombstone("b"),
            Entry::new("c", "3"),
            Entry::tombstone("d"),
        ];

        let filtered: Vec<_> = TombstoneFilter::new(stream.into_iter()).collect();
        assert_eq!(filtered, vec![Entry::new("a", "1"), Entry::new("c", "3")]);
    }

    /// # Scenario
    /// An all-tombstone stream filters down to nothing — the "merge yields
    /// zero entries" compaction case.
    #[test]
    fn all_tombstones_yield_empty_stream() {
        let stream = vec![Entry::tombstone("a"), Entry::tombstone("b")];

        let mut filtered = TombstoneFilter::new(stream.into_iter());
        assert_eq!(filtered.next(), None);
    }

    /// # Scenario
    /// An empty value is *not* a tombstone; the filter must keep it.
    #[test]
    fn empty_value_is_not_a_tombstone() {
        let stream = vec![Entry::new("a", Vec::<u8>::new())];

        let filtered: Vec<_> = TombstoneFilter::new(stream.into_iter()).collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].value.as_deref(), Some(&[][..]));
    }
}

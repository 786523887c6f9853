//! Dedup batch ingestion
//!
//! Each file is written inside one gated transaction. Rows are buffered in a
//! [`DedupBatch`] keyed by their composite identity; a repeated key replaces
//! the earlier row in place, and a full batch is flushed as one bulk
//! `INSERT .. ON CONFLICT DO UPDATE`. Re-ingesting an unchanged file leaves
//! the stored rows unchanged apart from `updated_at`.

pub mod entities;
pub mod po;
pub mod stock;

use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

pub use entities::EntityIds;
pub use po::{parse_po_file, parse_po_timestamp, PoField, PoRecord, PoSnapshotStore};
pub use stock::StockSnapshotWriter;

/// Per-file ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Rows read from the file
    pub rows: usize,
    /// Rows sent to the database after in-batch dedup
    pub upserted: usize,
    /// Rows replaced by a later row with the same key
    pub duplicates: usize,
    pub batches: usize,
}

impl IngestStats {
    pub fn merge(&mut self, other: IngestStats) {
        self.rows += other.rows;
        self.upserted += other.upserted;
        self.duplicates += other.duplicates;
        self.batches += other.batches;
    }
}

/// Rows buffered for one flush, unique by key, in first-seen key order
#[derive(Debug)]
pub struct DedupBatch<K, R> {
    capacity: usize,
    index: HashMap<K, usize>,
    rows: Vec<R>,
}

impl<K: Eq + Hash, R> DedupBatch<K, R> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            index: HashMap::with_capacity(capacity),
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Add `row` under `key`. Returns `true` when it replaced an earlier row.
    pub fn push(&mut self, key: K, row: R) -> bool {
        match self.index.get(&key) {
            Some(&pos) => {
                self.rows[pos] = row;
                true
            },
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push(row);
                false
            },
        }
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drain the buffered rows, leaving the batch empty for reuse.
    pub fn take(&mut self) -> Vec<R> {
        self.index.clear();
        std::mem::replace(&mut self.rows, Vec::with_capacity(self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_row_replaces_earlier() {
        let mut batch = DedupBatch::new(10);
        assert!(!batch.push(("2025-03-01", "JAMBI", "X-1"), 1));
        assert!(!batch.push(("2025-03-01", "JAMBI", "X-2"), 2));
        assert!(batch.push(("2025-03-01", "JAMBI", "X-1"), 3));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.take(), vec![3, 2]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_full_counts_unique_keys() {
        let mut batch = DedupBatch::new(2);
        batch.push("a", 1);
        batch.push("a", 2);
        assert!(!batch.is_full());
        batch.push("b", 3);
        assert!(batch.is_full());

        batch.take();
        assert!(!batch.push("a", 4));
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let mut batch: DedupBatch<&str, i32> = DedupBatch::new(0);
        batch.push("a", 1);
        assert!(batch.is_full());
    }

    #[test]
    fn test_stats_merge() {
        let mut total = IngestStats::default();
        total.merge(IngestStats {
            rows: 5,
            upserted: 4,
            duplicates: 1,
            batches: 1,
        });
        total.merge(IngestStats {
            rows: 2,
            upserted: 2,
            duplicates: 0,
            batches: 1,
        });
        assert_eq!(total.rows, 7);
        assert_eq!(total.upserted, 6);
        assert_eq!(total.batches, 2);
    }
}

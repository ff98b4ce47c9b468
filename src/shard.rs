use crate::model::GraphRecordId;
use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// Half-open id range `[start, end)` scanned end-to-end by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Shard {
    /// Position of the shard in the phase, starting at 0.
    pub index: usize,
    pub start: GraphRecordId,
    pub end: GraphRecordId,
}

impl Shard {
    pub fn ids(&self) -> Range<GraphRecordId> {
        self.start..self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Batch {} [{}, {})", self.index, self.start, self.end)
    }
}

/// Splits `[0, highest]` into consecutive shards of `batch_size` ids.
///
/// Only the last shard may be shorter. `None` (an empty id space) and a zero
/// `batch_size` both yield no shards.
pub fn shard(highest: Option<GraphRecordId>, batch_size: u64) -> Shards {
    let end = match highest {
        Some(highest) if batch_size > 0 => highest.saturating_add(1),
        _ => 0,
    };
    Shards {
        next: 0,
        end,
        batch_size: batch_size.max(1),
        index: 0,
    }
}

/// Number of shards [`shard`] yields for the same arguments.
pub fn shard_count(highest: Option<GraphRecordId>, batch_size: u64) -> usize {
    match highest {
        Some(highest) if batch_size > 0 => highest.saturating_add(1).div_ceil(batch_size) as usize,
        _ => 0,
    }
}

#[derive(Debug, Clone)]
pub struct Shards {
    next: GraphRecordId,
    end: GraphRecordId,
    batch_size: u64,
    index: usize,
}

impl Iterator for Shards {
    type Item = Shard;

    fn next(&mut self) -> Option<Shard> {
        if self.next >= self.end {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.batch_size).min(self.end);
        let shard = Shard {
            index: self.index,
            start,
            end,
        };
        self.next = end;
        self.index += 1;
        Some(shard)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next).div_ceil(self.batch_size) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Shards {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(highest: u64, batch_size: u64) {
        let shards: Vec<Shard> = shard(Some(highest), batch_size).collect();
        assert_eq!(shards.len(), shard_count(Some(highest), batch_size));
        assert_eq!(shards.first().map(|s| s.start), Some(0));
        assert_eq!(shards.last().map(|s| s.end), Some(highest + 1));
        for pair in shards.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap at {}", pair[0]);
        }
        for (i, s) in shards.iter().enumerate() {
            assert_eq!(s.index, i);
            assert!(!s.is_empty());
            if i + 1 < shards.len() {
                assert_eq!(s.len(), batch_size);
            } else {
                assert!(s.len() <= batch_size);
            }
        }
        let covered: u64 = shards.iter().map(Shard::len).sum();
        assert_eq!(covered, highest + 1);
    }

    #[test]
    fn shards_partition_the_id_space() {
        for highest in [0, 1, 2, 9, 10, 11, 99, 1_000, 1_234_567] {
            for batch_size in [1, 2, 3, 7, 10, 500_000] {
                assert_partition(highest, batch_size);
            }
        }
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let shards: Vec<Shard> = shard(Some(9), 5).collect();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[1].ids(), 5..10);
    }

    #[test]
    fn empty_id_space_yields_nothing() {
        assert_eq!(shard(None, 10).count(), 0);
        assert_eq!(shard_count(None, 10), 0);
        assert_eq!(shard(Some(10), 0).count(), 0);
    }

    #[test]
    fn sharding_is_deterministic() {
        let a: Vec<Shard> = shard(Some(12_345), 1_000).collect();
        let b: Vec<Shard> = shard(Some(12_345), 1_000).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn size_hint_is_exact() {
        let mut shards = shard(Some(24), 10);
        assert_eq!(shards.len(), 3);
        shards.next();
        assert_eq!(shards.len(), 2);
    }

    #[test]
    fn single_id_space() {
        let shards: Vec<Shard> = shard(Some(0), 500_000).collect();
        assert_eq!(shards, vec![Shard { index: 0, start: 0, end: 1 }]);
    }
}

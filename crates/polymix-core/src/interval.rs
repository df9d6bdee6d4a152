//! Ordered map over half-open integer intervals.
//!
//! Keys are interval begins; values are the chunks occupying them. Overlap
//! predicates use strict half-open semantics, so `[0, 5)` and `[5, 10)` do
//! not overlap.
//!
//! The map itself does not reject overlapping insertions; the layout engine
//! runs an overlap query before every insert and keeps the stored set
//! disjoint. Queries lean on that invariant: with disjoint intervals sorted
//! by begin, the ends are sorted too, and the intervals intersecting a range
//! form a contiguous run.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::chunk::Chunk;

/// One stored interval, as returned by queries.
#[derive(Debug, Clone)]
pub struct Interval {
    pub begin: i64,
    pub end: i64,
    pub chunk: Rc<Chunk>,
}

#[derive(Debug, Clone)]
struct Entry {
    end: i64,
    chunk: Rc<Chunk>,
}

/// Interval index over the output coordinate space.
#[derive(Debug, Default)]
pub struct IntervalMap {
    by_begin: BTreeMap<i64, Entry>,
}

impl IntervalMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_begin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_begin.is_empty()
    }

    /// Add `[begin, end)` mapping to `chunk`.
    ///
    /// The caller is expected to have checked [`Self::overlaps`] first.
    pub fn insert(&mut self, begin: i64, end: i64, chunk: Rc<Chunk>) {
        self.by_begin.insert(begin, Entry { end, chunk });
    }

    /// True iff any stored interval intersects `[begin, end)`.
    pub fn overlaps(&self, begin: i64, end: i64) -> bool {
        !self.overlap_run(begin, end).is_empty()
    }

    /// All stored intervals intersecting `[begin, end)`, ascending by begin.
    pub fn overlap(&self, begin: i64, end: i64) -> Vec<Interval> {
        self.overlap_run(begin, end)
            .into_iter()
            .map(|(b, entry)| Interval {
                begin: b,
                end: entry.end,
                chunk: Rc::clone(&entry.chunk),
            })
            .collect()
    }

    /// Split every interval `[a, b)` with `a < x < b` into `[a, x)` and
    /// `[x, b)`, both keeping the same chunk.
    pub fn slice_at(&mut self, x: i64) {
        let straddler = self
            .by_begin
            .range(..x)
            .next_back()
            .filter(|(_, entry)| entry.end > x)
            .map(|(&begin, entry)| (begin, entry.clone()));

        if let Some((begin, entry)) = straddler {
            self.by_begin.insert(
                begin,
                Entry {
                    end: x,
                    chunk: Rc::clone(&entry.chunk),
                },
            );
            self.by_begin.insert(x, entry);
        }
    }

    /// Delete and return every stored interval intersecting `[begin, end)`,
    /// ascending by begin.
    pub fn remove_overlap(&mut self, begin: i64, end: i64) -> Vec<Interval> {
        let hits = self.overlap(begin, end);
        for hit in &hits {
            self.by_begin.remove(&hit.begin);
        }
        hits
    }

    /// Smallest stored begin
    pub fn min_begin(&self) -> Option<i64> {
        self.by_begin.keys().next().copied()
    }

    /// Largest stored end
    pub fn max_end(&self) -> Option<i64> {
        self.by_begin.values().map(|entry| entry.end).max()
    }

    /// `max_end - min_begin`, or 0 for an empty map
    pub fn span(&self) -> i64 {
        match (self.min_begin(), self.max_end()) {
            (Some(begin), Some(end)) => end - begin,
            _ => 0,
        }
    }

    /// Iterate all intervals ascending by begin.
    pub fn iter(&self) -> impl Iterator<Item = Interval> + '_ {
        self.by_begin.iter().map(|(&begin, entry)| Interval {
            begin,
            end: entry.end,
            chunk: Rc::clone(&entry.chunk),
        })
    }

    /// The contiguous run of entries intersecting `[begin, end)`.
    fn overlap_run(&self, begin: i64, end: i64) -> Vec<(i64, &Entry)> {
        if begin >= end {
            return Vec::new();
        }
        let mut run: Vec<(i64, &Entry)> = self
            .by_begin
            .range(..end)
            .rev()
            .take_while(|(_, entry)| entry.end > begin)
            .map(|(&b, entry)| (b, entry))
            .collect();
        run.reverse();
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SharedBuf;

    fn chunk(size: usize) -> Rc<Chunk> {
        Rc::new(Chunk::fixed(0, size, 0, SharedBuf::zeroed(size)))
    }

    #[test]
    fn abutting_intervals_do_not_overlap() {
        let mut map = IntervalMap::new();
        map.insert(0, 5, chunk(5));
        map.insert(5, 10, chunk(5));
        assert!(!map.overlaps(10, 20));
        assert!(map.overlaps(4, 5));
        assert!(map.overlaps(0, 1));
        assert!(!map.overlaps(10, 10));
        assert_eq!(map.overlap(0, 10).len(), 2);
        assert_eq!(map.overlap(5, 6).len(), 1);
    }

    #[test]
    fn overlap_is_ascending() {
        let mut map = IntervalMap::new();
        map.insert(20, 30, chunk(10));
        map.insert(0, 10, chunk(10));
        map.insert(40, 50, chunk(10));
        let hits = map.overlap(5, 45);
        let begins: Vec<i64> = hits.iter().map(|iv| iv.begin).collect();
        assert_eq!(begins, vec![0, 20, 40]);
    }

    #[test]
    fn overlap_with_negative_coordinates() {
        let mut map = IntervalMap::new();
        map.insert(-22, 0, chunk(22));
        map.insert(0, 100, chunk(100));
        assert!(map.overlaps(-5, -1));
        assert_eq!(map.overlap(-30, 0).len(), 1);
        assert_eq!(map.min_begin(), Some(-22));
        assert_eq!(map.max_end(), Some(100));
        assert_eq!(map.span(), 122);
    }

    #[test]
    fn slice_at_splits_straddler() {
        let mut map = IntervalMap::new();
        let c = chunk(20);
        map.insert(-10, 10, Rc::clone(&c));
        map.slice_at(0);
        let all: Vec<Interval> = map.iter().collect();
        assert_eq!(all.len(), 2);
        assert_eq!((all[0].begin, all[0].end), (-10, 0));
        assert_eq!((all[1].begin, all[1].end), (0, 10));
        assert!(Rc::ptr_eq(&all[0].chunk, &all[1].chunk));
    }

    #[test]
    fn slice_at_boundary_is_noop() {
        let mut map = IntervalMap::new();
        map.insert(0, 5, chunk(5));
        map.insert(5, 10, chunk(5));
        map.slice_at(5);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn remove_overlap_removes_only_hits() {
        let mut map = IntervalMap::new();
        map.insert(0, 5, chunk(5));
        map.insert(10, 15, chunk(5));
        map.insert(20, 25, chunk(5));
        let removed = map.remove_overlap(3, 12);
        assert_eq!(removed.len(), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.min_begin(), Some(20));
    }

    #[test]
    fn span_of_empty_map_is_zero() {
        let map = IntervalMap::new();
        assert_eq!(map.span(), 0);
        assert_eq!(map.min_begin(), None);
        assert_eq!(map.max_end(), None);
    }
}

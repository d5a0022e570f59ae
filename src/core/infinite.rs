//! Cyclic mapping of an unbounded scroll position onto a finite feed.

/// Offset the virtual position starts near; rounded down to a multiple of the
/// feed length so the first item is at index 0.
pub const START_OFFSET: i64 = 1 << 40;

/// Number of positions prefetched ahead and behind by default.
pub const DEFAULT_LOOKAHEAD: usize = 3;
pub const DEFAULT_LOOKBEHIND: usize = 1;

/// Maps virtual positions to indices of a feed of fixed length.
///
/// Built per feed length; rebuild after the feed changes size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfiniteIndexMapper {
    len: usize,
}

impl InfiniteIndexMapper {
    /// `None` for an empty feed.
    pub fn new(len: usize) -> Option<Self> {
        (len > 0).then_some(Self { len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Index in `[0, len)` for any position, negative included.
    pub fn actual_index(&self, virtual_position: i64) -> usize {
        virtual_position.rem_euclid(self.len as i64) as usize
    }

    /// Initial position: a multiple of `len` far from both ends of `i64`.
    pub fn start_position(&self) -> i64 {
        START_OFFSET - START_OFFSET.rem_euclid(self.len as i64)
    }

    /// Indices for positions `v+1..=v+ahead` then `v-1..=v-behind`.
    ///
    /// Duplicates (short feeds) and the index of `v` itself are dropped.
    pub fn window(&self, virtual_position: i64, ahead: usize, behind: usize) -> Vec<usize> {
        let current = self.actual_index(virtual_position);
        let forward = (1..=ahead as i64).map(|d| virtual_position.saturating_add(d));
        let backward = (1..=behind as i64).map(|d| virtual_position.saturating_sub(d));

        let mut out = Vec::with_capacity(ahead + behind);
        for index in forward.chain(backward).map(|v| self.actual_index(v)) {
            if index != current && !out.contains(&index) {
                out.push(index);
            }
        }
        out
    }
}

//! Tree walker protocol and index descent.
//!
//! A [`Walker`] is a small stateful object that is fed index entries during
//! descent and leaf values during the final scan. The same instance drives
//! both phases of a query, so the coarse and fine searches cannot disagree.
//!
//! The descent routines in this module are shared by every sequence type;
//! they only see index entries through [`IndexAccess`].

use crate::config::TreeGeometry;
use crate::layout::TreeLayout;
use crate::value::{IndexValue, PackedSlice, PackedSliceMut};

/// Search/aggregation state machine driven by index descent and leaf scans.
///
/// For every visited entry the driver calls [`compare`](Walker::compare).
/// If it returns `false` the driver calls [`advance`](Walker::advance) to
/// consume the entry and moves on; if it returns `true` the driver stops at
/// (or descends into) that entry without consuming it.
pub trait Walker<V: IndexValue> {
    /// Result produced by [`finish`](Walker::finish).
    type Output;

    /// Called once before the index phase of a query.
    fn prepare_index(&mut self) {}

    /// Offers the next entry. Returns `true` to stop at it.
    fn compare(&mut self, value: V) -> bool;

    /// Consumes the entry last passed to [`compare`](Walker::compare).
    fn advance(&mut self);

    /// Produces the result for leaf position `idx`.
    fn finish(&mut self, idx: usize) -> Self::Output;
}

/// Position and accumulated prefix returned by predicate searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindResult<V> {
    /// Leaf position where the search stopped, or the sequence size when
    /// nothing matched in a forward search.
    pub idx: usize,
    /// Sum of the values passed over before `idx`.
    pub prefix: V,
}

/// Accumulates every entry; never stops early.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumWalker<V> {
    sum: V,
    next: V,
}

impl<V: IndexValue> SumWalker<V> {
    /// Creates a walker with a zero sum.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sum: V::ZERO,
            next: V::ZERO,
        }
    }

    /// Sum accumulated so far.
    #[must_use]
    pub fn sum(&self) -> V {
        self.sum
    }
}

impl<V: IndexValue> Walker<V> for SumWalker<V> {
    type Output = V;

    fn compare(&mut self, value: V) -> bool {
        self.next = value;
        false
    }

    fn advance(&mut self) {
        self.sum = self.sum.add(self.next);
    }

    fn finish(&mut self, _idx: usize) -> V {
        self.sum
    }
}

macro_rules! find_walker {
    ($(#[$doc:meta])* $name:ident, $op:tt) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name<V> {
            target: V,
            sum: V,
            next: V,
        }

        impl<V: IndexValue> $name<V> {
            /// Creates a walker searching for `target`.
            #[must_use]
            pub fn new(target: V) -> Self {
                Self {
                    target,
                    sum: V::ZERO,
                    next: V::ZERO,
                }
            }
        }

        impl<V: IndexValue> Walker<V> for $name<V> {
            type Output = FindResult<V>;

            fn compare(&mut self, value: V) -> bool {
                self.next = value;
                self.sum.add(value) $op self.target
            }

            fn advance(&mut self) {
                self.sum = self.sum.add(self.next);
            }

            fn finish(&mut self, idx: usize) -> FindResult<V> {
                FindResult {
                    idx,
                    prefix: self.sum,
                }
            }
        }
    };
}

find_walker!(
    /// Stops at the first entry where the running sum reaches `target`.
    FindGeWalker,
    >=
);

find_walker!(
    /// Stops at the first entry where the running sum exceeds `target`.
    FindGtWalker,
    >
);

/// Counts leaf values equal to a symbol.
///
/// Only meaningful in leaf scans; index entries hold sums, not symbols.
#[derive(Debug, Clone, Copy)]
pub struct RankWalker<V> {
    symbol: V,
    count: usize,
    matched: bool,
}

impl<V: IndexValue> RankWalker<V> {
    /// Creates a walker counting occurrences of `symbol`.
    #[must_use]
    pub fn new(symbol: V) -> Self {
        Self {
            symbol,
            count: 0,
            matched: false,
        }
    }
}

impl<V: IndexValue> Walker<V> for RankWalker<V> {
    type Output = usize;

    fn compare(&mut self, value: V) -> bool {
        self.matched = value == self.symbol;
        false
    }

    fn advance(&mut self) {
        if self.matched {
            self.count += 1;
        }
    }

    fn finish(&mut self, _idx: usize) -> usize {
        self.count
    }
}

/// Read access to a flat index array.
pub(crate) trait IndexAccess<V> {
    fn entry(&self, pos: usize) -> V;
}

impl<V: IndexValue> IndexAccess<V> for PackedSlice<'_, V> {
    #[inline]
    fn entry(&self, pos: usize) -> V {
        self.get(pos)
    }
}

impl<V: IndexValue> IndexAccess<V> for PackedSliceMut<'_, V> {
    #[inline]
    fn entry(&self, pos: usize) -> V {
        self.get(pos)
    }
}

impl<V: IndexValue> IndexAccess<V> for [V] {
    #[inline]
    fn entry(&self, pos: usize) -> V {
        self[pos]
    }
}

/// Index descent context: layout, fan-in and the entries themselves.
pub(crate) struct Descent<'a, I: ?Sized> {
    pub(crate) layout: &'a TreeLayout,
    pub(crate) geometry: TreeGeometry,
    pub(crate) index: &'a I,
}

impl<'a, I: ?Sized> Descent<'a, I> {
    pub(crate) fn new(layout: &'a TreeLayout, geometry: TreeGeometry, index: &'a I) -> Self {
        Self {
            layout,
            geometry,
            index,
        }
    }

    /// Finds the leaf group where `walker` stops, scanning from the start.
    ///
    /// Returns `None` when no entry satisfies the walker; every entry has
    /// then been consumed.
    pub(crate) fn find_index<V, W>(&self, walker: &mut W) -> Option<usize>
    where
        V: IndexValue,
        I: IndexAccess<V>,
        W: Walker<V>,
    {
        let leaf = self.layout.leaf_level()?;
        let bf_log2 = self.geometry.bf_log2();

        // The root holds the grand total; start one level below it.
        let first = usize::from(leaf > 0);
        let mut branch_start = 0;

        for level in first..=leaf {
            let start = self.layout.level_start(level);
            let size = self.layout.level_size(level);

            let mut found = None;
            for c in branch_start..size {
                if walker.compare(self.index.entry(start + c)) {
                    found = Some(c);
                    break;
                }
                walker.advance();
            }

            let c = found?;
            if level == leaf {
                return Some(c);
            }
            branch_start = c << bf_log2;
        }

        None
    }

    /// Walks forward from entry `start` of `level`, climbing to parents once
    /// the current branch is exhausted. Returns the matching leaf group.
    pub(crate) fn walk_index_fw<V, W>(&self, start: usize, level: usize, walker: &mut W) -> Option<usize>
    where
        V: IndexValue,
        I: IndexAccess<V>,
        W: Walker<V>,
    {
        let leaf = self.layout.leaf_level()?;
        let bf_log2 = self.geometry.bf_log2();
        let level_start = self.layout.level_start(level);
        let level_size = self.layout.level_size(level);
        let branch_end = ((start | self.geometry.bf_mask()) + 1).min(level_size);

        for c in start..branch_end {
            if walker.compare(self.index.entry(level_start + c)) {
                if level == leaf {
                    return Some(c);
                }
                return self.walk_index_fw(c << bf_log2, level + 1, walker);
            }
            walker.advance();
        }

        if level > 0 {
            // Branch exhausted: continue with the next parent entry.
            return self.walk_index_fw((start >> bf_log2) + 1, level - 1, walker);
        }

        None
    }

    /// Walks backward from entry `start` of `level` towards entry 0.
    /// Returns the matching leaf group.
    pub(crate) fn walk_index_bw<V, W>(&self, start: usize, level: usize, walker: &mut W) -> Option<usize>
    where
        V: IndexValue,
        I: IndexAccess<V>,
        W: Walker<V>,
    {
        let leaf = self.layout.leaf_level()?;
        let bf_log2 = self.geometry.bf_log2();
        let bf_mask = self.geometry.bf_mask();
        let level_start = self.layout.level_start(level);
        let branch_start = start & !bf_mask;

        for c in (branch_start..=start).rev() {
            if walker.compare(self.index.entry(level_start + c)) {
                if level == leaf {
                    return Some(c);
                }
                let child_last = ((c << bf_log2) | bf_mask).min(self.layout.level_size(level + 1) - 1);
                return self.walk_index_bw(child_last, level + 1, walker);
            }
            walker.advance();
        }

        let parent = branch_start >> bf_log2;
        if level > 0 && parent > 0 {
            return self.walk_index_bw(parent - 1, level - 1, walker);
        }

        None
    }

    /// Feeds entries `[start, end)` of `level` to `walker`, using coarser
    /// levels for fully covered branches.
    pub(crate) fn sum_index<V, W>(&self, start: usize, end: usize, level: usize, walker: &mut W)
    where
        V: IndexValue,
        I: IndexAccess<V>,
        W: Walker<V>,
    {
        let bf_log2 = self.geometry.bf_log2();
        let bf_mask = self.geometry.bf_mask();
        let level_start = self.layout.level_start(level);
        let branch_end = (start | bf_mask) + 1;
        let branch_start = end & !bf_mask;

        if level == 0 || end <= branch_end || branch_start == branch_end {
            self.feed(level_start + start, level_start + end, walker);
        } else {
            self.feed(level_start + start, level_start + branch_end, walker);
            self.sum_index(branch_end >> bf_log2, branch_start >> bf_log2, level - 1, walker);
            self.feed(level_start + branch_start, level_start + end, walker);
        }
    }

    fn feed<V, W>(&self, from: usize, to: usize, walker: &mut W)
    where
        V: IndexValue,
        I: IndexAccess<V>,
        W: Walker<V>,
    {
        for pos in from..to {
            walker.compare(self.index.entry(pos));
            walker.advance();
        }
    }
}

/// Recomputes every non-leaf level from the leaf level, bottom-up.
pub(crate) fn fill_upper_levels<V: IndexValue>(
    layout: &TreeLayout,
    geometry: TreeGeometry,
    index: &mut PackedSliceMut<'_, V>,
) {
    let Some(leaf) = layout.leaf_level() else {
        return;
    };
    let bf = geometry.branching_factor();
    let bf_log2 = geometry.bf_log2();

    for level in (0..leaf).rev() {
        let start = layout.level_start(level);
        let child_start = layout.level_start(level + 1);
        let child_size = layout.level_size(level + 1);

        for p in 0..layout.level_size(level) {
            let first = p << bf_log2;
            let last = (first + bf).min(child_size);
            let mut sum = V::ZERO;
            for c in first..last {
                sum = sum.add(index.get(child_start + c));
            }
            index.set(start + p, sum);
        }
    }
}

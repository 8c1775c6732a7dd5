//! Multi-level summary index geometry.
//!
//! A summary index is stored as one flat array. The root level comes first
//! and the leaf level (one entry per `values_per_branch` values) comes last;
//! `level_starts` are the cumulative offsets of each level in that order.
//! Every writer (`reindex`) and every reader (sums, searches, `locate`) goes
//! through [`compute_tree_layout`], so both sides agree on the ordering.

use crate::config::TreeGeometry;
use serde::Serialize;
use std::ops::Range;

/// Upper bound on index depth; reached only with a fan-in of 2 and a
/// capacity near `u32::MAX`.
pub const MAX_LEVELS: usize = 32;

/// Geometry of a summary index for a given capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TreeLayout {
    levels: usize,
    level_sizes: [usize; MAX_LEVELS],
    level_starts: [usize; MAX_LEVELS],
    index_size: usize,
}

impl TreeLayout {
    /// Layout of a sequence too small to carry an index.
    pub const UNINDEXED: Self = Self {
        levels: 0,
        level_sizes: [0; MAX_LEVELS],
        level_starts: [0; MAX_LEVELS],
        index_size: 0,
    };

    /// Number of index levels; zero means "no index, scan linearly".
    #[must_use]
    pub const fn levels(&self) -> usize {
        self.levels
    }

    /// Whether an index exists for this layout.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        self.levels > 0
    }

    /// Total number of entries across all levels.
    #[must_use]
    pub const fn index_size(&self) -> usize {
        self.index_size
    }

    /// Level sizes in storage order (root first).
    #[must_use]
    pub fn level_sizes(&self) -> &[usize] {
        &self.level_sizes[..self.levels]
    }

    /// Level start offsets in storage order (root first).
    #[must_use]
    pub fn level_starts(&self) -> &[usize] {
        &self.level_starts[..self.levels]
    }

    /// Storage position of the leaf level, if any.
    #[must_use]
    pub const fn leaf_level(&self) -> Option<usize> {
        if self.levels > 0 {
            Some(self.levels - 1)
        } else {
            None
        }
    }

    /// Range of flat index positions occupied by `level`.
    #[must_use]
    pub fn level_range(&self, level: usize) -> Range<usize> {
        let start = self.level_starts[level];
        start..start + self.level_sizes[level]
    }

    #[inline]
    pub(crate) fn level_start(&self, level: usize) -> usize {
        self.level_starts[level]
    }

    #[inline]
    pub(crate) fn level_size(&self, level: usize) -> usize {
        self.level_sizes[level]
    }
}

/// Computes the index layout for `capacity` values.
///
/// No index is built when `capacity <= values_per_branch`: a single leaf
/// group is already a linear scan.
#[must_use]
pub fn compute_tree_layout(capacity: usize, geometry: TreeGeometry) -> TreeLayout {
    let vpb = geometry.values_per_branch();
    if capacity <= vpb {
        return TreeLayout::UNINDEXED;
    }

    let bf = geometry.branching_factor();

    // Bottom-up sizes: leaf level first, root (size 1) last.
    let mut sizes = [0usize; MAX_LEVELS];
    sizes[0] = capacity.div_ceil(vpb);
    let mut count = 1;
    while sizes[count - 1] > 1 {
        sizes[count] = sizes[count - 1].div_ceil(bf);
        count += 1;
    }

    let mut layout = TreeLayout::UNINDEXED;
    layout.levels = count;

    let mut start = 0;
    for level in 0..count {
        let size = sizes[count - 1 - level];
        layout.level_sizes[level] = size;
        layout.level_starts[level] = start;
        start += size;
    }
    layout.index_size = start;

    layout
}

/// Number of index entries needed for `capacity` values.
#[must_use]
pub fn index_size(capacity: usize, geometry: TreeGeometry) -> usize {
    compute_tree_layout(capacity, geometry).index_size()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(vpb: usize, bf: usize) -> TreeGeometry {
        TreeGeometry::new(vpb, bf).unwrap()
    }

    #[test]
    fn small_capacity_has_no_index() {
        for capacity in 0..=4 {
            let layout = compute_tree_layout(capacity, g(4, 4));
            assert!(!layout.is_indexed(), "capacity {capacity}");
            assert_eq!(layout.index_size(), 0);
            assert_eq!(layout.leaf_level(), None);
        }
    }

    #[test]
    fn two_groups_get_a_root() {
        let layout = compute_tree_layout(8, g(4, 4));
        assert_eq!(layout.levels(), 2);
        assert_eq!(layout.level_sizes(), &[1, 2]);
        assert_eq!(layout.level_starts(), &[0, 1]);
        assert_eq!(layout.index_size(), 3);
        assert_eq!(layout.leaf_level(), Some(1));
        assert_eq!(layout.level_range(1), 1..3);
    }

    #[test]
    fn deep_layout_levels() {
        // 4 * 4 * 3 + 7 = 55 values -> 14 leaf groups -> 4 -> 1
        let layout = compute_tree_layout(55, g(4, 4));
        assert_eq!(layout.level_sizes(), &[1, 4, 14]);
        assert_eq!(layout.level_starts(), &[0, 1, 5]);
        assert_eq!(layout.index_size(), 19);
    }

    #[test]
    fn default_geometry() {
        let layout = compute_tree_layout(1000, TreeGeometry::DEFAULT);
        // 1000 / 32 -> 32 groups -> 1
        assert_eq!(layout.level_sizes(), &[1, 32]);
        assert_eq!(index_size(32, TreeGeometry::DEFAULT), 0);
        assert_eq!(index_size(33, TreeGeometry::DEFAULT), 3);
    }

    #[test]
    fn levels_shrink_towards_root() {
        for capacity in [5usize, 17, 64, 65, 1023, 4097] {
            let layout = compute_tree_layout(capacity, g(4, 2));
            let sizes = layout.level_sizes();
            assert_eq!(sizes[0], 1);
            assert_eq!(*sizes.last().unwrap(), capacity.div_ceil(4));
            for pair in sizes.windows(2) {
                assert_eq!(pair[0], pair[1].div_ceil(2));
            }
        }
    }
}

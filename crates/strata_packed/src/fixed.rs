//! Fixed-width indexed sequence.
//!
//! A sequence is a nested region with `1 + 2 * columns` segments:
//!
//! ```text
//! [0] metadata { size: u32, max_size: u32, index_size: u32 }
//! [1 + 2c] summary index of column c   (index_size entries of V)
//! [2 + 2c] values of column c          (max_size entries of V)
//! ```
//!
//! Values past `size` are kept zeroed, so index entries covering the unused
//! tail contribute nothing to sums and searches.

use crate::config::TreeGeometry;
use crate::dump::DataEventHandler;
use crate::error::{check_index, check_range, PackedError, PackedResult};
use crate::layout::{compute_tree_layout, TreeLayout};
use crate::region::{self, read_u32, round_up, write_u32, Region, SegmentKind};
use crate::value::{IndexValue, PackedSlice, PackedSliceMut};
use crate::walker::{fill_upper_levels, Descent, FindGeWalker, FindGtWalker, FindResult, RankWalker, SumWalker, Walker};
use std::marker::PhantomData;
use tracing::{debug, warn};

const META_SIZE: usize = 0;
const META_MAX_SIZE: usize = 4;
const META_INDEX_SIZE: usize = 8;
const METADATA_BYTES: usize = 12;

const fn segments_for(columns: usize) -> usize {
    1 + 2 * columns
}

const fn index_segment(col: usize) -> usize {
    1 + 2 * col
}

const fn values_segment(col: usize) -> usize {
    2 + 2 * col
}

fn data_bytes<V: IndexValue>(columns: usize, capacity: usize, geometry: TreeGeometry) -> usize {
    let index = compute_tree_layout(capacity, geometry).index_size();
    round_up(METADATA_BYTES) + columns * (round_up(index * V::WIDTH) + round_up(capacity * V::WIDTH))
}

/// Block size of a sequence with `columns` columns and room for `capacity`
/// values each.
#[must_use]
pub fn block_size<V: IndexValue>(columns: usize, capacity: usize, geometry: TreeGeometry) -> usize {
    region::block_size_for(data_bytes::<V>(columns, capacity, geometry), segments_for(columns))
}

/// Block size of an empty sequence with `columns` columns.
#[must_use]
pub fn empty_size(columns: usize) -> usize {
    region::block_size_for(round_up(METADATA_BYTES), segments_for(columns))
}

/// An array of equal-width values per column plus a summary index, stored
/// in a nested region.
#[derive(Debug)]
pub struct FixedSequence<B, V> {
    region: Region<B>,
    geometry: TreeGeometry,
    _marker: PhantomData<V>,
}

impl<'a, V: IndexValue> FixedSequence<&'a mut [u8], V> {
    /// Creates a sequence in segment `idx` of `parent` with room for
    /// `capacity` values per column.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if the sequence does not
    /// fit; `parent` is unchanged in that case.
    pub fn create<P>(
        parent: &'a mut Region<P>,
        idx: usize,
        columns: usize,
        capacity: usize,
        geometry: TreeGeometry,
    ) -> PackedResult<Self>
    where
        P: AsRef<[u8]> + AsMut<[u8]>,
    {
        if columns == 0 {
            return Err(PackedError::invalid_geometry("a sequence needs at least one column"));
        }
        check_index(idx, parent.segments())?;

        let needed = block_size::<V>(columns, capacity, geometry);
        let available = parent.free_space() + parent.growth_limit() + parent.segment_size(idx);
        if needed > available {
            warn!("fixed sequence of {} bytes does not fit in {} available", needed, available);
            return Err(PackedError::CapacityExceeded {
                allocated: parent.allocated(),
                requested: needed,
                free: parent.free_space(),
            });
        }

        parent.allocate_region(idx, segments_for(columns))?;
        let mut region = parent.child_mut(idx)?;
        region.allocate(0, METADATA_BYTES, SegmentKind::Raw)?;

        let mut seq = Self {
            region,
            geometry,
            _marker: PhantomData,
        };
        seq.set_capacity(capacity)?;
        Ok(seq)
    }
}

impl<B: AsRef<[u8]>, V: IndexValue> FixedSequence<B, V> {
    /// Opens an existing sequence. `geometry` must be the one it was
    /// created with.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] if the region is not a valid
    /// fixed sequence for `geometry`.
    pub fn open(region: Region<B>, geometry: TreeGeometry) -> PackedResult<Self> {
        let seq = Self {
            region,
            geometry,
            _marker: PhantomData,
        };
        seq.check_shape()?;
        Ok(seq)
    }

    fn check_shape(&self) -> PackedResult<()> {
        let segments = self.region.segments();
        if segments < 3 || segments % 2 == 0 {
            return Err(PackedError::corrupted(format!(
                "fixed sequence has {segments} segments"
            )));
        }
        if self.region.segment_size(0) < METADATA_BYTES {
            return Err(PackedError::corrupted("fixed sequence metadata is missing"));
        }

        let size = self.size();
        let max_size = self.max_size();
        if size > max_size {
            return Err(PackedError::corrupted(format!(
                "size {size} exceeds max size {max_size}"
            )));
        }

        let layout = self.layout();
        if layout.index_size() != self.index_size() {
            return Err(PackedError::corrupted(format!(
                "stored index size {} does not match geometry ({})",
                self.index_size(),
                layout.index_size()
            )));
        }

        for col in 0..self.columns() {
            if self.region.segment_size(index_segment(col)) < layout.index_size() * V::WIDTH
                || self.region.segment_size(values_segment(col)) < max_size * V::WIDTH
            {
                return Err(PackedError::corrupted(format!(
                    "column {col} segments are smaller than max size {max_size}"
                )));
            }
        }
        Ok(())
    }

    fn meta(&self, field: usize) -> usize {
        read_u32(self.region.segment(0), field)
    }

    /// Number of values per column.
    #[must_use]
    pub fn size(&self) -> usize {
        self.meta(META_SIZE)
    }

    /// Value capacity per column.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.meta(META_MAX_SIZE)
    }

    /// Entries in each column's summary index.
    #[must_use]
    pub fn index_size(&self) -> usize {
        self.meta(META_INDEX_SIZE)
    }

    /// Number of columns.
    #[must_use]
    pub fn columns(&self) -> usize {
        (self.region.segments() - 1) / 2
    }

    /// Index fan-in.
    #[must_use]
    pub fn geometry(&self) -> TreeGeometry {
        self.geometry
    }

    /// Index layout for the current capacity.
    #[must_use]
    pub fn layout(&self) -> TreeLayout {
        compute_tree_layout(self.max_size(), self.geometry)
    }

    /// The underlying region.
    #[must_use]
    pub fn region(&self) -> &Region<B> {
        &self.region
    }

    fn check_column(&self, col: usize) -> PackedResult<()> {
        check_index(col, self.columns())
    }

    fn values_slice(&self, col: usize) -> PackedSlice<'_, V> {
        PackedSlice::new(self.region.segment(values_segment(col)))
    }

    fn index_slice(&self, col: usize) -> PackedSlice<'_, V> {
        PackedSlice::new(self.region.segment(index_segment(col)))
    }

    /// Value at `idx` in column `col`.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::InvalidIndex`] on a bad column or index.
    pub fn value(&self, col: usize, idx: usize) -> PackedResult<V> {
        self.check_column(col)?;
        check_index(idx, self.size())?;
        Ok(self.values_slice(col).get(idx))
    }

    /// All values of column `col`.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::InvalidIndex`] on a bad column.
    pub fn values(&self, col: usize) -> PackedResult<Vec<V>> {
        self.check_column(col)?;
        let values = self.values_slice(col);
        Ok((0..self.size()).map(|i| values.get(i)).collect())
    }

    /// Row `idx` across all columns.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::InvalidIndex`] if `idx >= size`.
    pub fn get_values(&self, idx: usize) -> PackedResult<Vec<V>> {
        check_index(idx, self.size())?;
        Ok((0..self.columns()).map(|col| self.values_slice(col).get(idx)).collect())
    }

    /// Flat summary index of column `col`, root first.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::InvalidIndex`] on a bad column.
    pub fn index(&self, col: usize) -> PackedResult<Vec<V>> {
        self.check_column(col)?;
        let index = self.index_slice(col);
        Ok((0..self.index_size()).map(|i| index.get(i)).collect())
    }

    /// Sum of `values[start..end]` in column `col`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or a range outside `[0, size]`.
    pub fn sum(&self, col: usize, start: usize, end: usize) -> PackedResult<V> {
        self.check_column(col)?;
        check_range(start, end, self.size())?;

        let mut walker = SumWalker::new();
        self.walk_range(col, start, end, &mut walker);
        Ok(walker.sum())
    }

    /// Sum of the whole column.
    ///
    /// # Errors
    ///
    /// Fails on a bad column.
    pub fn sum_all(&self, col: usize) -> PackedResult<V> {
        self.sum(col, 0, self.size())
    }

    /// Sum of `values[..end]`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or `end > size`.
    pub fn prefix_sum(&self, col: usize, end: usize) -> PackedResult<V> {
        self.sum(col, 0, end)
    }

    /// Per-column sums of `[start, end)`.
    ///
    /// # Errors
    ///
    /// Fails on a range outside `[0, size]`.
    pub fn sums(&self, start: usize, end: usize) -> PackedResult<Vec<V>> {
        (0..self.columns()).map(|col| self.sum(col, start, end)).collect()
    }

    /// Smallest `idx` whose inclusive prefix sum reaches `target`, or `size`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column.
    pub fn find_ge(&self, col: usize, target: V) -> PackedResult<FindResult<V>> {
        self.find(col, &mut FindGeWalker::new(target))
    }

    /// Smallest `idx` whose inclusive prefix sum exceeds `target`, or `size`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column.
    pub fn find_gt(&self, col: usize, target: V) -> PackedResult<FindResult<V>> {
        self.find(col, &mut FindGtWalker::new(target))
    }

    /// Like [`find_ge`](Self::find_ge), accumulating from `start`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or `start > size`.
    pub fn find_ge_fw(&self, col: usize, start: usize, target: V) -> PackedResult<FindResult<V>> {
        self.check_column(col)?;
        check_range(start, self.size(), self.size())?;
        Ok(self.walk_fw(col, start, &mut FindGeWalker::new(target)))
    }

    /// Like [`find_gt`](Self::find_gt), accumulating from `start`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or `start > size`.
    pub fn find_gt_fw(&self, col: usize, start: usize, target: V) -> PackedResult<FindResult<V>> {
        self.check_column(col)?;
        check_range(start, self.size(), self.size())?;
        Ok(self.walk_fw(col, start, &mut FindGtWalker::new(target)))
    }

    /// Largest `idx <= start` such that `sum(idx..=start)` reaches `target`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or `start >= size`.
    pub fn find_ge_bw(&self, col: usize, start: usize, target: V) -> PackedResult<Option<FindResult<V>>> {
        self.check_column(col)?;
        check_index(start, self.size())?;
        Ok(self.walk_bw(col, start, &mut FindGeWalker::new(target)))
    }

    /// Largest `idx <= start` such that `sum(idx..=start)` exceeds `target`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or `start >= size`.
    pub fn find_gt_bw(&self, col: usize, start: usize, target: V) -> PackedResult<Option<FindResult<V>>> {
        self.check_column(col)?;
        check_index(start, self.size())?;
        Ok(self.walk_bw(col, start, &mut FindGtWalker::new(target)))
    }

    /// Runs `walker` from the start of column `col`: index descent first,
    /// then a scan of the selected leaf group.
    ///
    /// # Errors
    ///
    /// Fails on a bad column.
    pub fn find<W: Walker<V>>(&self, col: usize, walker: &mut W) -> PackedResult<W::Output> {
        self.check_column(col)?;

        let layout = self.layout();
        if !layout.is_indexed() {
            return Ok(self.scan_fw(col, 0, walker));
        }

        walker.prepare_index();
        let index = self.index_slice(col);
        let group = Descent::new(&layout, self.geometry, &index).find_index(walker);
        Ok(match group {
            Some(group) => self.scan_fw(col, self.geometry.group_start(group), walker),
            None => walker.finish(self.size()),
        })
    }

    /// Number of values equal to `symbol` in `[0, end)`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or `end > size`.
    pub fn rank(&self, col: usize, end: usize, symbol: V) -> PackedResult<usize> {
        self.check_column(col)?;
        check_range(0, end, self.size())?;

        let mut walker = RankWalker::new(symbol);
        let values = self.values_slice(col);
        for i in 0..end {
            walker.compare(values.get(i));
            walker.advance();
        }
        Ok(walker.finish(end))
    }

    /// Position of the `nth` (1-based) one in a 0/1 column.
    ///
    /// # Errors
    ///
    /// Fails on a bad column.
    pub fn select(&self, col: usize, nth: usize) -> PackedResult<Option<usize>> {
        if nth == 0 {
            return Ok(None);
        }
        let found = self.find_ge(col, V::from_usize(nth))?;
        Ok((found.idx < self.size()).then_some(found.idx))
    }

    fn scan_fw<W: Walker<V>>(&self, col: usize, from: usize, walker: &mut W) -> W::Output {
        let size = self.size();
        let values = self.values_slice(col);
        for c in from..size {
            if walker.compare(values.get(c)) {
                return walker.finish(c);
            }
            walker.advance();
        }
        walker.finish(size)
    }

    fn scan_bw<W: Walker<V>>(&self, col: usize, from: usize, walker: &mut W) -> Option<W::Output> {
        let values = self.values_slice(col);
        for c in (0..=from).rev() {
            if walker.compare(values.get(c)) {
                return Some(walker.finish(c));
            }
            walker.advance();
        }
        None
    }

    fn walk_fw<W: Walker<V>>(&self, col: usize, start: usize, walker: &mut W) -> W::Output {
        let size = self.size();
        let layout = self.layout();
        let g = self.geometry;
        let vpb = g.values_per_branch();

        let Some(leaf) = layout.leaf_level() else {
            return self.scan_fw(col, start, walker);
        };
        if start + 2 * vpb >= size {
            return self.scan_fw(col, start, walker);
        }

        let window_end = (start | g.vpb_mask()) + 1;
        let values = self.values_slice(col);
        for c in start..window_end {
            if walker.compare(values.get(c)) {
                return walker.finish(c);
            }
            walker.advance();
        }

        walker.prepare_index();
        let index = self.index_slice(col);
        let descent = Descent::new(&layout, g, &index);
        match descent.walk_index_fw(g.group_of(window_end), leaf, walker) {
            Some(group) => self.scan_fw(col, g.group_start(group), walker),
            None => walker.finish(size),
        }
    }

    fn walk_bw<W: Walker<V>>(&self, col: usize, start: usize, walker: &mut W) -> Option<W::Output> {
        let layout = self.layout();
        let g = self.geometry;
        let vpb = g.values_per_branch();

        let Some(leaf) = layout.leaf_level() else {
            return self.scan_bw(col, start, walker);
        };
        if start < 2 * vpb {
            return self.scan_bw(col, start, walker);
        }

        let window_start = start & !g.vpb_mask();
        let values = self.values_slice(col);
        for c in (window_start..=start).rev() {
            if walker.compare(values.get(c)) {
                return Some(walker.finish(c));
            }
            walker.advance();
        }

        walker.prepare_index();
        let index = self.index_slice(col);
        let descent = Descent::new(&layout, g, &index);
        let group = descent.walk_index_bw(g.group_of(start) - 1, leaf, walker)?;
        self.scan_bw(col, g.group_start(group) + g.vpb_mask(), walker)
    }

    fn walk_range<W: Walker<V>>(&self, col: usize, start: usize, end: usize, walker: &mut W) {
        let layout = self.layout();
        let g = self.geometry;
        let values = self.values_slice(col);
        let feed = |from: usize, to: usize, walker: &mut W| {
            for c in from..to {
                walker.compare(values.get(c));
                walker.advance();
            }
        };

        let Some(leaf) = layout.leaf_level() else {
            feed(start, end, walker);
            return;
        };

        let window_end = (start | g.vpb_mask()) + 1;
        let window_start = end & !g.vpb_mask();
        if end <= window_end || window_start - window_end <= g.values_per_branch() {
            feed(start, end, walker);
            return;
        }

        feed(start, window_end, walker);
        walker.prepare_index();
        let index = self.index_slice(col);
        Descent::new(&layout, g, &index).sum_index(g.group_of(window_end), g.group_of(window_start), leaf, walker);
        feed(window_start, end, walker);
    }

    /// Rebuilds the index bytes of column `col` from its values.
    fn build_index(&self, col: usize, layout: &TreeLayout) -> Vec<u8> {
        let mut bytes = vec![0u8; layout.index_size() * V::WIDTH];
        let Some(leaf) = layout.leaf_level() else {
            return bytes;
        };

        let g = self.geometry;
        let leaf_start = layout.level_start(leaf);
        let values = self.values_slice(col);
        let mut index = PackedSliceMut::<V>::new(&mut bytes);
        for i in 0..self.size() {
            let pos = leaf_start + g.group_of(i);
            let sum = index.get(pos).add(values.get(i));
            index.set(pos, sum);
        }
        fill_upper_levels(layout, g, &mut index);
        bytes
    }

    /// Verifies metadata, segment sizes, the zeroed tail and every index
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] on the first violation.
    pub fn check(&self) -> PackedResult<()> {
        self.region.check()?;
        self.check_shape()?;

        let layout = self.layout();
        for col in 0..self.columns() {
            let values = self.values_slice(col);
            if let Some(i) = (self.size()..self.max_size()).find(|&i| values.get(i) != V::ZERO) {
                return Err(PackedError::corrupted(format!(
                    "column {col}: value {i} past size is not zero"
                )));
            }

            let expected = self.build_index(col, &layout);
            let stored = &self.region.segment(index_segment(col))[..expected.len()];
            if stored != expected.as_slice() {
                return Err(PackedError::corrupted(format!(
                    "column {col}: summary index is stale"
                )));
            }
        }
        Ok(())
    }

    /// Emits metadata, index and values of every column.
    pub fn generate_data_events(&self, handler: &mut dyn DataEventHandler) {
        handler.start_group("FIXED_SEQUENCE", None);
        handler.value("SIZE", self.size().into());
        handler.value("MAX_SIZE", self.max_size().into());
        handler.value("INDEX_SIZE", self.index_size().into());

        for col in 0..self.columns() {
            handler.start_group("COLUMN", Some(col));

            let index = self.index_slice(col);
            handler.start_group("INDEX", Some(self.index_size()));
            for i in 0..self.index_size() {
                handler.value(&i.to_string(), index.get(i).data_value());
            }
            handler.end_group();

            let values = self.values_slice(col);
            handler.start_group("VALUES", Some(self.size()));
            for i in 0..self.size() {
                handler.value(&i.to_string(), values.get(i).data_value());
            }
            handler.end_group();

            handler.end_group();
        }

        handler.end_group();
    }

    /// Whether `n` more rows fit without exceeding the space the page can
    /// still provide.
    #[must_use]
    pub fn check_capacity(&self, n: usize) -> bool {
        let target = self.size() + n;
        if target <= self.max_size() {
            return true;
        }
        let needed = data_bytes::<V>(self.columns(), target, self.geometry);
        needed <= self.region.client_area() + self.region.growth_limit()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, V: IndexValue> FixedSequence<B, V> {
    fn set_meta(&mut self, field: usize, value: usize) {
        write_u32(self.region.segment_mut(0), field, value);
    }

    fn values_mut(&mut self, col: usize) -> PackedSliceMut<'_, V> {
        PackedSliceMut::new(self.region.segment_mut(values_segment(col)))
    }

    /// Changes the value capacity, resizing every index and value segment.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::BoundsViolation`] if `max_size < size`, or
    /// [`PackedError::CapacityExceeded`] if the page cannot provide the
    /// space. Nothing is modified on failure.
    pub fn set_capacity(&mut self, max_size: usize) -> PackedResult<()> {
        let size = self.size();
        if max_size < size {
            return Err(PackedError::BoundsViolation {
                start: max_size,
                end: size,
                size,
            });
        }

        let columns = self.columns();
        let needed = data_bytes::<V>(columns, max_size, self.geometry);
        let available = self.region.client_area() + self.region.growth_limit();
        if needed > available {
            warn!("fixed sequence cannot grow to {} values: needs {} of {} bytes", max_size, needed, available);
            return Err(PackedError::CapacityExceeded {
                allocated: self.region.allocated(),
                requested: needed,
                free: available.saturating_sub(self.region.allocated()),
            });
        }

        let layout = compute_tree_layout(max_size, self.geometry);
        let index_bytes = round_up(layout.index_size() * V::WIDTH);
        let value_bytes = round_up(max_size * V::WIDTH);
        for col in 0..columns {
            self.region.resize(index_segment(col), index_bytes)?;
            self.region.resize(values_segment(col), value_bytes)?;
        }

        let old = self.max_size();
        self.set_meta(META_MAX_SIZE, max_size);
        self.set_meta(META_INDEX_SIZE, layout.index_size());
        if old != max_size {
            debug!("fixed sequence capacity {} -> {} ({} index entries)", old, max_size, layout.index_size());
        }

        self.reindex();
        Ok(())
    }

    /// Rebuilds every column's summary index from its values.
    pub fn reindex(&mut self) {
        let layout = self.layout();
        for col in 0..self.columns() {
            let bytes = self.build_index(col, &layout);
            self.region.segment_mut(index_segment(col))[..bytes.len()].copy_from_slice(&bytes);
        }
    }

    /// Opens a zeroed gap of `n` rows at `idx`, growing capacity if needed.
    /// Does not reindex.
    fn open_gap(&mut self, idx: usize, n: usize) -> PackedResult<()> {
        let size = self.size();
        check_range(idx, size, size)?;
        if n == 0 {
            return Ok(());
        }

        if size + n > self.max_size() {
            self.set_capacity(size + n)?;
        }

        for col in 0..self.columns() {
            let mut values = self.values_mut(col);
            values.copy_within(idx, idx + n, size - idx);
            values.zero(idx, idx + n);
        }
        self.set_meta(META_SIZE, size + n);
        Ok(())
    }

    /// Inserts `n` zero rows at `idx`.
    ///
    /// # Errors
    ///
    /// Fails if `idx > size` or the sequence cannot grow.
    pub fn insert_space(&mut self, idx: usize, n: usize) -> PackedResult<()> {
        self.open_gap(idx, n)?;
        self.reindex();
        Ok(())
    }

    /// Inserts `rows` at `idx`; each row holds one value per column.
    ///
    /// # Errors
    ///
    /// Fails if a row has the wrong width, `idx > size`, or the sequence
    /// cannot grow. Nothing is modified on failure.
    pub fn insert<R: AsRef<[V]>>(&mut self, idx: usize, rows: &[R]) -> PackedResult<()> {
        let columns = self.columns();
        if let Some(row) = rows.iter().find(|r| r.as_ref().len() != columns) {
            return Err(PackedError::BoundsViolation {
                start: 0,
                end: row.as_ref().len(),
                size: columns,
            });
        }

        self.open_gap(idx, rows.len())?;
        for col in 0..columns {
            let mut values = self.values_mut(col);
            for (r, row) in rows.iter().enumerate() {
                values.set(idx + r, row.as_ref()[col]);
            }
        }
        self.reindex();
        Ok(())
    }

    /// Appends one row.
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert).
    pub fn append(&mut self, row: &[V]) -> PackedResult<()> {
        self.insert(self.size(), &[row])
    }

    /// Removes rows `[start, end)` and shrinks capacity to the new size.
    ///
    /// # Errors
    ///
    /// Fails on a range outside `[0, size]`.
    pub fn remove(&mut self, start: usize, end: usize) -> PackedResult<()> {
        let size = self.size();
        check_range(start, end, size)?;
        let n = end - start;
        if n == 0 {
            return Ok(());
        }

        for col in 0..self.columns() {
            let mut values = self.values_mut(col);
            values.copy_within(end, start, size - end);
            values.zero(size - n, size);
        }
        self.set_meta(META_SIZE, size - n);
        self.set_capacity(size - n)
    }

    /// Zeroes rows `[start, end)` in every column.
    ///
    /// # Errors
    ///
    /// Fails on a range outside `[0, size]`.
    pub fn clear(&mut self, start: usize, end: usize) -> PackedResult<()> {
        check_range(start, end, self.size())?;
        for col in 0..self.columns() {
            self.values_mut(col).zero(start, end);
        }
        self.reindex();
        Ok(())
    }

    /// Adds `delta` to one value, updating the index path in O(log n).
    ///
    /// # Errors
    ///
    /// Fails on a bad column or index.
    pub fn add_value(&mut self, col: usize, idx: usize, delta: V) -> PackedResult<()> {
        self.check_column(col)?;
        check_index(idx, self.size())?;

        let mut values = self.values_mut(col);
        let updated = values.get(idx).add(delta);
        values.set(idx, updated);

        let layout = self.layout();
        if let Some(leaf) = layout.leaf_level() {
            let g = self.geometry;
            let mut index = PackedSliceMut::<V>::new(self.region.segment_mut(index_segment(col)));
            let mut pos = g.group_of(idx);
            for level in (0..=leaf).rev() {
                let at = layout.level_start(level) + pos;
                index.set(at, index.get(at).add(delta));
                pos >>= g.bf_log2();
            }
        }
        Ok(())
    }

    /// Replaces one value.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or index.
    pub fn set_value(&mut self, col: usize, idx: usize, value: V) -> PackedResult<()> {
        let old = self.value(col, idx)?;
        self.add_value(col, idx, value.sub(old))
    }

    /// Moves rows `[idx, size)` to the front of `other`.
    ///
    /// # Errors
    ///
    /// Fails if column counts differ, `idx > size`, or `other` cannot grow.
    pub fn split_to<O>(&mut self, other: &mut FixedSequence<O, V>, idx: usize) -> PackedResult<()>
    where
        O: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        check_range(idx, size, size)?;
        self.check_same_shape(other.columns())?;

        let n = size - idx;
        other.open_gap(0, n)?;
        for col in 0..self.columns() {
            let src = self.values_slice(col);
            let mut dst = other.values_mut(col);
            for i in 0..n {
                dst.set(i, src.get(idx + i));
            }
        }
        other.reindex();
        self.remove(idx, size)
    }

    /// Appends all rows of this sequence to `other`.
    ///
    /// # Errors
    ///
    /// Fails if column counts differ or `other` cannot grow.
    pub fn merge_with<O>(&self, other: &mut FixedSequence<O, V>) -> PackedResult<()>
    where
        O: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.check_same_shape(other.columns())?;

        let at = other.size();
        let n = self.size();
        other.open_gap(at, n)?;
        for col in 0..self.columns() {
            let src = self.values_slice(col);
            let mut dst = other.values_mut(col);
            for i in 0..n {
                dst.set(at + i, src.get(i));
            }
        }
        other.reindex();
        Ok(())
    }

    /// Overwrites `count` rows of `other` starting at `to` with rows of this
    /// sequence starting at `from`.
    ///
    /// # Errors
    ///
    /// Fails if column counts differ or either range is out of bounds.
    pub fn copy_to<O>(&self, other: &mut FixedSequence<O, V>, from: usize, count: usize, to: usize) -> PackedResult<()>
    where
        O: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.check_same_shape(other.columns())?;
        check_range(from, from + count, self.size())?;
        check_range(to, to + count, other.size())?;

        for col in 0..self.columns() {
            let src = self.values_slice(col);
            let mut dst = other.values_mut(col);
            for i in 0..count {
                dst.set(to + i, src.get(from + i));
            }
        }
        other.reindex();
        Ok(())
    }

    fn check_same_shape(&self, other_columns: usize) -> PackedResult<()> {
        if other_columns != self.columns() {
            return Err(PackedError::invalid_geometry(format!(
                "column count mismatch: {} vs {other_columns}",
                self.columns()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;

    fn g4() -> TreeGeometry {
        TreeGeometry::new(4, 4).unwrap()
    }

    fn linear_sum(values: &[u64], start: usize, end: usize) -> u64 {
        values[start..end].iter().sum()
    }

    fn linear_find_ge(values: &[u64], target: u64) -> usize {
        let mut acc = 0;
        for (i, v) in values.iter().enumerate() {
            acc += v;
            if acc >= target {
                return i;
            }
        }
        values.len()
    }

    #[test]
    fn scenario_values_build_expected_index() {
        let mut page = Page::new(4096, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = FixedSequence::<_, u64>::create(&mut root, 0, 1, 8, g4()).unwrap();

        let rows: Vec<[u64; 1]> = [3, 1, 4, 1, 5, 9, 2, 6].iter().map(|&v| [v]).collect();
        seq.insert(0, &rows).unwrap();

        let layout = seq.layout();
        let leaf = layout.leaf_level().unwrap();
        let index = seq.index(0).unwrap();
        assert_eq!(&index[layout.level_range(leaf)], &[9, 22]);
        assert_eq!(index[0], 31);
        assert_eq!(seq.sum(0, 0, 8).unwrap(), 31);
        assert_eq!(seq.find_ge(0, 10).unwrap(), FindResult { idx: 4, prefix: 9 });
        seq.check().unwrap();
    }

    #[test]
    fn sums_agree_with_linear_scan_across_sizes() {
        for size in [0usize, 1, 3, 4, 5, 55] {
            let mut page = Page::new(1 << 16, 1).unwrap();
            let mut root = page.root_mut();
            let mut seq = FixedSequence::<_, u64>::create(&mut root, 0, 1, 0, g4()).unwrap();
            let values: Vec<u64> = (0..size as u64).map(|i| (i * 7 + 3) % 11).collect();
            let rows: Vec<[u64; 1]> = values.iter().map(|&v| [v]).collect();
            seq.insert(0, &rows).unwrap();

            for start in 0..=size {
                for end in start..=size {
                    assert_eq!(
                        seq.sum(0, start, end).unwrap(),
                        linear_sum(&values, start, end),
                        "size {size} range [{start}, {end})"
                    );
                }
            }
            seq.check().unwrap();
        }
    }

    #[test]
    fn searches_agree_with_linear_scan() {
        let mut page = Page::new(1 << 16, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = FixedSequence::<_, u64>::create(&mut root, 0, 1, 0, g4()).unwrap();
        let values: Vec<u64> = (0..55u64).map(|i| i % 5 + 1).collect();
        let rows: Vec<[u64; 1]> = values.iter().map(|&v| [v]).collect();
        seq.insert(0, &rows).unwrap();
        let total: u64 = values.iter().sum();

        for target in 0..=total + 2 {
            assert_eq!(seq.find_ge(0, target).unwrap().idx, linear_find_ge(&values, target));
            assert_eq!(seq.find_gt(0, target).unwrap().idx, linear_find_ge(&values, target + 1));
        }

        for start in [0usize, 3, 9, 20, 46, 54] {
            for target in [1u64, 6, 30, 100] {
                let fw = seq.find_ge_fw(0, start, target).unwrap();
                let expected = start + linear_find_ge(&values[start..], target);
                assert_eq!(fw.idx, expected, "fw start {start} target {target}");
                assert_eq!(fw.prefix, linear_sum(&values, start, expected.min(values.len())));

                let bw = seq.find_ge_bw(0, start, target).unwrap();
                let mut acc = 0;
                let expected = (0..=start).rev().find(|&i| {
                    acc += values[i];
                    acc >= target
                });
                assert_eq!(bw.map(|r| r.idx), expected, "bw start {start} target {target}");
            }
        }
    }

    #[test]
    fn insert_remove_and_update_keep_index_fresh() {
        let mut page = Page::new(1 << 14, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = FixedSequence::<_, u32>::create(&mut root, 0, 2, 4, g4()).unwrap();

        for i in 0..20u32 {
            seq.append(&[i, 1]).unwrap();
        }
        assert_eq!(seq.size(), 20);
        assert_eq!(seq.sum_all(0).unwrap(), 190);
        assert_eq!(seq.sums(0, 20).unwrap(), vec![190, 20]);

        seq.insert_space(5, 3).unwrap();
        assert_eq!(seq.get_values(5).unwrap(), vec![0, 0]);
        assert_eq!(seq.value(0, 8).unwrap(), 5);

        seq.remove(5, 8).unwrap();
        assert_eq!(seq.max_size(), 20);
        assert_eq!(seq.values(0).unwrap(), (0..20).collect::<Vec<_>>());

        seq.set_value(0, 17, 100).unwrap();
        seq.add_value(1, 0, 4).unwrap();
        assert_eq!(seq.sum_all(0).unwrap(), 190 - 17 + 100);
        assert_eq!(seq.sum_all(1).unwrap(), 24);
        seq.check().unwrap();

        seq.clear(0, 10).unwrap();
        assert_eq!(seq.prefix_sum(0, 10).unwrap(), 0);
        seq.check().unwrap();
    }

    #[test]
    fn rank_and_select_on_bit_column() {
        let mut page = Page::new(1 << 14, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = FixedSequence::<_, u32>::create(&mut root, 0, 1, 0, g4()).unwrap();
        let bits = [1u32, 0, 0, 1, 1, 0, 1, 0, 0, 0, 1, 1, 0, 1];
        let rows: Vec<[u32; 1]> = bits.iter().map(|&b| [b]).collect();
        seq.insert(0, &rows).unwrap();

        assert_eq!(seq.rank(0, 14, 1).unwrap(), 7);
        assert_eq!(seq.rank(0, 5, 0).unwrap(), 2);
        assert_eq!(seq.select(0, 1).unwrap(), Some(0));
        assert_eq!(seq.select(0, 4).unwrap(), Some(6));
        assert_eq!(seq.select(0, 7).unwrap(), Some(13));
        assert_eq!(seq.select(0, 8).unwrap(), None);
    }

    #[test]
    fn growth_is_refused_when_page_is_full() {
        let mut page = Page::new(256, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = FixedSequence::<_, u64>::create(&mut root, 0, 1, 0, g4()).unwrap();

        let fits = (0..).take_while(|&n| seq.check_capacity(n)).last().unwrap();
        let rows: Vec<[u64; 1]> = (0..fits as u64).map(|v| [v]).collect();
        seq.insert(0, &rows).unwrap();

        assert!(!seq.check_capacity(1));
        let err = seq.append(&[1]).unwrap_err();
        assert!(matches!(err, PackedError::CapacityExceeded { .. }));
        assert_eq!(seq.size(), fits);
        seq.check().unwrap();
    }

    #[test]
    fn split_and_merge_move_rows_between_pages() {
        let mut page_a = Page::new(1 << 14, 1).unwrap();
        let mut page_b = Page::new(1 << 14, 1).unwrap();
        let mut root_a = page_a.root_mut();
        let mut root_b = page_b.root_mut();
        let mut a = FixedSequence::<_, u64>::create(&mut root_a, 0, 1, 0, g4()).unwrap();
        let mut b = FixedSequence::<_, u64>::create(&mut root_b, 0, 1, 0, g4()).unwrap();

        let rows: Vec<[u64; 1]> = (1..=30u64).map(|v| [v]).collect();
        a.insert(0, &rows).unwrap();
        a.split_to(&mut b, 12).unwrap();
        assert_eq!(a.size(), 12);
        assert_eq!(b.values(0).unwrap(), (13..=30).collect::<Vec<_>>());

        a.merge_with(&mut b).unwrap();
        assert_eq!(b.size(), 30);
        assert_eq!(b.value(0, 18).unwrap(), 1);

        a.copy_to(&mut b, 0, 2, 0).unwrap();
        assert_eq!(b.values(0).unwrap()[..2], [1, 2]);
        a.check().unwrap();
        b.check().unwrap();
    }

    #[test]
    fn reopen_and_dump() {
        let mut page = Page::new(4096, 2).unwrap();
        {
            let mut root = page.root_mut();
            let mut seq = FixedSequence::<_, i64>::create(&mut root, 1, 1, 0, g4()).unwrap();
            seq.append(&[-5]).unwrap();
            seq.append(&[7]).unwrap();
        }
        page.check().unwrap();

        let root = page.root();
        let seq = FixedSequence::<_, i64>::open(root.child(1).unwrap(), g4()).unwrap();
        assert_eq!(seq.sum_all(0).unwrap(), 2);

        let mut dumper = crate::dump::TextDumper::new();
        seq.generate_data_events(&mut dumper);
        let text = dumper.finish();
        assert!(text.contains("SIZE: 2"));
        assert!(text.contains("0: -5"));
    }

    #[test]
    fn bad_arguments_are_rejected() {
        let mut page = Page::new(4096, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = FixedSequence::<_, u32>::create(&mut root, 0, 1, 0, g4()).unwrap();
        seq.append(&[1]).unwrap();

        assert!(matches!(seq.value(1, 0), Err(PackedError::InvalidIndex { .. })));
        assert!(matches!(seq.value(0, 1), Err(PackedError::InvalidIndex { .. })));
        assert!(matches!(seq.sum(0, 1, 2), Err(PackedError::BoundsViolation { .. })));
        assert!(matches!(seq.insert(3, &[[1u32]]), Err(PackedError::BoundsViolation { .. })));
        assert!(matches!(seq.insert(0, &[[1u32, 2]]), Err(PackedError::BoundsViolation { .. })));
        assert!(matches!(seq.set_capacity(0), Err(PackedError::BoundsViolation { .. })));
    }
}

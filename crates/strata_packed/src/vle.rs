//! Variable-length indexed sequence.
//!
//! Values are stored varint-encoded, back to back. Each column keeps two
//! summary indexes over the same groups: one summing decoded values, one
//! summing encoded byte lengths. The byte-length index turns positional
//! access into an index descent plus at most one group of header reads.
//!
//! ```text
//! [0] metadata  { size: u32, max_size: u32, index_size: u32 }
//! [1] data sizes { data_size: u32, max_data_size: u32 } per column
//! [2 + 3c] value index of column c        (index_size entries of i64)
//! [3 + 3c] byte-length index of column c  (index_size entries of u32)
//! [4 + 3c] encoded bytes of column c      (data_size bytes, padded)
//! ```

use crate::config::Config;
use crate::dump::{DataEventHandler, DataValue};
use crate::error::{check_index, check_range, PackedError, PackedResult};
use crate::layout::{compute_tree_layout, TreeLayout};
use crate::region::{self, read_u32, round_up, write_u32, Region, SegmentKind};
use crate::value::{IndexValue, PackedSlice, PackedSliceMut};
use crate::walker::{fill_upper_levels, Descent, FindGeWalker, FindGtWalker, FindResult, SumWalker, Walker};
use std::marker::PhantomData;
use strata_codec::VarintCodec;
use tracing::{debug, warn};

const META_SIZE: usize = 0;
const META_MAX_SIZE: usize = 4;
const META_INDEX_SIZE: usize = 8;
const METADATA_BYTES: usize = 12;

const DATA_SIZES_STRIDE: usize = 8;
const UNBOUNDED: usize = u32::MAX as usize;

const fn segments_for(columns: usize) -> usize {
    2 + 3 * columns
}

const fn value_index_segment(col: usize) -> usize {
    2 + 3 * col
}

const fn length_index_segment(col: usize) -> usize {
    3 + 3 * col
}

const fn data_segment(col: usize) -> usize {
    4 + 3 * col
}

fn data_bytes(capacity: usize, config: &Config, data_sizes: &[usize]) -> usize {
    let index = compute_tree_layout(capacity, config.geometry).index_size();
    let per_column = round_up(index * i64::WIDTH) + round_up(index * u32::WIDTH);
    round_up(METADATA_BYTES)
        + round_up(DATA_SIZES_STRIDE * data_sizes.len())
        + data_sizes.iter().map(|&ds| per_column + round_up(ds)).sum::<usize>()
}

/// Block size of a sequence with room for `capacity` values and
/// `data_size` encoded bytes in each of `columns` columns.
#[must_use]
pub fn block_size(columns: usize, capacity: usize, data_size: usize, config: &Config) -> usize {
    region::block_size_for(data_bytes(capacity, config, &vec![data_size; columns]), segments_for(columns))
}

/// Block size of an empty sequence with `columns` columns.
#[must_use]
pub fn empty_size(columns: usize) -> usize {
    region::block_size_for(
        round_up(METADATA_BYTES) + round_up(DATA_SIZES_STRIDE * columns),
        segments_for(columns),
    )
}

/// Varint-encoded columns with value-sum and byte-length indexes.
#[derive(Debug)]
pub struct VarSequence<B, C> {
    region: Region<B>,
    config: Config,
    _codec: PhantomData<C>,
}

impl<'a, C: VarintCodec> VarSequence<&'a mut [u8], C> {
    /// Creates a sequence in segment `idx` of `parent` with
    /// `config.initial_capacity` value slots per column.
    ///
    /// Each column reserves `config.max_data_size` encoded bytes, safety
    /// margin included. Without one, columns are bounded only by the page;
    /// see [`set_max_data_size`](Self::set_max_data_size).
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if the sequence does not
    /// fit; `parent` is unchanged in that case.
    pub fn create<P>(parent: &'a mut Region<P>, idx: usize, columns: usize, config: Config) -> PackedResult<Self>
    where
        P: AsRef<[u8]> + AsMut<[u8]>,
    {
        if columns == 0 {
            return Err(PackedError::invalid_geometry("a sequence needs at least one column"));
        }
        check_index(idx, parent.segments())?;

        let needed = block_size(columns, config.initial_capacity, 0, &config);
        let available = parent.free_space() + parent.growth_limit() + parent.segment_size(idx);
        if needed > available {
            warn!("variable sequence of {} bytes does not fit in {} available", needed, available);
            return Err(PackedError::CapacityExceeded {
                allocated: parent.allocated(),
                requested: needed,
                free: parent.free_space(),
            });
        }

        parent.allocate_region(idx, segments_for(columns))?;
        let mut region = parent.child_mut(idx)?;
        region.allocate(0, METADATA_BYTES, SegmentKind::Raw)?;
        region.allocate(1, DATA_SIZES_STRIDE * columns, SegmentKind::Raw)?;

        let capacity = config.initial_capacity;
        let max_data_size = config.max_data_size.map_or(UNBOUNDED, |bytes| bytes.min(UNBOUNDED));
        let mut seq = Self {
            region,
            config,
            _codec: PhantomData,
        };
        for col in 0..columns {
            seq.set_data_sizes(col, 0, max_data_size);
        }
        seq.set_capacity(capacity)?;
        Ok(seq)
    }
}

impl<B: AsRef<[u8]>, C: VarintCodec> VarSequence<B, C> {
    /// Opens an existing sequence with the configuration it was created with.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] if the region is not a valid
    /// variable sequence for `config`.
    pub fn open(region: Region<B>, config: Config) -> PackedResult<Self> {
        let seq = Self {
            region,
            config,
            _codec: PhantomData,
        };
        seq.check_shape()?;
        Ok(seq)
    }

    fn check_shape(&self) -> PackedResult<()> {
        let segments = self.region.segments();
        if segments < segments_for(1) {
            return Err(PackedError::corrupted(format!(
                "variable sequence has {segments} segments"
            )));
        }
        if self.region.segment_size(0) < METADATA_BYTES || self.columns() == 0 {
            return Err(PackedError::corrupted("variable sequence metadata is missing"));
        }

        // Directory padding shows up as trailing empty segments.
        let used = segments_for(self.columns());
        if used > segments || (used..segments).any(|idx| self.region.segment_size(idx) != 0) {
            return Err(PackedError::corrupted(format!(
                "variable sequence with {} columns has {segments} segments",
                self.columns()
            )));
        }

        let size = self.size();
        if size > self.max_size() {
            return Err(PackedError::corrupted(format!(
                "size {size} exceeds max size {}",
                self.max_size()
            )));
        }

        let index_size = self.layout().index_size();
        if index_size != self.index_size() {
            return Err(PackedError::corrupted(format!(
                "stored index size {} does not match geometry ({index_size})",
                self.index_size()
            )));
        }

        for col in 0..self.columns() {
            if self.region.segment_size(value_index_segment(col)) < index_size * i64::WIDTH
                || self.region.segment_size(length_index_segment(col)) < index_size * u32::WIDTH
                || self.region.segment_size(data_segment(col)) < self.data_size(col)
            {
                return Err(PackedError::corrupted(format!(
                    "column {col} segments are smaller than their contents"
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

    /// Value slots the indexes are sized for.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.meta(META_MAX_SIZE)
    }

    /// Entries in each summary index.
    #[must_use]
    pub fn index_size(&self) -> usize {
        self.meta(META_INDEX_SIZE)
    }

    /// Number of columns.
    #[must_use]
    pub fn columns(&self) -> usize {
        self.region.segment_size(1) / DATA_SIZES_STRIDE
    }

    /// Encoded bytes in column `col`.
    #[must_use]
    pub fn data_size(&self, col: usize) -> usize {
        read_u32(self.region.segment(1), col * DATA_SIZES_STRIDE)
    }

    /// Upper bound on `data_size(col)`.
    #[must_use]
    pub fn max_data_size(&self, col: usize) -> usize {
        read_u32(self.region.segment(1), col * DATA_SIZES_STRIDE + 4)
    }

    /// Creation parameters.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Index layout for the current capacity.
    #[must_use]
    pub fn layout(&self) -> TreeLayout {
        compute_tree_layout(self.max_size(), self.config.geometry)
    }

    /// The underlying region.
    #[must_use]
    pub fn region(&self) -> &Region<B> {
        &self.region
    }

    fn check_column(&self, col: usize) -> PackedResult<()> {
        check_index(col, self.columns())
    }

    fn data(&self, col: usize) -> &[u8] {
        &self.region.segment(data_segment(col))[..self.data_size(col)]
    }

    fn value_index(&self, col: usize) -> PackedSlice<'_, i64> {
        PackedSlice::new(self.region.segment(value_index_segment(col)))
    }

    fn length_index(&self, col: usize) -> PackedSlice<'_, u32> {
        PackedSlice::new(self.region.segment(length_index_segment(col)))
    }

    /// Byte offset of value `idx` within column `col`'s data. `idx == size`
    /// yields the data size.
    ///
    /// # Errors
    ///
    /// Fails on a bad column, `idx > size`, or undecodable data.
    pub fn locate(&self, col: usize, idx: usize) -> PackedResult<usize> {
        self.check_column(col)?;
        check_range(idx, self.size(), self.size())?;
        if idx == self.size() {
            return Ok(self.data_size(col));
        }

        let layout = self.layout();
        let g = self.config.geometry;
        let (mut pos, from) = match layout.leaf_level() {
            Some(leaf) => {
                let group = g.group_of(idx);
                let mut walker = SumWalker::<u32>::new();
                let index = self.length_index(col);
                Descent::new(&layout, g, &index).sum_index(0, group, leaf, &mut walker);
                (walker.sum() as usize, g.group_start(group))
            }
            None => (0, 0),
        };

        let data = self.data(col);
        for _ in from..idx {
            pos += C::length_at(data, pos)?;
        }
        Ok(pos)
    }

    /// Value at `idx` in column `col`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or index, or undecodable data.
    pub fn value(&self, col: usize, idx: usize) -> PackedResult<C::Value> {
        check_index(idx, self.size())?;
        let pos = self.locate(col, idx)?;
        Ok(C::decode(self.data(col), pos)?.0)
    }

    /// All values of column `col`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or undecodable data.
    pub fn values(&self, col: usize) -> PackedResult<Vec<C::Value>> {
        self.check_column(col)?;
        self.decode_range(col, 0, self.size())
    }

    /// Row `idx` across all columns.
    ///
    /// # Errors
    ///
    /// Fails on a bad index or undecodable data.
    pub fn get_values(&self, idx: usize) -> PackedResult<Vec<C::Value>> {
        (0..self.columns()).map(|col| self.value(col, idx)).collect()
    }

    fn decode_range(&self, col: usize, start: usize, end: usize) -> PackedResult<Vec<C::Value>> {
        let data = self.data(col);
        let mut pos = self.locate(col, start)?;
        let mut out = Vec::with_capacity(end - start);
        for _ in start..end {
            let (value, len) = C::decode(data, pos)?;
            out.push(value);
            pos += len;
        }
        Ok(out)
    }

    /// Sum of `values[start..end]` in column `col`, widened to `i64`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column, a range outside `[0, size]`, or undecodable
    /// data.
    pub fn sum(&self, col: usize, start: usize, end: usize) -> PackedResult<i64> {
        self.check_column(col)?;
        check_range(start, end, self.size())?;

        let mut walker = SumWalker::new();
        let layout = self.layout();
        let g = self.config.geometry;

        let Some(leaf) = layout.leaf_level() else {
            self.feed(col, start, end, &mut walker)?;
            return Ok(walker.sum());
        };

        let window_end = (start | g.vpb_mask()) + 1;
        let window_start = end & !g.vpb_mask();
        if end <= window_end || window_start - window_end <= g.values_per_branch() {
            self.feed(col, start, end, &mut walker)?;
            return Ok(walker.sum());
        }

        self.feed(col, start, window_end, &mut walker)?;
        walker.prepare_index();
        let index = self.value_index(col);
        Descent::new(&layout, g, &index).sum_index(g.group_of(window_end), g.group_of(window_start), leaf, &mut walker);
        self.feed(col, window_start, end, &mut walker)?;
        Ok(walker.sum())
    }

    /// Sum of the whole column.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or undecodable data.
    pub fn sum_all(&self, col: usize) -> PackedResult<i64> {
        self.sum(col, 0, self.size())
    }

    fn feed<W: Walker<i64>>(&self, col: usize, start: usize, end: usize, walker: &mut W) -> PackedResult<()> {
        let data = self.data(col);
        let mut pos = self.locate(col, start)?;
        for _ in start..end {
            let (value, len) = C::decode(data, pos)?;
            walker.compare(C::to_index(value));
            walker.advance();
            pos += len;
        }
        Ok(())
    }

    /// Smallest `idx` whose inclusive prefix sum reaches `target`, or `size`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or undecodable data.
    pub fn find_ge(&self, col: usize, target: i64) -> PackedResult<FindResult<i64>> {
        self.find(col, &mut FindGeWalker::new(target))
    }

    /// Smallest `idx` whose inclusive prefix sum exceeds `target`, or `size`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or undecodable data.
    pub fn find_gt(&self, col: usize, target: i64) -> PackedResult<FindResult<i64>> {
        self.find(col, &mut FindGtWalker::new(target))
    }

    /// Like [`find_ge`](Self::find_ge), accumulating from `start`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column, `start > size`, or undecodable data.
    pub fn find_ge_fw(&self, col: usize, start: usize, target: i64) -> PackedResult<FindResult<i64>> {
        self.walk_fw(col, start, &mut FindGeWalker::new(target))
    }

    /// Like [`find_gt`](Self::find_gt), accumulating from `start`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column, `start > size`, or undecodable data.
    pub fn find_gt_fw(&self, col: usize, start: usize, target: i64) -> PackedResult<FindResult<i64>> {
        self.walk_fw(col, start, &mut FindGtWalker::new(target))
    }

    /// Largest `idx <= start` such that `sum(idx..=start)` reaches `target`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column, `start >= size`, or undecodable data.
    pub fn find_ge_bw(&self, col: usize, start: usize, target: i64) -> PackedResult<Option<FindResult<i64>>> {
        self.walk_bw(col, start, &mut FindGeWalker::new(target))
    }

    /// Largest `idx <= start` such that `sum(idx..=start)` exceeds `target`.
    ///
    /// # Errors
    ///
    /// Fails on a bad column, `start >= size`, or undecodable data.
    pub fn find_gt_bw(&self, col: usize, start: usize, target: i64) -> PackedResult<Option<FindResult<i64>>> {
        self.walk_bw(col, start, &mut FindGtWalker::new(target))
    }

    /// Runs `walker` over column `col` from the start, descending the value
    /// index before scanning one group.
    ///
    /// # Errors
    ///
    /// Fails on a bad column or undecodable data.
    pub fn find<W: Walker<i64>>(&self, col: usize, walker: &mut W) -> PackedResult<W::Output> {
        self.check_column(col)?;

        let layout = self.layout();
        if !layout.is_indexed() {
            return self.scan_fw(col, 0, walker);
        }

        walker.prepare_index();
        let index = self.value_index(col);
        match Descent::new(&layout, self.config.geometry, &index).find_index(walker) {
            Some(group) => self.scan_fw(col, self.config.geometry.group_start(group), walker),
            None => Ok(walker.finish(self.size())),
        }
    }

    fn scan_fw<W: Walker<i64>>(&self, col: usize, from: usize, walker: &mut W) -> PackedResult<W::Output> {
        let size = self.size();
        let data = self.data(col);
        let mut pos = self.locate(col, from)?;
        for c in from..size {
            let (value, len) = C::decode(data, pos)?;
            if walker.compare(C::to_index(value)) {
                return Ok(walker.finish(c));
            }
            walker.advance();
            pos += len;
        }
        Ok(walker.finish(size))
    }

    /// Scans `[lo, hi]` from `hi` down. Varints only decode forwards, so the
    /// range is decoded first.
    fn scan_bw<W: Walker<i64>>(&self, col: usize, lo: usize, hi: usize, walker: &mut W) -> PackedResult<Option<W::Output>> {
        let values = self.decode_range(col, lo, hi + 1)?;
        for (c, value) in (lo..hi + 1).zip(values).rev() {
            if walker.compare(C::to_index(value)) {
                return Ok(Some(walker.finish(c)));
            }
            walker.advance();
        }
        Ok(None)
    }

    fn walk_fw<W: Walker<i64>>(&self, col: usize, start: usize, walker: &mut W) -> PackedResult<W::Output> {
        self.check_column(col)?;
        let size = self.size();
        check_range(start, size, size)?;

        let layout = self.layout();
        let g = self.config.geometry;
        let Some(leaf) = layout.leaf_level() else {
            return self.scan_fw(col, start, walker);
        };
        if start + 2 * g.values_per_branch() >= size {
            return self.scan_fw(col, start, walker);
        }

        let window_end = (start | g.vpb_mask()) + 1;
        let data = self.data(col);
        let mut pos = self.locate(col, start)?;
        for c in start..window_end {
            let (value, len) = C::decode(data, pos)?;
            if walker.compare(C::to_index(value)) {
                return Ok(walker.finish(c));
            }
            walker.advance();
            pos += len;
        }

        walker.prepare_index();
        let index = self.value_index(col);
        match Descent::new(&layout, g, &index).walk_index_fw(g.group_of(window_end), leaf, walker) {
            Some(group) => self.scan_fw(col, g.group_start(group), walker),
            None => Ok(walker.finish(size)),
        }
    }

    fn walk_bw<W: Walker<i64>>(&self, col: usize, start: usize, walker: &mut W) -> PackedResult<Option<W::Output>> {
        self.check_column(col)?;
        check_index(start, self.size())?;

        let layout = self.layout();
        let g = self.config.geometry;
        let Some(leaf) = layout.leaf_level() else {
            return self.scan_bw(col, 0, start, walker);
        };
        if start < 2 * g.values_per_branch() {
            return self.scan_bw(col, 0, start, walker);
        }

        let window_start = start & !g.vpb_mask();
        if let Some(found) = self.scan_bw(col, window_start, start, walker)? {
            return Ok(Some(found));
        }

        walker.prepare_index();
        let index = self.value_index(col);
        match Descent::new(&layout, g, &index).walk_index_bw(g.group_of(start) - 1, leaf, walker) {
            Some(group) => {
                let lo = g.group_start(group);
                self.scan_bw(col, lo, lo + g.vpb_mask(), walker)
            }
            None => Ok(None),
        }
    }

    /// Whether `extra_bytes` more encoded bytes fit in column `col`'s budget.
    #[must_use]
    pub fn has_capacity_for(&self, col: usize, extra_bytes: usize) -> bool {
        col < self.columns() && self.check_capacity(col, self.data_size(col) + extra_bytes).is_ok()
    }

    /// Fails with [`PackedError::CodecOverflow`] if column `col` cannot hold
    /// `new_data_size` bytes while keeping the safety margin in reserve.
    ///
    /// # Errors
    ///
    /// See above; also fails on a bad column.
    pub fn check_capacity(&self, col: usize, new_data_size: usize) -> PackedResult<()> {
        self.check_column(col)?;
        let available = self.max_data_size(col).saturating_sub(self.config.safety_margin);
        if new_data_size > available {
            return Err(PackedError::CodecOverflow {
                column: col,
                required: new_data_size,
                available,
            });
        }
        Ok(())
    }

    fn data_sizes(&self) -> Vec<usize> {
        (0..self.columns()).map(|col| self.data_size(col)).collect()
    }

    /// Rebuilds both indexes of column `col` as byte images.
    fn build_indexes(&self, col: usize, layout: &TreeLayout) -> PackedResult<(Vec<u8>, Vec<u8>)> {
        let mut sums = vec![0u8; layout.index_size() * i64::WIDTH];
        let mut lengths = vec![0u8; layout.index_size() * u32::WIDTH];
        let Some(leaf) = layout.leaf_level() else {
            return Ok((sums, lengths));
        };

        let g = self.config.geometry;
        let leaf_start = layout.level_start(leaf);
        let data = self.data(col);
        {
            let mut sum_index = PackedSliceMut::<i64>::new(&mut sums);
            let mut length_index = PackedSliceMut::<u32>::new(&mut lengths);
            let mut pos = 0;
            for i in 0..self.size() {
                let (value, len) = C::decode(data, pos)?;
                let at = leaf_start + g.group_of(i);
                sum_index.set(at, sum_index.get(at).add(C::to_index(value)));
                length_index.set(at, length_index.get(at).add(u32::from_usize(len)));
                pos += len;
            }
            if pos != data.len() {
                return Err(PackedError::corrupted(format!(
                    "column {col}: {} values occupy {pos} bytes, data size is {}",
                    self.size(),
                    data.len()
                )));
            }
            fill_upper_levels(layout, g, &mut sum_index);
            fill_upper_levels(layout, g, &mut length_index);
        }
        Ok((sums, lengths))
    }

    /// Verifies metadata, encoded data and both indexes of every column.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] (or a codec error) on the first
    /// violation.
    pub fn check(&self) -> PackedResult<()> {
        self.region.check()?;
        self.check_shape()?;

        let layout = self.layout();
        for col in 0..self.columns() {
            if self.data_size(col) > self.max_data_size(col) {
                return Err(PackedError::corrupted(format!(
                    "column {col}: data size {} exceeds max data size {}",
                    self.data_size(col),
                    self.max_data_size(col)
                )));
            }

            let decoded = strata_codec::decode_all::<C>(self.data(col))?;
            if decoded.len() != self.size() {
                return Err(PackedError::corrupted(format!(
                    "column {col}: decoded {} values, size is {}",
                    decoded.len(),
                    self.size()
                )));
            }

            let (sums, lengths) = self.build_indexes(col, &layout)?;
            let stored_sums = &self.region.segment(value_index_segment(col))[..sums.len()];
            let stored_lengths = &self.region.segment(length_index_segment(col))[..lengths.len()];
            if stored_sums != sums.as_slice() || stored_lengths != lengths.as_slice() {
                return Err(PackedError::corrupted(format!(
                    "column {col}: summary index is stale"
                )));
            }
        }
        Ok(())
    }

    /// Emits metadata, data sizes and decoded values of every column.
    pub fn generate_data_events(&self, handler: &mut dyn DataEventHandler) {
        handler.start_group("VAR_SEQUENCE", None);
        handler.value("SIZE", self.size().into());
        handler.value("MAX_SIZE", self.max_size().into());
        handler.value("INDEX_SIZE", self.index_size().into());

        for col in 0..self.columns() {
            handler.start_group("COLUMN", Some(col));
            handler.value("DATA_SIZE", self.data_size(col).into());
            handler.value("MAX_DATA_SIZE", self.max_data_size(col).into());

            let data = self.data(col);
            handler.start_group("VALUES", Some(self.size()));
            let mut pos = 0;
            for i in 0..self.size() {
                match C::decode(data, pos) {
                    Ok((value, len)) => {
                        handler.value(&i.to_string(), DataValue::Signed(C::to_index(value)));
                        pos += len;
                    }
                    Err(err) => {
                        handler.value(&i.to_string(), DataValue::Text(err.to_string()));
                        break;
                    }
                }
            }
            handler.end_group();

            handler.end_group();
        }

        handler.end_group();
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, C: VarintCodec> VarSequence<B, C> {
    fn set_meta(&mut self, field: usize, value: usize) {
        write_u32(self.region.segment_mut(0), field, value);
    }

    fn set_data_sizes(&mut self, col: usize, data_size: usize, max_data_size: usize) {
        let sizes = self.region.segment_mut(1);
        write_u32(sizes, col * DATA_SIZES_STRIDE, data_size);
        write_u32(sizes, col * DATA_SIZES_STRIDE + 4, max_data_size);
    }

    fn set_data_size(&mut self, col: usize, data_size: usize) {
        let max = self.max_data_size(col);
        self.set_data_sizes(col, data_size, max);
    }

    fn ensure_room(&self, required: usize) -> PackedResult<()> {
        let available = self.region.client_area() + self.region.growth_limit();
        if required > available {
            warn!("variable sequence needs {} bytes, {} available", required, available);
            return Err(PackedError::CapacityExceeded {
                allocated: self.region.allocated(),
                requested: required,
                free: available.saturating_sub(self.region.allocated()),
            });
        }
        Ok(())
    }

    /// Bounds the encoded size of column `col`.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::CodecOverflow`] if the column already holds
    /// more than `max_data_size` bytes.
    pub fn set_max_data_size(&mut self, col: usize, max_data_size: usize) -> PackedResult<()> {
        self.check_column(col)?;
        let data_size = self.data_size(col);
        if max_data_size < data_size || max_data_size > UNBOUNDED {
            return Err(PackedError::CodecOverflow {
                column: col,
                required: data_size,
                available: max_data_size,
            });
        }
        self.set_data_sizes(col, data_size, max_data_size);
        Ok(())
    }

    /// Resizes index segments for `max_size` value slots. Leaves index
    /// contents stale.
    fn resize_indexes(&mut self, max_size: usize) -> PackedResult<()> {
        let layout = compute_tree_layout(max_size, self.config.geometry);
        for col in 0..self.columns() {
            self.region.resize(value_index_segment(col), layout.index_size() * i64::WIDTH)?;
            self.region.resize(length_index_segment(col), layout.index_size() * u32::WIDTH)?;
        }

        let old = self.max_size();
        self.set_meta(META_MAX_SIZE, max_size);
        self.set_meta(META_INDEX_SIZE, layout.index_size());
        if old != max_size {
            debug!("variable sequence capacity {} -> {} ({} index entries)", old, max_size, layout.index_size());
        }
        Ok(())
    }

    /// Changes the value slot capacity and rebuilds the indexes.
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
        self.ensure_room(data_bytes(max_size, &self.config, &self.data_sizes()))?;
        self.resize_indexes(max_size)?;
        self.reindex()
    }

    /// Rebuilds both indexes of every column from the encoded data.
    ///
    /// # Errors
    ///
    /// Fails if the data does not decode to exactly `size` values.
    pub fn reindex(&mut self) -> PackedResult<()> {
        let layout = self.layout();
        for col in 0..self.columns() {
            let (sums, lengths) = self.build_indexes(col, &layout)?;
            self.region.segment_mut(value_index_segment(col))[..sums.len()].copy_from_slice(&sums);
            self.region.segment_mut(length_index_segment(col))[..lengths.len()].copy_from_slice(&lengths);
        }
        Ok(())
    }

    /// Inserts `rows` at `idx`; each row holds one value per column.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::CodecOverflow`] or
    /// [`PackedError::CapacityExceeded`] before anything is written if the
    /// encoded rows do not fit, and on bad rows or positions.
    pub fn insert<R: AsRef<[C::Value]>>(&mut self, idx: usize, rows: &[R]) -> PackedResult<()> {
        let columns = self.columns();
        if let Some(row) = rows.iter().find(|r| r.as_ref().len() != columns) {
            return Err(PackedError::BoundsViolation {
                start: 0,
                end: row.as_ref().len(),
                size: columns,
            });
        }
        let size = self.size();
        check_range(idx, size, size)?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(columns);
        let mut offsets = Vec::with_capacity(columns);
        let mut new_sizes = Vec::with_capacity(columns);
        for col in 0..columns {
            let column: Vec<C::Value> = rows.iter().map(|r| r.as_ref()[col]).collect();
            let bytes = strata_codec::encode_all::<C>(&column)?;
            let new_size = self.data_size(col) + bytes.len();
            self.check_capacity(col, new_size)?;
            offsets.push(self.locate(col, idx)?);
            new_sizes.push(new_size);
            encoded.push(bytes);
        }

        let max_size = self.max_size().max(size + rows.len());
        self.ensure_room(data_bytes(max_size, &self.config, &new_sizes))?;
        if max_size != self.max_size() {
            self.resize_indexes(max_size)?;
        }

        for (col, bytes) in encoded.iter().enumerate() {
            let old_size = self.data_size(col);
            let at = offsets[col];
            self.region.resize(data_segment(col), new_sizes[col])?;
            let data = self.region.segment_mut(data_segment(col));
            data.copy_within(at..old_size, at + bytes.len());
            data[at..at + bytes.len()].copy_from_slice(bytes);
            self.set_data_size(col, new_sizes[col]);
        }

        self.set_meta(META_SIZE, size + rows.len());
        self.reindex()
    }

    /// Appends one row.
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert).
    pub fn append(&mut self, row: &[C::Value]) -> PackedResult<()> {
        self.insert(self.size(), &[row])
    }

    /// Removes rows `[start, end)` and shrinks the sequence to fit.
    ///
    /// # Errors
    ///
    /// Fails on a range outside `[0, size]` or undecodable data.
    pub fn remove(&mut self, start: usize, end: usize) -> PackedResult<()> {
        let size = self.size();
        check_range(start, end, size)?;
        if start == end {
            return Ok(());
        }

        let mut spans = Vec::with_capacity(self.columns());
        for col in 0..self.columns() {
            spans.push((self.locate(col, start)?, self.locate(col, end)?));
        }

        for (col, (from, to)) in spans.into_iter().enumerate() {
            let old_size = self.data_size(col);
            let new_size = old_size - (to - from);
            let data = self.region.segment_mut(data_segment(col));
            data.copy_within(to..old_size, from);
            data[new_size..].fill(0);
            self.region.resize(data_segment(col), new_size)?;
            self.set_data_size(col, new_size);
        }

        let new_len = size - (end - start);
        self.set_meta(META_SIZE, new_len);
        self.resize_indexes(new_len)?;
        self.reindex()
    }

    /// Replaces `values[start..end]` of column `col` with `f(idx, old)`.
    ///
    /// The range is processed `update_window` values at a time. A dry pass
    /// sizes every window and tracks the peak data size; the column budget
    /// and the page are checked against that peak before any byte is
    /// written. The write pass then re-encodes window by window, so `f` is
    /// called twice per value and must return the same result both times.
    ///
    /// # Errors
    ///
    /// Fails with [`PackedError::CodecOverflow`] or
    /// [`PackedError::CapacityExceeded`] without modifying the sequence.
    pub fn update_values<F>(&mut self, col: usize, start: usize, end: usize, f: F) -> PackedResult<()>
    where
        F: Fn(usize, C::Value) -> C::Value,
    {
        self.check_column(col)?;
        check_range(start, end, self.size())?;
        if start == end {
            return Ok(());
        }

        let window = self.config.update_window.max(1);
        let first = self.locate(col, start)?;
        let data_size = self.data_size(col);

        let mut olds = Vec::with_capacity(window);
        let mut news = Vec::with_capacity(window);

        let mut pos = first;
        let mut current = data_size;
        let mut peak = data_size;
        for lo in (start..end).step_by(window) {
            let hi = (lo + window).min(end);
            let old_len = self.decode_window(col, pos, lo, hi, &mut olds)?;
            news.clear();
            news.extend(olds.iter().enumerate().map(|(i, &v)| f(lo + i, v)));

            pos += old_len;
            current = current + strata_codec::encoded_len::<C>(&news) - old_len;
            peak = peak.max(current);
        }
        self.check_capacity(col, peak)?;

        if peak > self.region.segment_size(data_segment(col)) {
            let mut sizes = self.data_sizes();
            sizes[col] = peak;
            self.ensure_room(data_bytes(self.max_size(), &self.config, &sizes))?;
            self.region.resize(data_segment(col), peak)?;
        }

        let mut pos = first;
        let mut current = data_size;
        for lo in (start..end).step_by(window) {
            let hi = (lo + window).min(end);
            let old_len = self.decode_window(col, pos, lo, hi, &mut olds)?;
            news.clear();
            news.extend(olds.iter().enumerate().map(|(i, &v)| f(lo + i, v)));

            let bytes = strata_codec::encode_all::<C>(&news)?;
            let data = self.region.segment_mut(data_segment(col));
            data.copy_within(pos + old_len..current, pos + bytes.len());
            data[pos..pos + bytes.len()].copy_from_slice(&bytes);

            let next = current + bytes.len() - old_len;
            if next < current {
                data[next..current].fill(0);
            }
            current = next;
            pos += bytes.len();
        }

        self.set_data_size(col, current);
        self.region.resize(data_segment(col), current)?;
        self.reindex()
    }

    /// Decodes values `lo..hi` starting at byte `pos` into `out`. Returns
    /// their encoded length. Reads the whole segment, since the tail may sit
    /// past the recorded data size while a range is being rewritten.
    fn decode_window(&self, col: usize, pos: usize, lo: usize, hi: usize, out: &mut Vec<C::Value>) -> PackedResult<usize> {
        out.clear();
        let data = self.region.segment(data_segment(col));
        let mut at = pos;
        for _ in lo..hi {
            let (value, len) = C::decode(data, at)?;
            out.push(value);
            at += len;
        }
        Ok(at - pos)
    }

    /// Replaces one value.
    ///
    /// # Errors
    ///
    /// Same as [`update_values`](Self::update_values).
    pub fn set_value(&mut self, col: usize, idx: usize, value: C::Value) -> PackedResult<()> {
        check_index(idx, self.size())?;
        self.update_values(col, idx, idx + 1, |_, _| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeGeometry;
    use crate::page::Page;
    use strata_codec::{Varint248, ZigZagVarint126};

    fn config() -> Config {
        Config::new().geometry(TreeGeometry::new(4, 4).unwrap())
    }

    fn sample(n: u64) -> Vec<u64> {
        (0..n).map(|i| if i % 3 == 0 { i * 1000 } else { i % 7 }).collect()
    }

    #[test]
    fn scenario_values_encode_and_locate() {
        let mut page = Page::new(4096, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 1, config()).unwrap();

        for v in [0u64, 125, 126, 16384] {
            seq.append(&[v]).unwrap();
        }
        assert_eq!(seq.size(), 4);
        assert_eq!(seq.data_size(0), 6);
        assert_eq!(seq.locate(0, 3).unwrap(), 3);
        assert_eq!(seq.locate(0, 4).unwrap(), 6);
        assert_eq!(seq.values(0).unwrap(), vec![0, 125, 126, 16384]);
        assert_eq!(seq.sum_all(0).unwrap(), 16635);
        seq.check().unwrap();
    }

    #[test]
    fn indexed_queries_agree_with_linear_scan() {
        let mut page = Page::new(1 << 16, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 1, config()).unwrap();
        let values = sample(55);
        let rows: Vec<[u64; 1]> = values.iter().map(|&v| [v]).collect();
        seq.insert(0, &rows).unwrap();
        assert!(seq.layout().is_indexed());

        let mut offset = 0;
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(seq.locate(0, i).unwrap(), offset);
            assert_eq!(seq.value(0, i).unwrap(), v);
            offset += Varint248::length(v);
        }

        let prefix: Vec<i64> = std::iter::once(0)
            .chain(values.iter().scan(0i64, |acc, &v| {
                *acc += v as i64;
                Some(*acc)
            }))
            .collect();
        for start in (0..=55).step_by(3) {
            for end in start..=55 {
                assert_eq!(seq.sum(0, start, end).unwrap(), prefix[end] - prefix[start]);
            }
        }

        for target in [0i64, 1, 2999, 3000, 12_000, prefix[55], prefix[55] + 1] {
            let expected = (1..=55).find(|&i| prefix[i] >= target).map_or(55, |i| i - 1);
            let found = seq.find_ge(0, target).unwrap();
            assert_eq!(found.idx, expected, "target {target}");
            assert_eq!(found.prefix, prefix[expected]);
        }

        for start in [0usize, 5, 17, 40] {
            let target = 5000;
            let fw = seq.find_ge_fw(0, start, target).unwrap();
            let expected = (start + 1..=55)
                .find(|&i| prefix[i] - prefix[start] >= target)
                .map_or(55, |i| i - 1);
            assert_eq!(fw.idx, expected, "fw start {start}");
        }

        for start in [3usize, 20, 54] {
            let target = 4000;
            let bw = seq.find_gt_bw(0, start, target).unwrap().map(|r| r.idx);
            let expected = (0..=start).rev().find(|&i| prefix[start + 1] - prefix[i] > target);
            assert_eq!(bw, expected, "bw start {start}");
        }
    }

    #[test]
    fn update_values_reencodes_across_windows() {
        let mut page = Page::new(1 << 14, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 1, config().update_window(4)).unwrap();
        let rows: Vec<[u64; 1]> = (0..30u64).map(|v| [v]).collect();
        seq.insert(0, &rows).unwrap();
        assert_eq!(seq.data_size(0), 30);

        seq.update_values(0, 5, 25, |i, v| if i % 2 == 0 { v + 100_000 } else { v }).unwrap();
        let expected: Vec<u64> = (0..30)
            .map(|v| if (5..25).contains(&v) && v % 2 == 0 { v + 100_000 } else { v })
            .collect();
        assert_eq!(seq.values(0).unwrap(), expected);
        assert_eq!(seq.data_size(0), 30 + 10 * 3);
        seq.check().unwrap();

        seq.update_values(0, 0, 30, |_, _| 1).unwrap();
        assert_eq!(seq.data_size(0), 30);
        assert_eq!(seq.sum_all(0).unwrap(), 30);
        seq.check().unwrap();
    }

    #[test]
    fn codec_overflow_is_refused_before_writing() {
        let mut page = Page::new(4096, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 1, config()).unwrap();
        let rows: Vec<[u64; 1]> = (0..10u64).map(|v| [v]).collect();
        seq.insert(0, &rows).unwrap();
        seq.set_max_data_size(0, 10 + 9 + 4).unwrap();

        assert!(seq.has_capacity_for(0, 4));
        assert!(!seq.has_capacity_for(0, 5));

        let err = seq.update_values(0, 0, 3, |_, _| 1 << 20).unwrap_err();
        assert_eq!(
            err,
            PackedError::CodecOverflow {
                column: 0,
                required: 19,
                available: 14
            }
        );
        assert_eq!(seq.values(0).unwrap(), (0..10).collect::<Vec<_>>());

        assert!(matches!(seq.append(&[1 << 40]), Err(PackedError::CodecOverflow { .. })));
        assert_eq!(seq.size(), 10);
        assert!(seq.set_max_data_size(0, 5).is_err());
        seq.check().unwrap();
    }

    #[test]
    fn insert_and_remove_keep_columns_aligned() {
        let mut page = Page::new(1 << 14, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, ZigZagVarint126>::create(&mut root, 0, 2, config()).unwrap();

        for i in 0..20i64 {
            seq.append(&[i - 10, i * 1000]).unwrap();
        }
        seq.insert(3, &[[-1_000_000, 7]]).unwrap();
        assert_eq!(seq.get_values(3).unwrap(), vec![-1_000_000, 7]);
        assert_eq!(seq.value(0, 4).unwrap(), -7);

        seq.remove(3, 4).unwrap();
        assert_eq!(seq.values(0).unwrap(), (-10..10).collect::<Vec<_>>());
        assert_eq!(seq.sum_all(1).unwrap(), 190_000);

        seq.remove(0, 15).unwrap();
        assert_eq!(seq.size(), 5);
        assert_eq!(seq.max_size(), 5);
        assert_eq!(seq.values(1).unwrap(), vec![15_000, 16_000, 17_000, 18_000, 19_000]);
        seq.check().unwrap();

        seq.set_value(0, 2, -64).unwrap();
        assert_eq!(seq.sum_all(0).unwrap(), 5 + 6 - 64 + 8 + 9);
        seq.check().unwrap();
    }

    #[test]
    fn even_column_counts_reopen_and_check() {
        for columns in [1usize, 2, 3, 4, 6] {
            let mut page = Page::new(1 << 14, 1).unwrap();
            {
                let mut root = page.root_mut();
                let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, columns, config()).unwrap();
                for i in 0..12u64 {
                    let row: Vec<u64> = (0..columns as u64).map(|c| i * 100 + c).collect();
                    seq.append(&row).unwrap();
                }
                seq.check().unwrap();
            }
            page.check().unwrap();

            let root = page.root();
            let seq = VarSequence::<_, Varint248>::open(root.child(0).unwrap(), config()).unwrap();
            assert_eq!(seq.columns(), columns, "{columns} columns");
            assert_eq!(seq.size(), 12);
            assert_eq!(seq.value(columns - 1, 5).unwrap(), 500 + columns as u64 - 1);
            seq.check().unwrap();
        }
    }

    #[test]
    fn configured_data_budget_applies_to_new_columns() {
        let mut page = Page::new(4096, 1).unwrap();
        let mut root = page.root_mut();
        let config = config().safety_margin(4).max_data_size(16);
        let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 2, config).unwrap();
        assert_eq!(seq.max_data_size(0), 16);
        assert_eq!(seq.max_data_size(1), 16);

        for v in 0..12u64 {
            seq.append(&[v, v]).unwrap();
        }
        assert!(!seq.has_capacity_for(0, 1));
        assert!(matches!(
            seq.append(&[1, 1]),
            Err(PackedError::CodecOverflow { column: 0, required: 13, available: 12 })
        ));
        assert!(matches!(
            seq.set_value(1, 0, 1 << 20),
            Err(PackedError::CodecOverflow { column: 1, .. })
        ));
        assert_eq!(seq.size(), 12);
        seq.check().unwrap();
    }

    #[test]
    fn update_values_visits_each_window_in_order_twice() {
        let mut page = Page::new(1 << 14, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 1, config().update_window(3)).unwrap();
        let rows: Vec<[u64; 1]> = (0..20u64).map(|v| [v]).collect();
        seq.insert(0, &rows).unwrap();

        let visits = std::cell::RefCell::new(Vec::new());
        seq.update_values(0, 2, 11, |i, v| {
            visits.borrow_mut().push(i);
            v * 10
        })
        .unwrap();

        let pass: Vec<usize> = (2..11).collect();
        assert_eq!(visits.into_inner(), [pass.clone(), pass].concat());
        let expected: Vec<u64> = (0..20).map(|v| if (2..11).contains(&v) { v * 10 } else { v }).collect();
        assert_eq!(seq.values(0).unwrap(), expected);
        seq.check().unwrap();
    }

    #[test]
    fn update_values_grows_then_shrinks_within_one_call() {
        let mut page = Page::new(1 << 14, 1).unwrap();
        let mut root = page.root_mut();
        let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 1, config().update_window(2)).unwrap();
        let mut model: Vec<u64> = (0..16u64).map(|v| if v >= 8 { 1 << 30 } else { v }).collect();
        let rows: Vec<[u64; 1]> = model.iter().map(|&v| [v]).collect();
        seq.insert(0, &rows).unwrap();
        let before = seq.data_size(0);

        // Early windows grow by 2 bytes a value, late windows shrink by 4.
        seq.update_values(0, 0, 16, |i, v| if i < 8 { v + 1000 } else { v >> 28 }).unwrap();
        for (i, v) in model.iter_mut().enumerate() {
            *v = if i < 8 { *v + 1000 } else { *v >> 28 };
        }

        assert_eq!(seq.values(0).unwrap(), model);
        assert_eq!(seq.data_size(0), before + 8 * 2 - 8 * 4);
        seq.check().unwrap();
    }

    #[test]
    fn reopen_and_dump() {
        let mut page = Page::new(4096, 1).unwrap();
        {
            let mut root = page.root_mut();
            let mut seq = VarSequence::<_, ZigZagVarint126>::create(&mut root, 0, 1, config()).unwrap();
            seq.append(&[-3]).unwrap();
            seq.append(&[300]).unwrap();
        }
        page.check().unwrap();

        let root = page.root();
        let seq = VarSequence::<_, ZigZagVarint126>::open(root.child(0).unwrap(), config()).unwrap();
        assert_eq!(seq.values(0).unwrap(), vec![-3, 300]);

        let mut dumper = crate::dump::TextDumper::new();
        seq.generate_data_events(&mut dumper);
        let text = dumper.finish();
        assert!(text.contains("DATA_SIZE: 4"));
        assert!(text.contains("0: -3"));
    }

    #[test]
    fn corrupted_data_is_detected() {
        let mut page = Page::new(4096, 1).unwrap();
        {
            let mut root = page.root_mut();
            let mut seq = VarSequence::<_, Varint248>::create(&mut root, 0, 1, config()).unwrap();
            seq.append(&[1]).unwrap();
            seq.append(&[2]).unwrap();
        }
        let mut root = page.root_mut();
        let mut child = root.child_mut(0).unwrap();
        child.segment_mut(data_segment(0))[1] = 0xFF;

        let seq = VarSequence::<_, Varint248>::open(child, config()).unwrap();
        assert!(seq.check().is_err());
    }
}

//! Region allocator.
//!
//! A region manages a contiguous byte range of a page as a set of
//! independently resizable segments:
//!
//! ```text
//! +---------------+------------+-------------+-----------+-----------+
//! | header (16 B) | directory  | type bitmap | segment 0 | ...       |
//! +---------------+------------+-------------+-----------+-----------+
//! ```
//!
//! Header fields (little-endian u32): `parent_offset`, `block_size`,
//! `directory_length`, `bitmap_length`. The directory holds one payload
//! offset per segment plus a terminal entry; segment `i` spans
//! `[dir[i], dir[i + 1])`. Bit `i` of the bitmap marks segment `i` as a
//! nested region.
//!
//! A nested region is found from its parent by segment index, and finds its
//! parent through `parent_offset`, the byte distance back to the parent's
//! start (0 for the root). Only [`Region::move_elements`] relocates segment
//! bytes, and it rewrites the `parent_offset` of every nested region it
//! moves, so the back-reference stays correct after any resize.
//!
//! Views borrow the whole page buffer. A `Region<&[u8]>` reads, a
//! `Region<&mut [u8]>` also mutates and may cascade growth into its
//! ancestors.

use crate::dump::{DataEventHandler, DataValue};
use crate::error::{check_index, PackedError, PackedResult};
use bytes::{Buf, BufMut};
use tracing::{debug, trace, warn};

/// Allocation quantum in bytes. Every segment size and offset is a multiple.
pub const ALIGNMENT: usize = 8;

/// Size of the fixed region header.
pub const REGION_HEADER_SIZE: usize = 16;

const PARENT_OFFSET: usize = 0;
const BLOCK_SIZE: usize = 4;
const DIRECTORY_LENGTH: usize = 8;
const BITMAP_LENGTH: usize = 12;

/// Rounds `n` up to the allocation quantum.
#[inline]
#[must_use]
pub const fn round_up(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Rounds `n` down to the allocation quantum.
#[inline]
#[must_use]
pub const fn round_down(n: usize) -> usize {
    n & !(ALIGNMENT - 1)
}

/// Directory entries for `segments`, padded so the directory stays 8-byte
/// aligned. Padding entries behave as trailing empty segments.
const fn directory_entries(segments: usize) -> usize {
    segments + if segments % 2 == 1 { 1 } else { 2 }
}

/// Bitmap bytes for `entries` bits, rounded up to whole 64-bit words.
const fn bitmap_bytes(entries: usize) -> usize {
    entries.div_ceil(64) * 8
}

const fn overhead(segments: usize) -> usize {
    let entries = directory_entries(segments);
    REGION_HEADER_SIZE + entries * 4 + bitmap_bytes(entries)
}

#[inline]
#[allow(clippy::cast_possible_wrap)]
const fn signed(n: usize) -> isize {
    n as isize
}

#[inline]
pub(crate) fn read_u32(buf: &[u8], pos: usize) -> usize {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(raw) as usize
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn write_u32(buf: &mut [u8], pos: usize, value: usize) {
    buf[pos..pos + 4].copy_from_slice(&(value as u32).to_le_bytes());
}

/// How a segment's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Plain bytes: metadata records, typed arrays, encoded data.
    Raw,
    /// An embedded child region.
    Nested,
}

impl SegmentKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Nested => "NESTED",
        }
    }
}

/// Position and size of a segment, relative to the payload start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationBlock {
    /// Offset from the start of the payload area.
    pub offset: usize,
    /// Segment size in bytes.
    pub size: usize,
}

/// Smallest block size able to hold `segments` empty segments.
#[must_use]
pub const fn empty_size(segments: usize) -> usize {
    block_size_for(0, segments)
}

/// Block size needed for `client_area` payload bytes and `segments`.
#[must_use]
pub const fn block_size_for(client_area: usize, segments: usize) -> usize {
    round_up(overhead(segments) + round_up(client_area))
}

/// Payload bytes available in a block of `block_size` with `segments`.
#[must_use]
pub const fn client_area_for(block_size: usize, segments: usize) -> usize {
    round_down(block_size.saturating_sub(overhead(segments)))
}

/// A view of one region inside a page buffer.
#[derive(Debug)]
pub struct Region<B> {
    buf: B,
    base: usize,
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Opens the region starting at `base`, validating its header.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] if the header does not describe a
    /// region that fits in `buf`.
    pub fn open(buf: B, base: usize) -> PackedResult<Self> {
        let len = buf.as_ref().len();
        if base + REGION_HEADER_SIZE > len {
            return Err(PackedError::corrupted(format!(
                "region header at {base} exceeds buffer of {len} bytes"
            )));
        }
        let region = Self { buf, base };
        region.check_header()?;
        Ok(region)
    }

    pub(crate) fn at(buf: B, base: usize) -> Self {
        Self { buf, base }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    #[inline]
    fn header(&self, field: usize) -> usize {
        read_u32(self.bytes(), self.base + field)
    }

    /// Absolute offset of this region in the page buffer.
    #[must_use]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Distance back to the containing region; 0 for the root.
    #[must_use]
    pub fn parent_offset(&self) -> usize {
        self.header(PARENT_OFFSET)
    }

    /// Whether this region is embedded in another region.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.parent_offset() > 0
    }

    /// Total size of the region, header included.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.header(BLOCK_SIZE)
    }

    /// Directory size in bytes.
    #[must_use]
    pub fn directory_length(&self) -> usize {
        self.header(DIRECTORY_LENGTH)
    }

    /// Type bitmap size in bytes.
    #[must_use]
    pub fn bitmap_length(&self) -> usize {
        self.header(BITMAP_LENGTH)
    }

    /// Number of addressable segments, including directory padding.
    #[must_use]
    pub fn segments(&self) -> usize {
        (self.directory_length() / 4).saturating_sub(1)
    }

    fn directory_start(&self) -> usize {
        self.base + REGION_HEADER_SIZE
    }

    fn bitmap_start(&self) -> usize {
        self.directory_start() + self.directory_length()
    }

    /// Absolute offset of the payload area.
    #[must_use]
    pub fn payload_start(&self) -> usize {
        self.bitmap_start() + self.bitmap_length()
    }

    /// Payload-relative offset of segment `idx`; `idx == segments()` gives
    /// the terminal entry.
    #[must_use]
    pub fn segment_offset(&self, idx: usize) -> usize {
        read_u32(self.bytes(), self.directory_start() + idx * 4)
    }

    /// Size of segment `idx` in bytes.
    #[must_use]
    pub fn segment_size(&self, idx: usize) -> usize {
        self.segment_offset(idx + 1) - self.segment_offset(idx)
    }

    /// Interpretation of segment `idx`.
    #[must_use]
    pub fn segment_kind(&self, idx: usize) -> SegmentKind {
        let byte = self.bytes()[self.bitmap_start() + idx / 8];
        if byte & (1 << (idx % 8)) != 0 {
            SegmentKind::Nested
        } else {
            SegmentKind::Raw
        }
    }

    /// Offset and size of segment `idx`.
    #[must_use]
    pub fn describe(&self, idx: usize) -> AllocationBlock {
        AllocationBlock {
            offset: self.segment_offset(idx),
            size: self.segment_size(idx),
        }
    }

    /// Bytes occupied by all segments.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.segment_offset(self.segments())
    }

    /// Payload capacity: block size minus header, directory and bitmap.
    #[must_use]
    pub fn client_area(&self) -> usize {
        self.block_size().saturating_sub(self.payload_start() - self.base)
    }

    /// Unallocated payload bytes.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.client_area().saturating_sub(self.allocated())
    }

    /// Bytes this region's block can still grow by: free space of every
    /// ancestor plus the unused tail of the page behind the root.
    #[must_use]
    pub fn growth_limit(&self) -> usize {
        if self.is_nested() {
            let parent = Region::at(self.bytes(), self.base - self.parent_offset());
            parent.free_space() + parent.growth_limit()
        } else {
            round_down(self.bytes().len() - self.base).saturating_sub(self.block_size())
        }
    }

    /// Segment containing payload-relative `offset`, if any.
    #[must_use]
    pub fn find_segment(&self, offset: usize) -> Option<usize> {
        (0..self.segments()).find(|&c| {
            offset >= self.segment_offset(c) && offset < self.segment_offset(c + 1)
        })
    }

    /// Bytes of segment `idx`.
    #[must_use]
    pub fn segment(&self, idx: usize) -> &[u8] {
        let start = self.payload_start() + self.segment_offset(idx);
        &self.bytes()[start..start + self.segment_size(idx)]
    }

    /// Read-only view of the nested region in segment `idx`.
    ///
    /// # Errors
    ///
    /// Fails if `idx` is out of range or the segment is not a nested region.
    pub fn child(&self, idx: usize) -> PackedResult<Region<&[u8]>> {
        let base = self.child_base(idx)?;
        Region::open(self.bytes(), base)
    }

    fn child_base(&self, idx: usize) -> PackedResult<usize> {
        check_index(idx, self.segments())?;
        if self.segment_kind(idx) != SegmentKind::Nested || self.segment_size(idx) == 0 {
            return Err(PackedError::corrupted(format!(
                "segment {idx} is not a nested region"
            )));
        }
        Ok(self.payload_start() + self.segment_offset(idx))
    }

    fn check_header(&self) -> PackedResult<()> {
        let len = self.bytes().len();
        let block_size = self.block_size();
        let dir = self.directory_length();
        let bitmap = self.bitmap_length();

        if self.base + block_size > len {
            return Err(PackedError::corrupted(format!(
                "block size {block_size} at {} exceeds buffer of {len} bytes",
                self.base
            )));
        }
        if dir < 8 || dir % 8 != 0 {
            return Err(PackedError::corrupted(format!(
                "invalid directory length {dir}"
            )));
        }
        if bitmap != bitmap_bytes(dir / 4) {
            return Err(PackedError::corrupted(format!(
                "bitmap length {bitmap} does not match {} directory entries",
                dir / 4
            )));
        }
        if REGION_HEADER_SIZE + dir + bitmap > block_size {
            return Err(PackedError::corrupted(format!(
                "region overhead exceeds block size {block_size}"
            )));
        }
        Ok(())
    }

    /// Verifies all structural invariants, recursing into nested regions.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] describing the first violation.
    pub fn check(&self) -> PackedResult<()> {
        self.check_header()?;

        if self.segment_offset(0) != 0 {
            return Err(PackedError::corrupted("first segment offset is not 0"));
        }

        for c in 0..self.segments() {
            let start = self.segment_offset(c);
            let end = self.segment_offset(c + 1);
            if end < start {
                return Err(PackedError::corrupted(format!(
                    "directory entry {} ({end}) precedes entry {c} ({start})",
                    c + 1
                )));
            }
            if end % ALIGNMENT != 0 {
                return Err(PackedError::corrupted(format!(
                    "segment {c} ends at unaligned offset {end}"
                )));
            }
        }

        if self.allocated() > self.client_area() {
            return Err(PackedError::corrupted(format!(
                "allocated {} exceeds client area {}",
                self.allocated(),
                self.client_area()
            )));
        }

        for c in 0..self.segments() {
            if self.segment_kind(c) != SegmentKind::Nested || self.segment_size(c) == 0 {
                continue;
            }
            let child = self.child(c)?;
            if child.parent_offset() != child.base - self.base {
                return Err(PackedError::corrupted(format!(
                    "segment {c}: parent offset {} does not point back to region at {}",
                    child.parent_offset(),
                    self.base
                )));
            }
            if child.block_size() > self.segment_size(c) {
                return Err(PackedError::corrupted(format!(
                    "segment {c}: nested block size {} exceeds segment size {}",
                    child.block_size(),
                    self.segment_size(c)
                )));
            }
            child.check()?;
        }

        Ok(())
    }

    /// Writes header, directory, bitmap and allocated payload to `out`.
    pub fn serialize<M: BufMut>(&self, out: &mut M) {
        for field in [PARENT_OFFSET, BLOCK_SIZE, DIRECTORY_LENGTH, BITMAP_LENGTH] {
            out.put_u32_le(self.header(field) as u32);
        }

        for c in 0..=self.segments() {
            out.put_u32_le(self.segment_offset(c) as u32);
        }

        let bitmap = self.bitmap_start();
        for word in 0..self.bitmap_length() / 8 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&self.bytes()[bitmap + word * 8..bitmap + word * 8 + 8]);
            out.put_u64_le(u64::from_le_bytes(raw));
        }

        let payload = self.payload_start();
        out.put_slice(&self.bytes()[payload..payload + self.allocated()]);
    }

    /// Emits the region header and segment table.
    pub fn generate_data_events(&self, handler: &mut dyn DataEventHandler) {
        handler.start_group("ALLOCATOR", None);
        handler.value("PARENT_OFFSET", self.parent_offset().into());
        handler.value("BLOCK_SIZE", self.block_size().into());
        handler.value("CLIENT_AREA", self.client_area().into());
        handler.value("FREE_SPACE", self.free_space().into());
        handler.value("DIRECTORY_LENGTH", self.directory_length().into());
        handler.value("BITMAP_LENGTH", self.bitmap_length().into());

        handler.start_group("SEGMENTS", Some(self.segments()));
        for c in 0..self.segments() {
            handler.start_group(&c.to_string(), None);
            handler.value("OFFSET", self.segment_offset(c).into());
            handler.value("SIZE", self.segment_size(c).into());
            handler.value("KIND", DataValue::from(self.segment_kind(c).as_str()));
            handler.end_group();
        }
        handler.end_group();

        handler.end_group();
    }
}

impl<'a> Region<&'a [u8]> {
    /// Like [`child`](Region::child), but the result borrows the page
    /// buffer instead of this view.
    ///
    /// # Errors
    ///
    /// Fails if `idx` is out of range or the segment is not a nested region.
    pub fn into_child(self, idx: usize) -> PackedResult<Region<&'a [u8]>> {
        let base = self.child_base(idx)?;
        Region::open(self.buf, base)
    }
}

impl<'a> Region<&'a mut [u8]> {
    /// Like [`child_mut`](Region::child_mut), but the result borrows the
    /// page buffer instead of this view.
    ///
    /// # Errors
    ///
    /// Fails if `idx` is out of range or the segment is not a nested region.
    pub fn into_child_mut(self, idx: usize) -> PackedResult<Region<&'a mut [u8]>> {
        let base = self.child_base(idx)?;
        Region::open(self.buf, base)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Region<B> {
    /// Lays out an empty region of `capacity` bytes at `base`.
    ///
    /// The block size is `capacity` rounded down to [`ALIGNMENT`]. The
    /// directory and bitmap are zero-filled; the region is a root until a
    /// parent anchors it.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if the header, directory
    /// and bitmap do not fit.
    pub fn init(mut buf: B, base: usize, capacity: usize, segments: usize) -> PackedResult<Self> {
        let block_size = round_down(capacity);
        let needed = overhead(segments);
        let available = buf.as_ref().len().saturating_sub(base);

        if needed > block_size || block_size > available {
            warn!("region init refused: needs {} bytes, block {} of {}", needed, block_size, available);
            return Err(PackedError::CapacityExceeded {
                allocated: 0,
                requested: needed.max(block_size),
                free: block_size.min(available),
            });
        }

        let entries = directory_entries(segments);
        let bytes = buf.as_mut();
        write_u32(bytes, base + PARENT_OFFSET, 0);
        write_u32(bytes, base + BLOCK_SIZE, block_size);
        write_u32(bytes, base + DIRECTORY_LENGTH, entries * 4);
        write_u32(bytes, base + BITMAP_LENGTH, bitmap_bytes(entries));
        bytes[base + REGION_HEADER_SIZE..base + needed].fill(0);

        Ok(Self { buf, base })
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    fn set_header(&mut self, field: usize, value: usize) {
        let pos = self.base + field;
        write_u32(self.bytes_mut(), pos, value);
    }

    fn set_segment_offset(&mut self, idx: usize, value: usize) {
        let pos = self.directory_start() + idx * 4;
        write_u32(self.bytes_mut(), pos, value);
    }

    fn set_segment_kind(&mut self, idx: usize, kind: SegmentKind) {
        let pos = self.bitmap_start() + idx / 8;
        let bit = 1u8 << (idx % 8);
        let byte = &mut self.bytes_mut()[pos];
        match kind {
            SegmentKind::Nested => *byte |= bit,
            SegmentKind::Raw => *byte &= !bit,
        }
    }

    /// Mutable bytes of segment `idx`.
    pub fn segment_mut(&mut self, idx: usize) -> &mut [u8] {
        let start = self.payload_start() + self.segment_offset(idx);
        let size = self.segment_size(idx);
        &mut self.bytes_mut()[start..start + size]
    }

    /// Mutable view of the nested region in segment `idx`.
    ///
    /// # Errors
    ///
    /// Fails if `idx` is out of range or the segment is not a nested region.
    pub fn child_mut(&mut self, idx: usize) -> PackedResult<Region<&mut [u8]>> {
        let base = self.child_base(idx)?;
        Region::open(self.buf.as_mut(), base)
    }

    /// Sizes segment `idx` to `size` bytes (rounded up), records its kind
    /// and zero-fills it. A nested segment is initialised as an empty
    /// one-segment region; use [`allocate_region`](Self::allocate_region)
    /// to choose the segment count.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if neither this region nor
    /// its ancestors can make room. Nothing is modified in that case.
    pub fn allocate(&mut self, idx: usize, size: usize, kind: SegmentKind) -> PackedResult<AllocationBlock> {
        match kind {
            SegmentKind::Raw => self.allocate_block(idx, size, kind),
            SegmentKind::Nested => {
                let size = size.max(empty_size(1));
                let block = self.allocate_block(idx, size, kind)?;
                self.init_child(idx, block.size, 1)?;
                Ok(block)
            }
        }
    }

    /// Allocates segment `idx` as an empty nested region with `segments`.
    ///
    /// # Errors
    ///
    /// Same as [`allocate`](Self::allocate).
    pub fn allocate_region(&mut self, idx: usize, segments: usize) -> PackedResult<AllocationBlock> {
        let size = empty_size(segments);
        let block = self.allocate_block(idx, size, SegmentKind::Nested)?;
        self.init_child(idx, block.size, segments)?;
        Ok(block)
    }

    fn init_child(&mut self, idx: usize, size: usize, segments: usize) -> PackedResult<()> {
        let child_base = self.payload_start() + self.segment_offset(idx);
        let parent_offset = child_base - self.base;
        let mut child = Region::init(self.buf.as_mut(), child_base, size, segments)?;
        child.set_header(PARENT_OFFSET, parent_offset);
        Ok(())
    }

    fn allocate_block(&mut self, idx: usize, size: usize, kind: SegmentKind) -> PackedResult<AllocationBlock> {
        check_index(idx, self.segments())?;

        let allocation = round_up(size);
        self.resize_segment(idx, allocation)?;
        self.set_segment_kind(idx, kind);
        self.segment_mut(idx).fill(0);

        Ok(self.describe(idx))
    }

    /// Grows or shrinks segment `idx` to `new_size` bytes (rounded up).
    ///
    /// Grown bytes are zero-filled. Shrinking a nested region's segment
    /// packs the region into its parent.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if growth cannot be
    /// satisfied; the page is left unchanged.
    pub fn resize(&mut self, idx: usize, new_size: usize) -> PackedResult<usize> {
        check_index(idx, self.segments())?;
        self.resize_segment(idx, new_size)
    }

    /// Releases segment `idx`, compacting the following segments.
    ///
    /// # Errors
    ///
    /// Fails on an invalid index, or if packing into the parent fails.
    pub fn free(&mut self, idx: usize) -> PackedResult<()> {
        check_index(idx, self.segments())?;
        self.resize_segment(idx, 0)?;
        self.set_segment_kind(idx, SegmentKind::Raw);
        Ok(())
    }

    /// Zero-fills segment `idx`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid index.
    pub fn clear(&mut self, idx: usize) -> PackedResult<()> {
        check_index(idx, self.segments())?;
        self.segment_mut(idx).fill(0);
        Ok(())
    }

    /// Replaces segment `idx` with a copy of segment `src_idx` of `src`.
    ///
    /// A nested copy is re-anchored to this region.
    ///
    /// # Errors
    ///
    /// Fails on invalid indices or when the copy does not fit.
    pub fn import_segment<S: AsRef<[u8]>>(&mut self, idx: usize, src: &Region<S>, src_idx: usize) -> PackedResult<()> {
        check_index(idx, self.segments())?;
        check_index(src_idx, src.segments())?;

        let data = src.segment(src_idx);
        let kind = src.segment_kind(src_idx);

        self.resize_segment(idx, data.len())?;
        self.set_segment_kind(idx, kind);
        self.segment_mut(idx).copy_from_slice(data);

        if kind == SegmentKind::Nested && !data.is_empty() {
            let child_base = self.payload_start() + self.segment_offset(idx);
            let parent_offset = child_base - self.base;
            write_u32(self.bytes_mut(), child_base + PARENT_OFFSET, parent_offset);
        }

        Ok(())
    }

    /// Grows the block by at least `delta` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if no ancestor can grow.
    pub fn enlarge(&mut self, delta: usize) -> PackedResult<usize> {
        let target = round_up(self.block_size() + delta);
        self.resize_block(target)
    }

    /// Shrinks the block by up to `delta` bytes, never below what is in use.
    ///
    /// # Errors
    ///
    /// Fails only if an ancestor cannot compact.
    pub fn shrink(&mut self, delta: usize) -> PackedResult<usize> {
        let target = round_up(self.block_size().saturating_sub(delta));
        self.resize_block(target)
    }

    /// Sets the block size, resizing the parent segment when nested.
    ///
    /// A root region may grow up to the end of the page buffer. Requests
    /// below the bytes in use are raised to that amount.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] when the root cannot grow.
    pub fn resize_block(&mut self, new_size: usize) -> PackedResult<usize> {
        let in_use = round_up(self.payload_start() - self.base + self.allocated());
        let new_size = round_up(new_size).max(in_use);
        let old_size = self.block_size();

        if self.is_nested() {
            let parent_base = self.base - self.parent_offset();
            let mut parent = Region::at(self.buf.as_mut(), parent_base);
            let my_offset = self.base - parent.payload_start();
            let idx = parent.find_segment(my_offset).ok_or_else(|| {
                PackedError::corrupted(format!(
                    "nested region at {} not found in parent at {parent_base}",
                    self.base
                ))
            })?;
            let granted = parent.resize_segment(idx, new_size)?;
            self.set_header(BLOCK_SIZE, granted);
        } else {
            let limit = round_down(self.bytes().len() - self.base);
            if new_size > limit {
                warn!(
                    "root region at {} cannot grow from {} to {} (page limit {})",
                    self.base, old_size, new_size, limit
                );
                return Err(PackedError::CapacityExceeded {
                    allocated: self.allocated(),
                    requested: new_size,
                    free: self.free_space(),
                });
            }
            self.set_header(BLOCK_SIZE, new_size);
        }

        if self.block_size() != old_size {
            debug!("region at {} resized from {} to {} bytes", self.base, old_size, self.block_size());
        }
        Ok(self.block_size())
    }

    /// Shrinks the block to exactly what is in use.
    ///
    /// # Errors
    ///
    /// Fails only if an ancestor cannot compact.
    pub fn pack(&mut self) -> PackedResult<usize> {
        let target = self.block_size() - self.free_space();
        self.resize_block(target)
    }

    fn resize_segment(&mut self, idx: usize, new_size: usize) -> PackedResult<usize> {
        let allocation = round_up(new_size);
        let size = self.segment_size(idx);

        if allocation > size {
            let delta = allocation - size;
            let free = self.free_space();
            if delta > free {
                // Ancestors grow first; any refusal happens before bytes move.
                self.enlarge(delta - free)?;
            }
            self.move_elements(idx + 1, signed(delta));

            let end = self.payload_start() + self.segment_offset(idx + 1);
            self.bytes_mut()[end - delta..end].fill(0);
        } else if allocation < size {
            self.move_elements(idx + 1, -signed(size - allocation));
            if self.is_nested() {
                self.pack()?;
            }
        }

        Ok(allocation)
    }

    /// Shifts segments `start_idx..` by `delta` bytes and updates the
    /// directory.
    ///
    /// Growth moves the last segment first, shrink moves the first segment
    /// first, so overlapping ranges are never clobbered. Every moved nested
    /// region gets its `parent_offset` rewritten here.
    pub(crate) fn move_elements(&mut self, start_idx: usize, delta: isize) {
        let terminal = self.segments();
        let distance = delta.unsigned_abs();

        if delta > 0 {
            for c in (start_idx..terminal).rev() {
                self.move_segment_data(c, delta);
            }
            for c in start_idx..=terminal {
                let offset = self.segment_offset(c) + distance;
                self.set_segment_offset(c, offset);
            }
        } else if delta < 0 {
            for c in start_idx..terminal {
                self.move_segment_data(c, delta);
            }
            for c in start_idx..=terminal {
                let offset = self.segment_offset(c) - distance;
                self.set_segment_offset(c, offset);
            }
        }
    }

    fn move_segment_data(&mut self, idx: usize, delta: isize) {
        let size = self.segment_size(idx);
        if size == 0 {
            return;
        }

        let from = self.payload_start() + self.segment_offset(idx);
        let to = from.saturating_add_signed(delta);
        trace!("region at {}: segment {} moves {} bytes from {} to {}", self.base, idx, size, from, to);
        self.bytes_mut().copy_within(from..from + size, to);

        if self.segment_kind(idx) == SegmentKind::Nested {
            let parent_offset = to - self.base;
            write_u32(self.bytes_mut(), to + PARENT_OFFSET, parent_offset);
        }
    }

    /// Replaces this region's contents with a serialized region.
    ///
    /// The serialized `parent_offset` is kept as read, so deserializing a
    /// root image yields a root.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] if `input` is truncated, does not
    /// fit in the space this region may occupy, or fails [`check`](Self::check).
    pub fn deserialize<R: Buf>(&mut self, input: &mut R) -> PackedResult<()> {
        let available = self.bytes().len() - self.base;

        if input.remaining() < REGION_HEADER_SIZE {
            return Err(PackedError::corrupted("truncated region header"));
        }
        let parent_offset = input.get_u32_le() as usize;
        let block_size = input.get_u32_le() as usize;
        let directory_length = input.get_u32_le() as usize;
        let bitmap_length = input.get_u32_le() as usize;

        if block_size > available {
            return Err(PackedError::corrupted(format!(
                "serialized block size {block_size} exceeds {available} available bytes"
            )));
        }
        if directory_length < 8
            || directory_length % 8 != 0
            || bitmap_length != bitmap_bytes(directory_length / 4)
            || REGION_HEADER_SIZE + directory_length + bitmap_length > block_size
        {
            return Err(PackedError::corrupted(format!(
                "invalid serialized layout: directory {directory_length}, bitmap {bitmap_length}, block {block_size}"
            )));
        }
        if input.remaining() < directory_length + bitmap_length {
            return Err(PackedError::corrupted("truncated directory or bitmap"));
        }

        self.set_header(PARENT_OFFSET, parent_offset);
        self.set_header(BLOCK_SIZE, block_size);
        self.set_header(DIRECTORY_LENGTH, directory_length);
        self.set_header(BITMAP_LENGTH, bitmap_length);

        for c in 0..directory_length / 4 {
            let offset = input.get_u32_le() as usize;
            self.set_segment_offset(c, offset);
        }

        let bitmap = self.bitmap_start();
        for word in 0..bitmap_length / 8 {
            let value = input.get_u64_le();
            let pos = bitmap + word * 8;
            self.bytes_mut()[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
        }

        let allocated = self.allocated();
        let client_area = self.client_area();
        if allocated > client_area {
            return Err(PackedError::corrupted(format!(
                "serialized allocation {allocated} exceeds client area {client_area}"
            )));
        }
        if input.remaining() < allocated {
            return Err(PackedError::corrupted(format!(
                "truncated payload: need {allocated} bytes, have {}",
                input.remaining()
            )));
        }

        let payload = self.payload_start();
        input.copy_to_slice(&mut self.bytes_mut()[payload..payload + allocated]);
        self.bytes_mut()[payload + allocated..payload + client_area].fill(0);

        self.check()
    }
}

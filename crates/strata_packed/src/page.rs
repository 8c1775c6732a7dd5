//! Fixed-capacity page owning one root region.

use crate::error::{PackedError, PackedResult};
use crate::region::{round_down, Region, REGION_HEADER_SIZE};
use bytes::{Bytes, BytesMut};

/// An owned, fixed-capacity byte buffer with a root region at offset 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    buf: Vec<u8>,
}

impl Page {
    /// Largest supported page; directory entries are 32-bit.
    pub const MAX_CAPACITY: usize = u32::MAX as usize;

    /// Creates a zeroed page of `capacity` bytes whose root region has
    /// `segments` segments and spans the whole page.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if the root region header
    /// does not fit, or the capacity exceeds [`Page::MAX_CAPACITY`].
    pub fn new(capacity: usize, segments: usize) -> PackedResult<Self> {
        if capacity > Self::MAX_CAPACITY {
            return Err(PackedError::CapacityExceeded {
                allocated: 0,
                requested: capacity,
                free: Self::MAX_CAPACITY,
            });
        }

        let mut buf = vec![0u8; round_down(capacity)];
        let len = buf.len();
        Region::init(buf.as_mut_slice(), 0, len, segments)?;
        Ok(Self { buf })
    }

    /// Page capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Raw page bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Read-only view of the root region.
    #[must_use]
    pub fn root(&self) -> Region<&[u8]> {
        Region::at(self.buf.as_slice(), 0)
    }

    /// Mutable view of the root region.
    pub fn root_mut(&mut self) -> Region<&mut [u8]> {
        Region::at(self.buf.as_mut_slice(), 0)
    }

    /// Verifies the whole region tree.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] on the first violated invariant.
    pub fn check(&self) -> PackedResult<()> {
        let root = self.root();
        if root.is_nested() {
            return Err(PackedError::corrupted(format!(
                "root region has parent offset {}",
                root.parent_offset()
            )));
        }
        root.check()
    }

    /// Serializes the root region (header, directory, bitmap, payload).
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let root = self.root();
        let mut out = BytesMut::with_capacity(root.payload_start() + root.allocated());
        root.serialize(&mut out);
        out.freeze()
    }

    /// Rebuilds a page from [`Page::to_bytes`] output. The page capacity is
    /// the serialized root block size.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::Corrupted`] if `data` is not a valid image.
    pub fn from_bytes(data: &[u8]) -> PackedResult<Self> {
        Self::from_bytes_with_limit(data, Self::MAX_CAPACITY)
    }

    /// Like [`Page::from_bytes`], refusing images whose block size exceeds
    /// `max_capacity`. The image layout is validated against `data` before
    /// the page buffer is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`PackedError::CapacityExceeded`] if the block size is over
    /// the limit, or [`PackedError::Corrupted`] if `data` is not a valid
    /// image.
    pub fn from_bytes_with_limit(data: &[u8], max_capacity: usize) -> PackedResult<Self> {
        if data.len() < REGION_HEADER_SIZE {
            return Err(PackedError::corrupted("page image shorter than a region header"));
        }
        let header = Region::at(data, 0);
        if header.is_nested() {
            return Err(PackedError::corrupted("page image is not a root region"));
        }

        let block_size = header.block_size();
        if block_size > max_capacity.min(Self::MAX_CAPACITY) {
            return Err(PackedError::CapacityExceeded {
                allocated: 0,
                requested: block_size,
                free: max_capacity.min(Self::MAX_CAPACITY),
            });
        }

        let payload_start = header.payload_start();
        if header.directory_length() < 8 || payload_start > data.len() || payload_start > block_size {
            return Err(PackedError::corrupted(format!(
                "page image of {} bytes cannot hold a directory of {} bytes",
                data.len(),
                header.directory_length()
            )));
        }
        let used = payload_start + header.allocated();
        if used > data.len() || used > block_size {
            return Err(PackedError::corrupted(format!(
                "page image of {} bytes is truncated, {used} bytes in use",
                data.len()
            )));
        }

        let mut buf = vec![0u8; block_size];
        let mut input = data;
        Region::at(buf.as_mut_slice(), 0).deserialize(&mut input)?;
        Ok(Self { buf })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::SegmentKind;

    #[test]
    fn new_page_has_empty_root() {
        let page = Page::new(4096, 4).unwrap();
        assert_eq!(page.capacity(), 4096);
        assert_eq!(page.root().block_size(), 4096);
        assert_eq!(page.root().allocated(), 0);
        page.check().unwrap();
    }

    #[test]
    fn bytes_roundtrip() {
        let mut page = Page::new(1024, 2).unwrap();
        {
            let mut root = page.root_mut();
            root.allocate(0, 24, SegmentKind::Raw).unwrap();
            root.segment_mut(0)[0] = 42;
            root.allocate_region(1, 3).unwrap();
            root.child_mut(1).unwrap().allocate(2, 16, SegmentKind::Raw).unwrap();
        }

        let image = page.to_bytes();
        let restored = Page::from_bytes(&image).unwrap();
        assert_eq!(restored.to_bytes(), image);
        assert_eq!(restored.root().segment(0)[0], 42);
        restored.check().unwrap();
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(Page::from_bytes(&[1, 2, 3]).is_err());
        assert!(Page::from_bytes(&[0xFF; 64]).is_err());
    }

    #[test]
    fn oversized_header_is_rejected_before_allocating() {
        let mut image = vec![0u8; REGION_HEADER_SIZE];
        image[4..8].copy_from_slice(&(u32::MAX - 7).to_le_bytes());
        image[8..12].copy_from_slice(&8u32.to_le_bytes());
        image[12..16].copy_from_slice(&8u32.to_le_bytes());

        assert!(matches!(Page::from_bytes(&image), Err(PackedError::Corrupted { .. })));
        assert!(matches!(
            Page::from_bytes_with_limit(&image, 1 << 20),
            Err(PackedError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn capacity_limit_applies_to_valid_images() {
        let page = Page::new(8192, 1).unwrap();
        let image = page.to_bytes();
        assert!(image.len() < 4096);

        assert!(matches!(
            Page::from_bytes_with_limit(&image, 4096),
            Err(PackedError::CapacityExceeded { requested: 8192, .. })
        ));
        let restored = Page::from_bytes_with_limit(&image, 8192).unwrap();
        assert_eq!(restored.capacity(), 8192);
    }
}

//! # Strata Packed
//!
//! Packed page storage for Strata: a sub-block allocator and succinct,
//! index-accelerated sequences living inside one fixed-capacity buffer.
//!
//! This crate provides:
//! - [`Page`] - an owned buffer hosting a root [`Region`]
//! - [`Region`] - a segment allocator whose segments may be nested regions
//! - [`FixedSequence`] - fixed-width columns with a multi-level sum index
//! - [`VarSequence`] - varint-encoded columns with value and byte-length indexes
//! - [`Walker`] - the search protocol shared by index descent and leaf scans
//!
//! ## Layout
//!
//! Every structure is a region: a 16-byte header, a directory of segment
//! offsets, a bitmap marking nested segments, then the payload. Nested
//! regions store the distance back to their parent, so a page can be copied
//! or serialized as plain bytes.
//!
//! ## Example
//!
//! ```
//! use strata_packed::{FixedSequence, Page, TreeGeometry};
//!
//! let mut page = Page::new(4096, 1).unwrap();
//! let mut root = page.root_mut();
//! let mut seq = FixedSequence::<_, u64>::create(&mut root, 0, 1, 0, TreeGeometry::DEFAULT).unwrap();
//!
//! for v in [3, 1, 4, 1, 5] {
//!     seq.append(&[v]).unwrap();
//! }
//! assert_eq!(seq.sum(0, 1, 4).unwrap(), 6);
//! assert_eq!(seq.find_ge(0, 8).unwrap().idx, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dump;
mod error;
pub mod fixed;
mod layout;
mod page;
pub mod region;
mod value;
pub mod vle;
mod walker;

pub use config::{Config, TreeGeometry};
pub use dump::{DataEventHandler, DataValue, TextDumper};
pub use error::{PackedError, PackedResult};
pub use fixed::FixedSequence;
pub use layout::{compute_tree_layout, index_size, TreeLayout, MAX_LEVELS};
pub use page::Page;
pub use region::{AllocationBlock, Region, SegmentKind, ALIGNMENT, REGION_HEADER_SIZE};
pub use value::IndexValue;
pub use vle::VarSequence;
pub use walker::{FindGeWalker, FindGtWalker, FindResult, RankWalker, SumWalker, Walker};

pub use strata_codec::{Varint248, VarintCodec, ZigZagVarint126};

//! Error types for packed page operations.

use thiserror::Error;

/// Result type for packed page operations.
pub type PackedResult<T> = Result<T, PackedError>;

/// Errors that can occur while mutating or querying packed structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackedError {
    /// A region cannot satisfy a growth request within its bound.
    ///
    /// The page is left unchanged; the caller should move the data to a
    /// larger page and retry.
    #[error("capacity exceeded: allocated {allocated}, requested {requested}, free {free}")]
    CapacityExceeded {
        /// Bytes currently allocated in the region that refused.
        allocated: usize,
        /// Block size that was requested.
        requested: usize,
        /// Free bytes in that region.
        free: usize,
    },

    /// A logical index outside the valid range.
    #[error("invalid index {index} (size {size})")]
    InvalidIndex {
        /// The offending index.
        index: usize,
        /// Number of valid positions.
        size: usize,
    },

    /// A range that is reversed or extends past the end.
    #[error("bounds violation: [{start}, {end}) with size {size}")]
    BoundsViolation {
        /// Range start.
        start: usize,
        /// Range end.
        end: usize,
        /// Current size.
        size: usize,
    },

    /// Re-encoding would exceed a column's reserved data size.
    #[error("codec overflow in column {column}: need {required} bytes, {available} available")]
    CodecOverflow {
        /// Column whose budget would be exceeded.
        column: usize,
        /// Data size the operation would produce.
        required: usize,
        /// Largest data size the column allows.
        available: usize,
    },

    /// Varint codec error while reading page data.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// The page bytes are structurally invalid.
    #[error("corrupted page: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Tree fan-in parameters are not usable.
    #[error("invalid tree geometry: {message}")]
    InvalidGeometry {
        /// Description of the problem.
        message: String,
    },
}

impl PackedError {
    /// Creates a corrupted page error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid geometry error.
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }

    /// Creates an invalid index error.
    pub fn invalid_index(index: usize, size: usize) -> Self {
        Self::InvalidIndex { index, size }
    }
}

/// Fails with [`PackedError::BoundsViolation`] unless `start <= end <= size`.
pub(crate) fn check_range(start: usize, end: usize, size: usize) -> PackedResult<()> {
    if start > end || end > size {
        return Err(PackedError::BoundsViolation { start, end, size });
    }
    Ok(())
}

/// Fails with [`PackedError::InvalidIndex`] unless `index < size`.
pub(crate) fn check_index(index: usize, size: usize) -> PackedResult<()> {
    if index >= size {
        return Err(PackedError::invalid_index(index, size));
    }
    Ok(())
}

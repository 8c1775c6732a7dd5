//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer ended before a complete value could be read.
    #[error("unexpected end of input at {pos}: need {needed} bytes, have {available}")]
    UnexpectedEof {
        /// Position where the read started.
        pos: usize,
        /// Bytes required to finish the read.
        needed: usize,
        /// Bytes available from `pos`.
        available: usize,
    },

    /// A header byte outside the codec's valid range.
    #[error("invalid varint header {header:#04x} at {pos}")]
    InvalidHeader {
        /// The offending header byte.
        header: u8,
        /// Position of the header byte.
        pos: usize,
    },

    /// The destination buffer cannot hold the encoded value.
    #[error("buffer too small at {pos}: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Position where the write started.
        pos: usize,
        /// Bytes the encoding requires.
        needed: usize,
        /// Bytes available from `pos`.
        available: usize,
    },
}

impl CodecError {
    /// Creates an unexpected end of input error.
    pub fn unexpected_eof(pos: usize, needed: usize, available: usize) -> Self {
        Self::UnexpectedEof {
            pos,
            needed,
            available,
        }
    }

    /// Creates a buffer too small error.
    pub fn buffer_too_small(pos: usize, needed: usize, available: usize) -> Self {
        Self::BufferTooSmall {
            pos,
            needed,
            available,
        }
    }
}

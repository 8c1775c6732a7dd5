//! # Strata Codec
//!
//! Variable-length integer codecs for Strata packed pages.
//!
//! Every codec uses the same threshold-header wire format:
//! - a header byte below the codec's `THRESHOLD` is the value itself
//! - a header of `THRESHOLD + (L - 1)` is followed by `L` little-endian
//!   payload bytes (`1 <= L <= 8`)
//!
//! [`VarintCodec::length`] predicts exactly how many bytes
//! [`VarintCodec::encode`] will write, so callers can reserve space in a page
//! before they encode into it.
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{Varint248, VarintCodec};
//!
//! let mut buf = [0u8; 16];
//! let len = Varint248::encode(&mut buf, 0, 16384).unwrap();
//! assert_eq!(len, Varint248::length(16384));
//!
//! let (value, read) = Varint248::decode(&buf, 0).unwrap();
//! assert_eq!((value, read), (16384, len));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod header;
mod zigzag;

pub use error::{CodecError, CodecResult};
pub use zigzag::{zigzag_decode, zigzag_encode};

use std::fmt::Debug;

/// A variable-length element codec.
///
/// Implementations are stateless; all methods are associated functions.
pub trait VarintCodec {
    /// Decoded element type.
    type Value: Copy + Debug + Default + PartialEq + Send + Sync + 'static;

    /// Header values below this threshold are stored in a single byte.
    const THRESHOLD: u8;

    /// Longest encoding this codec can produce.
    const MAX_LEN: usize;

    /// Returns the number of bytes `encode` writes for `value`.
    fn length(value: Self::Value) -> usize;

    /// Encodes `value` at `pos`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BufferTooSmall`] if fewer than `length(value)`
    /// bytes are available; nothing is written in that case.
    fn encode(buffer: &mut [u8], pos: usize, value: Self::Value) -> CodecResult<usize>;

    /// Decodes the value at `pos`, returning it with its encoded length.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or the payload is truncated.
    fn decode(buffer: &[u8], pos: usize) -> CodecResult<(Self::Value, usize)>;

    /// Returns the encoded length of the value at `pos` from its header alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is missing or invalid.
    fn length_at(buffer: &[u8], pos: usize) -> CodecResult<usize>;

    /// Widens a decoded value for summation in a 64-bit index.
    fn to_index(value: Self::Value) -> i64;
}

/// Unsigned codec with a 248 header threshold.
///
/// Values `0..=247` take one byte; larger values take `1 + L` bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Varint248;

impl VarintCodec for Varint248 {
    type Value = u64;

    const THRESHOLD: u8 = 248;
    const MAX_LEN: usize = 1 + header::MAX_PAYLOAD;

    #[inline]
    fn length(value: u64) -> usize {
        header::length(Self::THRESHOLD, value)
    }

    fn encode(buffer: &mut [u8], pos: usize, value: u64) -> CodecResult<usize> {
        header::encode(Self::THRESHOLD, buffer, pos, value)
    }

    fn decode(buffer: &[u8], pos: usize) -> CodecResult<(u64, usize)> {
        header::decode(Self::THRESHOLD, buffer, pos)
    }

    fn length_at(buffer: &[u8], pos: usize) -> CodecResult<usize> {
        header::length_at(Self::THRESHOLD, buffer, pos)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn to_index(value: u64) -> i64 {
        value as i64
    }
}

/// Signed codec: zigzag mapping followed by a 126 header threshold.
///
/// Values in `-63..=62` take one byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZigZagVarint126;

impl VarintCodec for ZigZagVarint126 {
    type Value = i64;

    const THRESHOLD: u8 = 126;
    const MAX_LEN: usize = 1 + header::MAX_PAYLOAD;

    #[inline]
    fn length(value: i64) -> usize {
        header::length(Self::THRESHOLD, zigzag_encode(value))
    }

    fn encode(buffer: &mut [u8], pos: usize, value: i64) -> CodecResult<usize> {
        header::encode(Self::THRESHOLD, buffer, pos, zigzag_encode(value))
    }

    fn decode(buffer: &[u8], pos: usize) -> CodecResult<(i64, usize)> {
        header::decode(Self::THRESHOLD, buffer, pos).map(|(raw, len)| (zigzag_decode(raw), len))
    }

    fn length_at(buffer: &[u8], pos: usize) -> CodecResult<usize> {
        header::length_at(Self::THRESHOLD, buffer, pos)
    }

    fn to_index(value: i64) -> i64 {
        value
    }
}

/// Total encoded length of a slice of values.
pub fn encoded_len<C: VarintCodec>(values: &[C::Value]) -> usize {
    values.iter().map(|v| C::length(*v)).sum()
}

/// Encodes all values back to back into a fresh buffer.
pub fn encode_all<C: VarintCodec>(values: &[C::Value]) -> CodecResult<Vec<u8>> {
    let mut buffer = vec![0u8; encoded_len::<C>(values)];
    let mut pos = 0;
    for value in values {
        pos += C::encode(&mut buffer, pos, *value)?;
    }
    Ok(buffer)
}

/// Decodes consecutive values until the buffer is exhausted.
///
/// # Errors
///
/// Returns an error if the buffer ends in the middle of a value.
pub fn decode_all<C: VarintCodec>(buffer: &[u8]) -> CodecResult<Vec<C::Value>> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < buffer.len() {
        let (value, len) = C::decode(buffer, pos)?;
        values.push(value);
        pos += len;
    }
    Ok(values)
}

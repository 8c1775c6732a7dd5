//! Fixed-width element types storable in packed arrays.

use crate::dump::DataValue;
use std::fmt::{Debug, Display};

/// A fixed-width, summable element stored little-endian in a page.
///
/// Index entries use the same type as the values they summarise; sums wrap
/// on overflow rather than panicking.
pub trait IndexValue:
    Copy + Default + PartialEq + PartialOrd + Debug + Display + Send + Sync + 'static
{
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// The additive identity.
    const ZERO: Self;

    /// The value one, used by rank/select on 0/1 columns.
    const ONE: Self;

    /// Wrapping addition.
    fn add(self, other: Self) -> Self;

    /// Wrapping subtraction.
    fn sub(self, other: Self) -> Self;

    /// Reads a value from the first `WIDTH` bytes of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;

    /// Writes the value into the first `WIDTH` bytes of `bytes`.
    fn write_le(self, bytes: &mut [u8]);

    /// Converts a count, wrapping if it does not fit.
    fn from_usize(n: usize) -> Self;

    /// Diagnostic representation.
    fn data_value(self) -> DataValue;
}

macro_rules! impl_index_value {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl IndexValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                const ZERO: Self = 0;
                const ONE: Self = 1;

                #[inline]
                fn add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }

                #[inline]
                fn sub(self, other: Self) -> Self {
                    self.wrapping_sub(other)
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$ty>::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                fn from_usize(n: usize) -> Self {
                    n as $ty
                }

                fn data_value(self) -> DataValue {
                    DataValue::$variant(self.into())
                }
            }
        )*
    };
}

impl_index_value!(u32 => Unsigned, u64 => Unsigned, i32 => Signed, i64 => Signed);

/// Read-only little-endian view over a packed array of `V`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PackedSlice<'a, V> {
    bytes: &'a [u8],
    _marker: std::marker::PhantomData<V>,
}

impl<'a, V: IndexValue> PackedSlice<'a, V> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            _marker: std::marker::PhantomData,
        }
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> V {
        V::read_le(&self.bytes[idx * V::WIDTH..])
    }
}

/// Mutable little-endian view over a packed array of `V`.
#[derive(Debug)]
pub(crate) struct PackedSliceMut<'a, V> {
    bytes: &'a mut [u8],
    _marker: std::marker::PhantomData<V>,
}

impl<'a, V: IndexValue> PackedSliceMut<'a, V> {
    pub(crate) fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            bytes,
            _marker: std::marker::PhantomData,
        }
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> V {
        V::read_le(&self.bytes[idx * V::WIDTH..])
    }

    #[inline]
    pub(crate) fn set(&mut self, idx: usize, value: V) {
        value.write_le(&mut self.bytes[idx * V::WIDTH..]);
    }

    /// Moves `count` elements from `from` to `to`; ranges may overlap.
    pub(crate) fn copy_within(&mut self, from: usize, to: usize, count: usize) {
        let w = V::WIDTH;
        self.bytes.copy_within(from * w..(from + count) * w, to * w);
    }

    /// Zero-fills `[start, end)`.
    pub(crate) fn zero(&mut self, start: usize, end: usize) {
        self.bytes[start * V::WIDTH..end * V::WIDTH].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_roundtrip() {
        let mut buf = [0u8; 16];
        let mut slice = PackedSliceMut::<u32>::new(&mut buf);
        slice.set(0, 7);
        slice.set(3, u32::MAX);
        assert_eq!(slice.get(0), 7);
        assert_eq!(slice.get(3), u32::MAX);
        assert_eq!(buf[..4], [7, 0, 0, 0]);
    }

    #[test]
    fn copy_within_shifts_right() {
        let mut buf = [0u8; 32];
        let mut slice = PackedSliceMut::<u64>::new(&mut buf);
        slice.set(0, 1);
        slice.set(1, 2);
        slice.copy_within(0, 1, 2);
        assert_eq!(slice.get(1), 1);
        assert_eq!(slice.get(2), 2);
    }

    #[test]
    fn wrapping_arithmetic() {
        assert_eq!(IndexValue::add(u32::MAX, 2u32), 1);
        assert_eq!(IndexValue::sub(0i64, 5), -5);
    }
}

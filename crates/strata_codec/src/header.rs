//! Threshold-header wire format shared by every codec generation.
//!
//! A header byte below `threshold` is the value itself. A header of
//! `threshold + (L - 1)` announces `L` little-endian payload bytes.

use crate::error::{CodecError, CodecResult};

/// Largest payload a header can announce.
pub(crate) const MAX_PAYLOAD: usize = 8;

/// Number of significant bytes in a non-zero value.
#[inline]
pub(crate) const fn payload_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    (bits + 7) / 8
}

#[inline]
pub(crate) const fn length(threshold: u8, value: u64) -> usize {
    if value < threshold as u64 {
        1
    } else {
        1 + payload_len(value)
    }
}

pub(crate) fn encode(threshold: u8, buffer: &mut [u8], pos: usize, value: u64) -> CodecResult<usize> {
    let len = length(threshold, value);
    let available = buffer.len().saturating_sub(pos);
    if available < len {
        return Err(CodecError::buffer_too_small(pos, len, available));
    }

    if len == 1 {
        buffer[pos] = value as u8;
    } else {
        let payload = len - 1;
        buffer[pos] = threshold + (payload as u8 - 1);
        buffer[pos + 1..pos + len].copy_from_slice(&value.to_le_bytes()[..payload]);
    }

    Ok(len)
}

pub(crate) fn length_at(threshold: u8, buffer: &[u8], pos: usize) -> CodecResult<usize> {
    let header = *buffer
        .get(pos)
        .ok_or_else(|| CodecError::unexpected_eof(pos, 1, 0))?;

    if header < threshold {
        return Ok(1);
    }

    let payload = (header - threshold) as usize + 1;
    if payload > MAX_PAYLOAD {
        return Err(CodecError::InvalidHeader { header, pos });
    }

    Ok(1 + payload)
}

pub(crate) fn decode(threshold: u8, buffer: &[u8], pos: usize) -> CodecResult<(u64, usize)> {
    let len = length_at(threshold, buffer, pos)?;
    if len == 1 {
        return Ok((buffer[pos] as u64, 1));
    }

    let available = buffer.len() - pos;
    if available < len {
        return Err(CodecError::unexpected_eof(pos, len, available));
    }

    let mut bytes = [0u8; 8];
    bytes[..len - 1].copy_from_slice(&buffer[pos + 1..pos + len]);
    Ok((u64::from_le_bytes(bytes), len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_len_counts_significant_bytes() {
        assert_eq!(payload_len(1), 1);
        assert_eq!(payload_len(255), 1);
        assert_eq!(payload_len(256), 2);
        assert_eq!(payload_len(u64::MAX), 8);
    }

    #[test]
    fn header_above_max_payload_is_rejected() {
        // threshold 126 allows headers 126..=133
        let buf = [134u8, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            length_at(126, &buf, 0),
            Err(CodecError::InvalidHeader { header: 134, pos: 0 })
        );
    }

    #[test]
    fn truncated_payload_is_eof() {
        let buf = [249u8, 0x01];
        assert!(matches!(
            decode(248, &buf, 0),
            Err(CodecError::UnexpectedEof { needed: 3, .. })
        ));
    }
}

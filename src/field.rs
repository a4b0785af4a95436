//! Bit-precise big-endian field codec.
//!
//! Fields live at an arbitrary bit offset and width within a header's own
//! byte buffer. Widths up to 64 bits resolve to an unsigned integer; wider,
//! byte-aligned widths resolve to a raw byte sequence.

use crate::{Error, Result};

/// The value carried by a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// An unsigned integer value, used for fields of width <= 64 bits.
    Int(u64),
    /// A raw byte sequence, used for fields wider than 64 bits.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// View this value as an integer, treating byte sequences as big-endian.
    pub fn as_int(&self) -> u64 {
        match self {
            FieldValue::Int(v) => *v,
            FieldValue::Bytes(b) => b.iter().fold(0u64, |acc, byte| (acc << 8) | *byte as u64),
        }
    }
}

/// Extract a `width`-bit big-endian value starting at `bit_offset` within `buf`.
///
/// `width` must be <= 64. Panics (via assertion, a Runtime assertion class
/// error in the wider engine) if the read would run off the end of `buf`.
pub fn extract_bits(buf: &[u8], bit_offset: u32, width: u32) -> Result<u64> {
    if width > 64 {
        return Err(Error::Assertion(format!(
            "extract_bits: width {width} exceeds 64 bits; use extract_bytes"
        )));
    }
    let end_bit = bit_offset as usize + width as usize;
    if end_bit > buf.len() * 8 {
        return Err(Error::Assertion(format!(
            "extract_bits: bit range [{bit_offset}, {end_bit}) exceeds buffer of {} bytes",
            buf.len()
        )));
    }
    let mut value: u64 = 0;
    let mut remaining = width;
    let mut bitpos = bit_offset;
    while remaining > 0 {
        let byte_index = (bitpos / 8) as usize;
        let bit_in_byte = bitpos % 8;
        let take = remaining.min(8 - bit_in_byte);
        let shift = 8 - bit_in_byte - take;
        let mask = ((1u16 << take) - 1) as u8;
        let bits = (buf[byte_index] >> shift) & mask;
        value = (value << take) | bits as u64;
        remaining -= take;
        bitpos += take;
    }
    Ok(value)
}

/// Insert a `width`-bit big-endian `value` at `bit_offset` within `buf`,
/// leaving untouched bits outside the range as they were.
pub fn insert_bits(buf: &mut [u8], bit_offset: u32, width: u32, value: u64) -> Result<()> {
    if width > 64 {
        return Err(Error::Assertion(format!(
            "insert_bits: width {width} exceeds 64 bits; use insert_bytes"
        )));
    }
    let end_bit = bit_offset as usize + width as usize;
    if end_bit > buf.len() * 8 {
        return Err(Error::Assertion(format!(
            "insert_bits: bit range [{bit_offset}, {end_bit}) exceeds buffer of {} bytes",
            buf.len()
        )));
    }
    let mut remaining = width;
    let mut bitpos = bit_offset;
    while remaining > 0 {
        let byte_index = (bitpos / 8) as usize;
        let bit_in_byte = bitpos % 8;
        let take = remaining.min(8 - bit_in_byte);
        let shift = 8 - bit_in_byte - take;
        let chunk_shift = remaining - take;
        let mask = ((1u16 << take) - 1) as u8;
        let bits = ((value >> chunk_shift) & mask as u64) as u8;
        buf[byte_index] = (buf[byte_index] & !(mask << shift)) | (bits << shift);
        remaining -= take;
        bitpos += take;
    }
    Ok(())
}

/// Extract a byte-aligned, multi-byte field wider than 64 bits.
pub fn extract_bytes(buf: &[u8], bit_offset: u32, width: u32) -> Result<Vec<u8>> {
    if bit_offset % 8 != 0 || width % 8 != 0 {
        return Err(Error::Assertion(format!(
            "extract_bytes: offset {bit_offset} / width {width} must be byte-aligned"
        )));
    }
    let byte_offset = (bit_offset / 8) as usize;
    let nbytes = (width / 8) as usize;
    buf.get(byte_offset..byte_offset + nbytes)
        .map(|s| s.to_vec())
        .ok_or_else(|| Error::Assertion("extract_bytes: out of range".to_string()))
}

/// Insert a byte-aligned, multi-byte field wider than 64 bits.
pub fn insert_bytes(buf: &mut [u8], bit_offset: u32, bytes: &[u8]) -> Result<()> {
    if bit_offset % 8 != 0 {
        return Err(Error::Assertion(format!(
            "insert_bytes: offset {bit_offset} must be byte-aligned"
        )));
    }
    let byte_offset = (bit_offset / 8) as usize;
    let dst = buf
        .get_mut(byte_offset..byte_offset + bytes.len())
        .ok_or_else(|| Error::Assertion("insert_bytes: out of range".to_string()))?;
    dst.copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_widths_offsets_zeroed() {
        for width in 1..=32u32 {
            for offset in 0..32u32 {
                if offset + width > 64 {
                    continue;
                }
                let max = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
                for value in [0, 1, max / 2, max] {
                    let mut buf = vec![0u8; 8];
                    insert_bits(&mut buf, offset, width, value).unwrap();
                    let got = extract_bits(&buf, offset, width).unwrap();
                    assert_eq!(got, value, "width={width} offset={offset} value={value}");
                }
            }
        }
    }

    #[test]
    fn round_trip_all_widths_offsets_all_ones() {
        for width in 1..=32u32 {
            for offset in 0..32u32 {
                if offset + width > 64 {
                    continue;
                }
                let max = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
                for value in [0, 1, max / 2, max] {
                    let mut buf = vec![0xFFu8; 8];
                    insert_bits(&mut buf, offset, width, value).unwrap();
                    let got = extract_bits(&buf, offset, width).unwrap();
                    assert_eq!(got, value, "width={width} offset={offset} value={value}");
                }
            }
        }
    }

    #[test]
    fn insert_preserves_neighboring_bits() {
        let mut buf = [0xFFu8, 0xFF];
        insert_bits(&mut buf, 4, 4, 0).unwrap();
        assert_eq!(buf, [0xF0, 0xFF]);
    }

    #[test]
    fn byte_aligned_wide_field_round_trips() {
        let mut buf = vec![0u8; 16];
        let value = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        insert_bytes(&mut buf, 0, &value).unwrap();
        assert_eq!(extract_bytes(&buf, 0, 80).unwrap(), value);
    }

    #[test]
    fn out_of_range_is_assertion_error() {
        let buf = [0u8; 1];
        assert!(matches!(extract_bits(&buf, 4, 8), Err(Error::Assertion(_))));
    }
}

//! Protocol-buffer wire primitives.
//!
//! Varints are little-endian base-128 with the continuation flag in the high
//! bit of each byte. A field header is the varint of `(tag << 3) | wire_type`,
//! followed by the value: a varint, 8 or 4 little-endian bytes, or a varint
//! length prefix and that many bytes.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Largest tag allowed by the encoding (29 bits).
pub const MAX_TAG: u32 = (1 << 29) - 1;

/// Longest encoding of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Encoding category of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer (integers, booleans, enums).
    Varint = 0,
    /// Eight little-endian bytes.
    Fixed64 = 1,
    /// Varint length prefix followed by that many bytes.
    LengthDelimited = 2,
    /// Four little-endian bytes.
    Fixed32 = 5,
}

impl WireType {
    /// Decodes the low three bits of a field key.
    ///
    /// Groups (3 and 4) and the unassigned values are rejected.
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            _ => Err(Error::Malformed),
        }
    }
}

/// Number of bytes `value` occupies as a varint.
#[must_use]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Appends the varint encoding of `value` to `out`.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        #[expect(clippy::cast_possible_truncation)]
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    #[expect(clippy::cast_possible_truncation)]
    out.push(value as u8);
}

/// Decodes a varint from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(Error::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::Malformed)
}

/// Maps signed integers onto unsigned ones so small magnitudes stay short.
#[must_use]
#[expect(clippy::cast_sign_loss)]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[must_use]
#[expect(clippy::cast_possible_wrap)]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Appends the header for `tag` with the given wire type.
pub fn encode_header(tag: u32, wire_type: WireType, out: &mut Vec<u8>) {
    encode_varint((u64::from(tag) << 3) | wire_type as u64, out);
}

/// Decodes a field header, returning tag, wire type and header length.
pub fn decode_header(bytes: &[u8]) -> Result<(u32, WireType, usize)> {
    let (key, len) = decode_varint(bytes)?;
    let tag = u32::try_from(key >> 3).map_err(|_| Error::Malformed)?;
    if tag == 0 || tag > MAX_TAG {
        return Err(Error::Malformed);
    }
    #[expect(clippy::cast_possible_truncation)]
    let wire_type = WireType::from_bits((key & 7) as u8)?;
    Ok((tag, wire_type, len))
}

/// Byte layout of one field occurrence, in absolute buffer offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawField {
    pub tag: u32,
    pub wire_type: WireType,
    /// Length of the tag header.
    pub tag_len: usize,
    /// Length of the length prefix (zero unless length-delimited).
    pub len_len: usize,
    /// First byte of the value.
    pub start: usize,
    /// One past the last byte of the value.
    pub end: usize,
}

impl RawField {
    /// Offset of the tag header.
    pub fn offset(&self) -> usize {
        self.start - self.len_len - self.tag_len
    }
}

/// Iterator over the field occurrences of an encoded message.
///
/// Stops after the first error.
pub(crate) struct Fields<'a> {
    bytes: &'a [u8],
    base: usize,
    pos: usize,
    failed: bool,
}

impl<'a> Fields<'a> {
    /// Scans `bytes`, reporting offsets relative to `base`.
    pub fn new(bytes: &'a [u8], base: usize) -> Self {
        Self {
            bytes,
            base,
            pos: 0,
            failed: false,
        }
    }

    fn read(&mut self) -> Result<RawField> {
        let rest = &self.bytes[self.pos..];
        let (tag, wire_type, tag_len) = decode_header(rest)?;
        let rest = &rest[tag_len..];
        let (len_len, value_len) = match wire_type {
            WireType::Varint => (0, decode_varint(rest)?.1),
            WireType::Fixed64 => (0, 8),
            WireType::Fixed32 => (0, 4),
            WireType::LengthDelimited => {
                let (len, len_len) = decode_varint(rest)?;
                let len = usize::try_from(len).map_err(|_| Error::Malformed)?;
                (len_len, len)
            }
        };
        if rest.len() - len_len < value_len {
            return Err(Error::Malformed);
        }
        let start = self.base + self.pos + tag_len + len_len;
        self.pos += tag_len + len_len + value_len;
        Ok(RawField {
            tag,
            wire_type,
            tag_len,
            len_len,
            start,
            end: start + value_len,
        })
    }
}

impl Iterator for Fields<'_> {
    type Item = Result<RawField>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.bytes.len() {
            return None;
        }
        let field = self.read();
        self.failed = field.is_err();
        Some(field)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, &[0x00])]
    #[case(1, &[0x01])]
    #[case(127, &[0x7f])]
    #[case(150, &[0x96, 0x01])]
    #[case(300, &[0xac, 0x02])]
    #[case(u64::MAX, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01])]
    fn varint_encoding(#[case] value: u64, #[case] bytes: &[u8]) {
        let mut out = Vec::new();
        encode_varint(value, &mut out);
        assert_eq!(out, bytes);
        assert_eq!(varint_len(value), bytes.len());
        assert_eq!(decode_varint(bytes).unwrap(), (value, bytes.len()));
    }

    #[test]
    fn varint_past_ten_bytes_overflows() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02];
        assert_eq!(decode_varint(&bytes), Err(Error::VarintOverflow));
        let bytes = [0x80; 11];
        assert_eq!(decode_varint(&bytes), Err(Error::VarintOverflow));
    }

    #[test]
    fn truncated_varint_is_malformed() {
        assert_eq!(decode_varint(&[0x96]), Err(Error::Malformed));
        assert_eq!(decode_varint(&[]), Err(Error::Malformed));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(-1, 1)]
    #[case(1, 2)]
    #[case(-2, 3)]
    #[case(i64::MAX, u64::MAX - 1)]
    #[case(i64::MIN, u64::MAX)]
    fn zigzag(#[case] signed: i64, #[case] unsigned: u64) {
        assert_eq!(zigzag_encode(signed), unsigned);
        assert_eq!(zigzag_decode(unsigned), signed);
    }

    #[test]
    fn header_rejects_tag_zero_and_groups() {
        assert_eq!(decode_header(&[0x00]), Err(Error::Malformed));
        // tag 1, start group
        assert_eq!(decode_header(&[0x0b]), Err(Error::Malformed));
        assert_eq!(
            decode_header(&[0x12]).unwrap(),
            (2, WireType::LengthDelimited, 1)
        );
    }

    #[test]
    fn scans_all_wire_types() {
        let bytes = vec![
            0x08, 0x96, 0x01, // 1: varint 150
            0x12, 0x04, b't', b'e', b's', b't', // 2: "test"
            0x1d, 0x01, 0x00, 0x00, 0x00, // 3: fixed32 1
            0x21, 0x02, 0, 0, 0, 0, 0, 0, 0, // 4: fixed64 2
        ];
        let fields: Vec<_> = Fields::new(&bytes, 100).map(Result::unwrap).collect();
        assert_eq!(fields.len(), 4);
        assert_eq!((fields[0].start, fields[0].end), (101, 103));
        assert_eq!((fields[1].offset(), fields[1].start, fields[1].end), (103, 105, 109));
        assert_eq!(fields[1].len_len, 1);
        assert_eq!((fields[2].start, fields[2].end), (110, 114));
        assert_eq!((fields[3].start, fields[3].end), (115, 123));
    }

    #[test]
    fn scan_stops_on_truncated_length() {
        let bytes = [0x08, 0x01, 0x12, 0x05, b'a'];
        let mut fields = Fields::new(&bytes, 0);
        assert!(fields.next().unwrap().is_ok());
        assert_eq!(fields.next(), Some(Err(Error::Malformed)));
        assert_eq!(fields.next(), None);
    }
}

//! Field types and decoded values.
//!
//! A [`FieldType`] fixes both the wire type and the [`Value`] variant a field
//! reads and writes. Several field types share a variant: `sint32`,
//! `sfixed32` and `enum` use [`Value::Int32`], for example, and only differ in
//! how the number is laid out on the wire.

use alloc::{string::String, vec::Vec};

use bstr::BString;

use crate::{
    error::{Error, Result},
    wire::{self, WireType},
};

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum FieldType {
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Float,
    Double,
    Bool,
    Enum,
    String,
    Bytes,
    Message,
}

impl FieldType {
    /// Wire type used for a single (unpacked) occurrence.
    #[must_use]
    pub fn wire_type(self) -> WireType {
        match self {
            Self::Int32
            | Self::Int64
            | Self::UInt32
            | Self::UInt64
            | Self::SInt32
            | Self::SInt64
            | Self::Bool
            | Self::Enum => WireType::Varint,
            Self::Fixed64 | Self::SFixed64 | Self::Double => WireType::Fixed64,
            Self::Fixed32 | Self::SFixed32 | Self::Float => WireType::Fixed32,
            Self::String | Self::Bytes | Self::Message => WireType::LengthDelimited,
        }
    }

    /// Whether values of this type may be packed into one length-delimited
    /// occurrence.
    #[must_use]
    pub fn is_packable(self) -> bool {
        self.wire_type() != WireType::LengthDelimited
    }

    /// Whether values are compared as raw bytes rather than numbers.
    pub(crate) fn is_length_delimited(self) -> bool {
        self.wire_type() == WireType::LengthDelimited
    }
}

/// Cardinality of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Label {
    /// Exactly one occurrence is expected; the engine does not enforce it.
    Required,
    /// At most one logical value; the last occurrence wins.
    #[default]
    Optional,
    /// Any number of occurrences.
    Repeated,
}

/// A decoded field value.
///
/// # Examples
///
/// ```
/// use protosplice::Value;
///
/// assert_eq!(Value::from(150_u32), Value::UInt32(150));
/// assert_eq!(Value::from("test"), Value::String("test".into()));
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    /// Raw bytes, also used for embedded messages.
    Bytes(BString),
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v.into())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.into())
    }
}

impl Value {
    /// Returns the string slice if the value is a [`Value::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes if the value is a [`Value::Bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Decodes the value bytes of one occurrence (no header, no length prefix).
#[expect(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn decode(ty: FieldType, bytes: &[u8]) -> Result<Value> {
    let value = match ty {
        // negative int32 values are sign-extended to ten bytes
        FieldType::Int32 | FieldType::Enum => Value::Int32(varint(bytes)? as i32),
        FieldType::Int64 => Value::Int64(varint(bytes)? as i64),
        FieldType::UInt32 => Value::UInt32(varint32(bytes)?),
        FieldType::UInt64 => Value::UInt64(varint(bytes)?),
        FieldType::SInt32 => {
            let raw = varint32(bytes)?;
            Value::Int32(wire::zigzag_decode(u64::from(raw)) as i32)
        }
        FieldType::SInt64 => Value::Int64(wire::zigzag_decode(varint(bytes)?)),
        FieldType::Bool => Value::Bool(varint32(bytes)? != 0),
        FieldType::Fixed32 => Value::UInt32(u32::from_le_bytes(fixed(bytes)?)),
        FieldType::SFixed32 => Value::Int32(i32::from_le_bytes(fixed(bytes)?)),
        FieldType::Float => Value::Float(f32::from_le_bytes(fixed(bytes)?)),
        FieldType::Fixed64 => Value::UInt64(u64::from_le_bytes(fixed(bytes)?)),
        FieldType::SFixed64 => Value::Int64(i64::from_le_bytes(fixed(bytes)?)),
        FieldType::Double => Value::Double(f64::from_le_bytes(fixed(bytes)?)),
        FieldType::String => Value::String(
            core::str::from_utf8(bytes)
                .map_err(|_| Error::Malformed)?
                .into(),
        ),
        FieldType::Bytes | FieldType::Message => Value::Bytes(bytes.into()),
    };
    Ok(value)
}

/// Encodes `value` as the value bytes of one occurrence of a field of type
/// `ty`. Returns `None` when the variant does not belong to `ty`.
pub(crate) fn encode(ty: FieldType, value: &Value, out: &mut Vec<u8>) -> Option<()> {
    match (ty, value) {
        (FieldType::Int32 | FieldType::Enum, Value::Int32(v)) => {
            #[expect(clippy::cast_sign_loss)]
            wire::encode_varint(i64::from(*v) as u64, out);
        }
        (FieldType::Int64, Value::Int64(v)) => {
            #[expect(clippy::cast_sign_loss)]
            wire::encode_varint(*v as u64, out);
        }
        (FieldType::UInt32, Value::UInt32(v)) => wire::encode_varint(u64::from(*v), out),
        (FieldType::UInt64, Value::UInt64(v)) => wire::encode_varint(*v, out),
        (FieldType::SInt32, Value::Int32(v)) => {
            // 32-bit zigzag keeps the result within u32
            #[expect(clippy::cast_sign_loss)]
            let zz = ((*v << 1) ^ (*v >> 31)) as u32;
            wire::encode_varint(u64::from(zz), out);
        }
        (FieldType::SInt64, Value::Int64(v)) => wire::encode_varint(wire::zigzag_encode(*v), out),
        (FieldType::Bool, Value::Bool(v)) => out.push(u8::from(*v)),
        (FieldType::Fixed32, Value::UInt32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::SFixed32, Value::Int32(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Float, Value::Float(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Fixed64, Value::UInt64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::SFixed64, Value::Int64(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Double, Value::Double(v)) => out.extend_from_slice(&v.to_le_bytes()),
        (FieldType::String, Value::String(v)) => out.extend_from_slice(v.as_bytes()),
        (FieldType::Bytes | FieldType::Message, Value::Bytes(v)) => out.extend_from_slice(v),
        _ => return None,
    }
    Some(())
}

/// Decodes every element of a packed run.
pub(crate) fn decode_packed(ty: FieldType, mut bytes: &[u8], out: &mut Vec<Value>) -> Result<()> {
    while !bytes.is_empty() {
        let len = match ty.wire_type() {
            WireType::Varint => wire::decode_varint(bytes)?.1,
            WireType::Fixed32 => 4,
            WireType::Fixed64 => 8,
            WireType::LengthDelimited => return Err(Error::Malformed),
        };
        let (head, tail) = bytes.split_at_checked(len).ok_or(Error::Malformed)?;
        out.push(decode(ty, head)?);
        bytes = tail;
    }
    Ok(())
}

fn varint(bytes: &[u8]) -> Result<u64> {
    let (value, len) = wire::decode_varint(bytes)?;
    if len != bytes.len() {
        return Err(Error::Malformed);
    }
    Ok(value)
}

fn varint32(bytes: &[u8]) -> Result<u32> {
    u32::try_from(varint(bytes)?).map_err(|_| Error::VarintOverflow)
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| Error::Malformed)
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(FieldType::Int32, Value::Int32(-1), &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01])]
    #[case(FieldType::Int32, Value::Int32(150), &[0x96, 0x01])]
    #[case(FieldType::SInt32, Value::Int32(-1), &[0x01])]
    #[case(FieldType::SInt32, Value::Int32(i32::MIN), &[0xff, 0xff, 0xff, 0xff, 0x0f])]
    #[case(FieldType::SInt64, Value::Int64(-2), &[0x03])]
    #[case(FieldType::UInt64, Value::UInt64(300), &[0xac, 0x02])]
    #[case(FieldType::Bool, Value::Bool(true), &[0x01])]
    #[case(FieldType::Enum, Value::Int32(2), &[0x02])]
    #[case(FieldType::Fixed32, Value::UInt32(1), &[1, 0, 0, 0])]
    #[case(FieldType::SFixed64, Value::Int64(-1), &[0xff; 8])]
    #[case(FieldType::Float, Value::Float(1.0), &[0x00, 0x00, 0x80, 0x3f])]
    #[case(FieldType::Double, Value::Double(0.5), &[0, 0, 0, 0, 0, 0, 0xe0, 0x3f])]
    #[case(FieldType::String, Value::from("test"), b"test")]
    #[case(FieldType::Bytes, Value::from(&b"\x00\xff"[..]), b"\x00\xff")]
    fn encodes_and_decodes(#[case] ty: FieldType, #[case] value: Value, #[case] bytes: &[u8]) {
        let mut out = Vec::new();
        encode(ty, &value, &mut out).unwrap();
        assert_eq!(out, bytes);
        assert_eq!(decode(ty, bytes).unwrap(), value);
    }

    #[test]
    fn rejects_mismatched_variant() {
        let mut out = Vec::new();
        assert_eq!(encode(FieldType::UInt32, &Value::Int32(1), &mut out), None);
        assert_eq!(encode(FieldType::Message, &Value::from("x"), &mut out), None);
        assert!(out.is_empty());
    }

    #[test]
    fn uint32_overflow() {
        let mut out = Vec::new();
        wire::encode_varint(u64::from(u32::MAX) + 1, &mut out);
        assert_eq!(decode(FieldType::UInt32, &out), Err(Error::VarintOverflow));
        // int32 truncates like every other protobuf decoder
        assert_eq!(decode(FieldType::Int32, &out), Ok(Value::Int32(0)));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert_eq!(decode(FieldType::String, &[0xff]), Err(Error::Malformed));
    }

    #[test]
    fn packed_run() {
        let mut values = Vec::new();
        decode_packed(FieldType::UInt32, &[0x03, 0x8e, 0x02, 0x9e, 0xa7, 0x05], &mut values).unwrap();
        assert_eq!(
            values,
            vec![Value::UInt32(3), Value::UInt32(270), Value::UInt32(86942)]
        );

        values.clear();
        assert_eq!(
            decode_packed(FieldType::Fixed32, &[1, 0, 0], &mut values),
            Err(Error::Malformed)
        );
    }
}

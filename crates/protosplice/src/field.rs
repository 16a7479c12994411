//! Operations on single field occurrences, shared by messages and cursors.

use alloc::vec::Vec;

use crate::{
    binary::Binary,
    descriptor::{FieldDescriptor, MessageDescriptor},
    error::{Error, Result},
    part::{Part, PartId, PartKind},
    value::{self, Value},
    wire::{self, Fields, RawField, WireType},
};

pub(crate) fn lookup(message: &MessageDescriptor, tag: u32) -> Result<&FieldDescriptor> {
    message.field(tag).ok_or(Error::UnknownField { tag })
}

/// Occurrences of every field inside a message part.
pub(crate) fn scan<'b>(binary: &'b Binary, message: &Part) -> Fields<'b> {
    Fields::new(binary.value(message), message.start)
}

/// Value bytes of a scanned occurrence.
pub(crate) fn bytes<'b>(binary: &'b Binary, raw: &RawField) -> &'b [u8] {
    &binary.as_bytes()[raw.start..raw.end]
}

/// Layout of a tracked field occurrence.
pub(crate) fn layout(part: &Part) -> Option<RawField> {
    let PartKind::Field { tag, wire_type } = part.kind else {
        return None;
    };
    Some(RawField {
        tag,
        wire_type,
        tag_len: part.tag_len,
        len_len: part.len_len,
        start: part.start,
        end: part.end,
    })
}

/// Repeated scalars may arrive packed or unpacked, whatever the descriptor
/// prefers.
pub(crate) fn accepts(field: &FieldDescriptor, wire_type: WireType) -> bool {
    let element = field.field_type().wire_type();
    wire_type == element
        || (field.is_repeated()
            && field.field_type().is_packable()
            && wire_type == WireType::LengthDelimited)
}

pub(crate) fn check_wire(field: &FieldDescriptor, raw: &RawField) -> Result<()> {
    if accepts(field, raw.wire_type) {
        Ok(())
    } else {
        Err(Error::WireTypeMismatch {
            tag: field.tag(),
            expected: field.wire_type(),
            actual: raw.wire_type,
        })
    }
}

/// A length-delimited occurrence of a scalar field: a packed run.
pub(crate) fn is_packed_run(field: &FieldDescriptor, raw: &RawField) -> bool {
    raw.wire_type == WireType::LengthDelimited && !field.field_type().is_length_delimited()
}

/// Value bytes of one element of `field`.
pub(crate) fn encode_value(field: &FieldDescriptor, value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    value::encode(field.field_type(), value, &mut out)
        .ok_or(Error::ValueMismatch { tag: field.tag() })?;
    Ok(out)
}

/// Header, length prefix and value of a new occurrence. For packed fields
/// this is a run holding one element.
pub(crate) fn encode_occurrence(field: &FieldDescriptor, value: &[u8]) -> Vec<u8> {
    let wire_type = field.wire_type();
    let mut out = Vec::with_capacity(2 * wire::MAX_VARINT_LEN + value.len());
    wire::encode_header(field.tag(), wire_type, &mut out);
    if wire_type == WireType::LengthDelimited {
        wire::encode_varint(value.len() as u64, &mut out);
    }
    out.extend_from_slice(value);
    out
}

/// Decodes an occurrence; a packed run yields its first element.
pub(crate) fn decode(field: &FieldDescriptor, raw: &RawField, bytes: &[u8]) -> Result<Value> {
    check_wire(field, raw)?;
    let ty = field.field_type();
    if is_packed_run(field, raw) {
        let mut values = Vec::new();
        value::decode_packed(ty, bytes, &mut values)?;
        return values
            .into_iter()
            .next()
            .ok_or(Error::FieldNotFound { tag: field.tag() });
    }
    value::decode(ty, bytes)
}

/// Length-delimited values compare as encoded bytes, scalars as decoded
/// numbers.
pub(crate) fn matches(field: &FieldDescriptor, raw: &RawField, bytes: &[u8], wanted: &Value) -> bool {
    if field.field_type().is_length_delimited() {
        let mut encoded = Vec::new();
        value::encode(field.field_type(), wanted, &mut encoded).is_some() && encoded == bytes
    } else {
        decode(field, raw, bytes).is_ok_and(|value| value == *wanted)
    }
}

/// Tracks an occurrence found by a scan of `parent`.
pub(crate) fn track(binary: &mut Binary, parent: PartId, raw: &RawField) -> Result<PartId> {
    let part = Part::new(
        PartKind::Field {
            tag: raw.tag,
            wire_type: raw.wire_type,
        },
        raw.start,
        raw.end,
        Some(parent),
    )
    .with_header(raw.tag_len, raw.len_len);
    binary.create_part(part)
}

/// Replaces the value bytes of a tracked occurrence and fixes every length
/// prefix above it.
pub(crate) fn overwrite(binary: &mut Binary, field: PartId, value: &[u8]) -> Result<()> {
    let part = binary.align(field)?;
    if binary.value(&part) == value {
        return Ok(());
    }
    binary.splice(field, part.start, part.len(), value)?;
    binary.propagate(field)
}

/// Appends value bytes to the end of a tracked occurrence.
pub(crate) fn append(binary: &mut Binary, field: PartId, value: &[u8]) -> Result<()> {
    let part = binary.align(field)?;
    binary.splice(field, part.end, 0, value)?;
    binary.propagate(field)
}

/// Removes a whole occurrence, header included.
pub(crate) fn remove(binary: &mut Binary, message: PartId, raw: &RawField) -> Result<()> {
    binary.splice(message, raw.offset(), raw.end - raw.offset(), &[])?;
    Ok(())
}

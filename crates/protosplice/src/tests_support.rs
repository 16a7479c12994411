//! Cross-checks tracked parts against a fresh scan of the buffer.

use alloc::{format, string::String};

use crate::{
    binary::Binary,
    part::{Part, PartKind},
    wire::{self, Fields, WireType},
};

/// Checks every valid part. Invalidated parts are skipped: they no longer
/// claim to describe anything.
pub(crate) fn check_parts(binary: &Binary) -> Result<(), String> {
    for id in binary.part_ids() {
        let Ok(part) = binary.part(id) else {
            continue;
        };
        check_part(binary, &part).map_err(|msg| format!("{id:?} {part:?}: {msg}"))?;
    }
    Ok(())
}

fn check_part(binary: &Binary, part: &Part) -> Result<(), &'static str> {
    let bytes = binary.as_bytes();
    if part.start > part.end || part.end > bytes.len() {
        return Err("out of bounds");
    }
    let parent = match part.parent {
        Some(id) => Some(binary.part(id).map_err(|_| "valid part under an invalid parent")?),
        None => None,
    };

    match (part.kind, parent) {
        (PartKind::Message, None) => {
            if part.start != 0 || part.end != bytes.len() {
                return Err("top-level message does not span the buffer");
            }
        }
        (PartKind::Message, Some(field)) => {
            if (field.start, field.end) != (part.start, part.end) {
                return Err("nested message does not span its field");
            }
        }
        (PartKind::Field { tag, wire_type }, parent) => {
            let (found, found_wire, tag_len) =
                wire::decode_header(&bytes[part.offset()..]).map_err(|_| "bad header")?;
            if (found, found_wire, tag_len) != (tag, wire_type, part.tag_len) {
                return Err("header does not match");
            }
            if wire_type == WireType::LengthDelimited {
                let (len, len_len) = wire::decode_varint(&bytes[part.offset() + tag_len..])
                    .map_err(|_| "bad length prefix")?;
                if usize::try_from(len) != Ok(part.len()) || len_len != part.len_len {
                    return Err("length prefix does not match");
                }
            }
            if let Some(message) = parent.filter(|p| p.kind == PartKind::Message) {
                let found = scan(binary, &message)
                    .any(|(offset, end)| offset == part.offset() && end == part.end);
                if !found {
                    return Err("not an occurrence of its message");
                }
            }
        }
        (
            PartKind::Marker {
                message_start,
                message_end,
            },
            Some(message),
        ) => {
            if (message_start, message_end) != (message.start, message.end) {
                return Err("marker disagrees with its message's range");
            }
            let boundary = part.start == message.end
                || scan(binary, &message).any(|(offset, _)| offset == part.start);
            if !boundary {
                return Err("marker is not on a field boundary");
            }
        }
        (PartKind::Marker { .. }, None) => return Err("marker without a message"),
    }
    Ok(())
}

/// `(offset, end)` of each occurrence up to the first scan error.
fn scan<'a>(binary: &'a Binary, message: &Part) -> impl Iterator<Item = (usize, usize)> + 'a {
    Fields::new(binary.value(message), message.start)
        .map_while(Result::ok)
        .map(|raw| (raw.offset(), raw.end))
}

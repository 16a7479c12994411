//! Descriptor-bound views over encoded messages.

use alloc::vec::Vec;

use tracing::debug;

use crate::{
    binary::Binary,
    descriptor::{FieldDescriptor, MessageDescriptor, MessageId, Schema},
    error::{Error, Result},
    field,
    options::InsertMode,
    part::{Part, PartId, PartKind},
    value::{self, Value},
    wire::{self, Fields, RawField, WireType},
};

/// Deepest nesting [`Message::check`] descends into.
const MAX_DEPTH: usize = 100;

/// A message view over a part of a [`Binary`].
///
/// The view is a handle: it holds no reference to the binary, so every
/// operation takes the binary it was created over. Reads borrow it shared,
/// edits borrow it exclusively. After any edit, through this view or any
/// other, the view either still points at the same logical message or
/// reports [`Error::Invalidated`].
///
/// A handle that is dropped without [`destroy`](Self::destroy) keeps its
/// part tracked until the binary itself is dropped;
/// [`Binary::live_parts`] counts what is still tracked.
///
/// # Examples
///
/// ```rust
/// use protosplice::{Binary, FieldDescriptor, FieldType, Label, Message, Schema, Value};
///
/// let mut builder = Schema::builder();
/// let id = builder.declare("Item");
/// builder.define(
///     id,
///     [
///         FieldDescriptor::new(1, "id", FieldType::UInt32, Label::Optional),
///         FieldDescriptor::new(2, "name", FieldType::String, Label::Optional),
///     ],
/// );
/// let schema = builder.build().unwrap();
///
/// let mut binary = Binary::from_vec(b"\x08\x96\x01\x12\x04test".to_vec());
/// let item = Message::new(&mut binary, &schema, id).unwrap();
/// assert_eq!(item.get(&binary, 1).unwrap(), Value::UInt32(150));
///
/// item.put(&mut binary, 1, &Value::UInt32(1)).unwrap();
/// assert_eq!(binary.as_bytes(), b"\x08\x01\x12\x04test");
/// assert_eq!(item.get(&binary, 2).unwrap(), Value::from("test"));
/// ```
#[derive(Debug)]
#[must_use = "a message stays tracked by its binary until `destroy` is called"]
pub struct Message<'s> {
    schema: &'s Schema,
    id: MessageId,
    part: PartId,
}

impl<'s> Message<'s> {
    /// Creates a top-level view spanning the whole binary.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the binary is poisoned.
    ///
    /// # Panics
    ///
    /// If `id` was not handed out by the builder of `schema`.
    pub fn new(binary: &mut Binary, schema: &'s Schema, id: MessageId) -> Result<Self> {
        assert!(schema.get(id).is_some(), "message id outside the schema");
        let part = binary.create_part(Part::new(PartKind::Message, 0, binary.len(), None))?;
        Ok(Self { schema, id, part })
    }

    /// Creates a view over the value of a tracked field occurrence.
    pub(crate) fn from_field(
        binary: &mut Binary,
        schema: &'s Schema,
        id: MessageId,
        field: PartId,
    ) -> Result<Self> {
        let occurrence = binary.align(field)?;
        let part = binary.create_part(Part::new(
            PartKind::Message,
            occurrence.start,
            occurrence.end,
            Some(field),
        ))?;
        Ok(Self { schema, id, part })
    }

    /// A second handle to the same message.
    ///
    /// # Errors
    ///
    /// [`Error::Invalidated`] if this handle no longer resolves.
    pub fn try_clone(&self, binary: &mut Binary) -> Result<Self> {
        binary.retain(self.part)?;
        Ok(Self {
            schema: self.schema,
            id: self.id,
            part: self.part,
        })
    }

    /// Stops tracking the message. The bytes are left alone.
    pub fn destroy(self, binary: &mut Binary) {
        binary.release(self.part);
    }

    #[must_use]
    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn descriptor(&self) -> &'s MessageDescriptor {
        &self.schema[self.id]
    }

    /// Handle of the underlying part.
    #[must_use]
    pub fn part(&self) -> PartId {
        self.part
    }

    /// Whether the message still resolves in `binary`.
    #[must_use]
    pub fn valid(&self, binary: &Binary) -> bool {
        binary.part(self.part).is_ok()
    }

    /// Encoded bytes of the message.
    ///
    /// # Errors
    ///
    /// [`Error::Invalidated`] or [`Error::OutOfMemory`] if the message no
    /// longer resolves.
    pub fn raw<'b>(&self, binary: &'b Binary) -> Result<&'b [u8]> {
        let part = binary.part(self.part)?;
        Ok(binary.value(&part))
    }

    fn field(&self, tag: u32) -> Result<&'s FieldDescriptor> {
        field::lookup(self.descriptor(), tag)
    }

    /// Whether `tag` has at least one occurrence.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownField`] for undeclared tags, [`Error::Malformed`] if
    /// the message cannot be scanned.
    pub fn has(&self, binary: &Binary, tag: u32) -> Result<bool> {
        let field = self.field(tag)?;
        let part = binary.part(self.part)?;
        Ok(select(field::scan(binary, &part), field)?.is_some())
    }

    /// Reads a field.
    ///
    /// Singular fields yield their last occurrence, repeated fields their
    /// first; a packed run yields its first element. Embedded messages are
    /// returned as [`Value::Bytes`].
    ///
    /// # Errors
    ///
    /// - [`Error::FieldNotFound`] if the tag is absent and has no default.
    /// - [`Error::WireTypeMismatch`] if the occurrence is encoded with a
    ///   wire type the descriptor does not allow.
    /// - [`Error::UnknownField`], [`Error::Malformed`],
    ///   [`Error::VarintOverflow`] and [`Error::Invalidated`] as usual.
    pub fn get(&self, binary: &Binary, tag: u32) -> Result<Value> {
        let field = self.field(tag)?;
        let part = binary.part(self.part)?;
        match select(field::scan(binary, &part), field)? {
            Some(raw) => field::decode(field, &raw, field::bytes(binary, &raw)),
            None => field.default().cloned().ok_or(Error::FieldNotFound { tag }),
        }
    }

    /// Reads every element of a repeated field, packed runs and single
    /// occurrences alike, in encoding order.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), except that an absent field yields an empty
    /// vector.
    pub fn get_packed(&self, binary: &Binary, tag: u32) -> Result<Vec<Value>> {
        let field = self.field(tag)?;
        let ty = field.field_type();
        let part = binary.part(self.part)?;
        let mut values = Vec::new();
        for raw in field::scan(binary, &part) {
            let raw = raw?;
            if raw.tag != tag {
                continue;
            }
            field::check_wire(field, &raw)?;
            let bytes = field::bytes(binary, &raw);
            if field::is_packed_run(field, &raw) {
                value::decode_packed(ty, bytes, &mut values)?;
            } else {
                values.push(value::decode(ty, bytes)?);
            }
        }
        Ok(values)
    }

    /// Writes a field.
    ///
    /// A singular field that is present has its last occurrence replaced in
    /// place; otherwise a new occurrence is inserted according to the
    /// binary's [`InsertMode`]. Values of packed fields are appended to the
    /// last packed run.
    ///
    /// # Errors
    ///
    /// [`Error::ValueMismatch`] if `value` is not of the field's type, plus
    /// the errors of [`get`](Self::get) and [`Error::OutOfMemory`].
    pub fn put(&self, binary: &mut Binary, tag: u32, value: &Value) -> Result<()> {
        binary.edit(|b| self.put_in(b, tag, value))
    }

    fn put_in(&self, binary: &mut Binary, tag: u32, value: &Value) -> Result<()> {
        let field = self.field(tag)?;
        let encoded = field::encode_value(field, value)?;
        let message = binary.align(self.part)?;

        let existing = if field.is_packed() {
            last_run(field::scan(binary, &message), tag)?
        } else if field.is_repeated() {
            None
        } else {
            select(field::scan(binary, &message), field)?
        };

        match existing {
            Some(raw) => {
                field::check_wire(field, &raw)?;
                let tracked = field::track(binary, self.part, &raw)?;
                let result = if field.is_packed() {
                    field::append(binary, tracked, &encoded)
                } else {
                    field::overwrite(binary, tracked, &encoded)
                };
                binary.release(tracked);
                result
            }
            None => {
                self.insert(binary, field, &encoded)?;
                binary.propagate(self.part)
            }
        }
    }

    /// Splices in a new occurrence and returns its layout as of right after
    /// the splice. Length prefixes above the message are left to the caller.
    fn insert(&self, binary: &mut Binary, field: &FieldDescriptor, value: &[u8]) -> Result<RawField> {
        let message = binary.align(self.part)?;
        let at = match binary.options().insert_mode {
            InsertMode::Ordered => {
                let mut at = message.end;
                for raw in field::scan(binary, &message) {
                    let raw = raw?;
                    if raw.tag > field.tag() {
                        at = raw.offset();
                        break;
                    }
                }
                at
            }
            InsertMode::Append => message.end,
        };
        let bytes = field::encode_occurrence(field, value);
        binary.splice(self.part, at, 0, &bytes)?;

        let tag_len = wire::varint_len(u64::from(field.tag()) << 3);
        let len_len = bytes.len() - tag_len - value.len();
        Ok(RawField {
            tag: field.tag(),
            wire_type: field.wire_type(),
            tag_len,
            len_len,
            start: at + tag_len + len_len,
            end: at + bytes.len(),
        })
    }

    /// Removes every occurrence of `tag`. Erasing an absent field succeeds.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownField`], [`Error::Malformed`], [`Error::Invalidated`].
    pub fn erase(&self, binary: &mut Binary, tag: u32) -> Result<()> {
        binary.edit(|b| {
            self.field(tag)?;
            let message = b.align(self.part)?;
            let mut found = Vec::new();
            for raw in field::scan(b, &message) {
                let raw = raw?;
                if raw.tag == tag {
                    found.push(raw);
                }
            }
            if found.is_empty() {
                return Ok(());
            }
            // back to front, so earlier offsets stay put
            for raw in found.iter().rev() {
                field::remove(b, self.part, raw)?;
            }
            b.propagate(self.part)
        })
    }

    /// Removes every field of the message.
    ///
    /// # Errors
    ///
    /// [`Error::Invalidated`] if the message no longer resolves.
    pub fn clear(&self, binary: &mut Binary) -> Result<()> {
        binary.edit(|b| {
            let message = b.align(self.part)?;
            if message.len() == 0 {
                return Ok(());
            }
            b.splice(self.part, message.start, message.len(), &[])?;
            b.propagate(self.part)
        })
    }

    /// Creates a view over an embedded message field, inserting an empty
    /// occurrence first if the field is absent.
    ///
    /// # Errors
    ///
    /// [`Error::ValueMismatch`] if `tag` is not a message field, plus the
    /// errors of [`put`](Self::put).
    pub fn nested(&self, binary: &mut Binary, tag: u32) -> Result<Message<'s>> {
        let field = self.field(tag)?;
        let Some(id) = field.nested() else {
            return Err(Error::ValueMismatch { tag });
        };
        binary.edit(|b| {
            let message = b.align(self.part)?;
            let tracked = match select(field::scan(b, &message), field)? {
                Some(raw) => {
                    field::check_wire(field, &raw)?;
                    field::track(b, self.part, &raw)?
                }
                None => {
                    let raw = self.insert(b, field, &[])?;
                    let tracked = field::track(b, self.part, &raw)?;
                    if let Err(err) = b.propagate(self.part) {
                        b.release(tracked);
                        return Err(err);
                    }
                    debug!(tag, "inserted empty nested message");
                    tracked
                }
            };
            let nested = Message::from_field(b, self.schema, id, tracked);
            // the nested part keeps the field alive
            b.release(tracked);
            nested
        })
    }

    /// Validates the wire encoding of the message and of every embedded
    /// message the descriptor knows about. Unknown fields are skipped.
    ///
    /// # Errors
    ///
    /// The first decoding error found.
    pub fn check(&self, binary: &Binary) -> Result<()> {
        let part = binary.part(self.part)?;
        check_message(self.schema, self.id, binary.value(&part), 0)
    }
}

/// The occurrence a singular access acts on: first for repeated fields, last
/// otherwise.
fn select(fields: Fields<'_>, field: &FieldDescriptor) -> Result<Option<RawField>> {
    let mut found = None;
    for raw in fields {
        let raw = raw?;
        if raw.tag == field.tag() {
            found = Some(raw);
            if field.is_repeated() {
                break;
            }
        }
    }
    Ok(found)
}

fn last_run(fields: Fields<'_>, tag: u32) -> Result<Option<RawField>> {
    let mut found = None;
    for raw in fields {
        let raw = raw?;
        if raw.tag == tag && raw.wire_type == WireType::LengthDelimited {
            found = Some(raw);
        }
    }
    Ok(found)
}

fn check_message(schema: &Schema, id: MessageId, bytes: &[u8], depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::Malformed);
    }
    let descriptor = &schema[id];
    let mut scratch = Vec::new();
    for raw in Fields::new(bytes, 0) {
        let raw = raw?;
        let Some(field) = descriptor.field(raw.tag) else {
            continue;
        };
        field::check_wire(field, &raw)?;
        let value = &bytes[raw.start..raw.end];
        let ty = field.field_type();
        if let Some(nested) = field.nested() {
            check_message(schema, nested, value, depth + 1)?;
        } else if raw.wire_type == WireType::LengthDelimited && ty.is_packable() {
            scratch.clear();
            value::decode_packed(ty, value, &mut scratch)?;
        } else {
            value::decode(ty, value)?;
        }
    }
    Ok(())
}

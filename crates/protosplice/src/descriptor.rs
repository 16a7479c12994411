//! Message descriptors and the schema registry.
//!
//! Descriptors are produced once, before any [`Message`](crate::Message) is
//! created: messages are declared (which hands out a [`MessageId`] so types
//! may refer to each other, or to themselves), defined with their fields,
//! optionally extended, and then frozen by [`SchemaBuilder::build`]. The
//! resulting [`Schema`] is immutable and may be shared freely between
//! threads.

use alloc::vec::Vec;
use core::ops::{Index, RangeInclusive};

use crate::{
    error::SchemaError,
    value::{self, FieldType, Label, Value},
    wire::{MAX_TAG, WireType},
};

/// Index of a message descriptor within its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(usize);

impl MessageId {
    /// Position of the descriptor in the schema.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Static description of one field.
///
/// # Examples
///
/// ```
/// use protosplice::{FieldDescriptor, FieldType, Label, Value};
///
/// let id = FieldDescriptor::new(1, "id", FieldType::UInt32, Label::Optional)
///     .with_default(Value::UInt32(7));
/// assert_eq!(id.tag(), 1);
/// assert_eq!(id.default(), Some(&Value::UInt32(7)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    tag: u32,
    name: &'static str,
    ty: FieldType,
    label: Label,
    packed: bool,
    default: Option<Value>,
    nested: Option<MessageId>,
}

impl FieldDescriptor {
    /// Describes a field without default value or nested descriptor.
    #[must_use]
    pub fn new(tag: u32, name: &'static str, ty: FieldType, label: Label) -> Self {
        Self {
            tag,
            name,
            ty,
            label,
            packed: false,
            default: None,
            nested: None,
        }
    }

    /// Value returned by `get` when the field is absent.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Links the descriptor of an embedded message field.
    #[must_use]
    pub fn with_nested(mut self, message: MessageId) -> Self {
        self.nested = Some(message);
        self
    }

    /// Marks a repeated scalar field as packed.
    #[must_use]
    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    #[must_use]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn field_type(&self) -> FieldType {
        self.ty
    }

    #[must_use]
    pub fn label(&self) -> Label {
        self.label
    }

    #[must_use]
    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    #[must_use]
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Wire type of one occurrence; packed fields are length-delimited.
    #[must_use]
    pub fn wire_type(&self) -> WireType {
        if self.packed {
            WireType::LengthDelimited
        } else {
            self.ty.wire_type()
        }
    }

    #[must_use]
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn nested(&self) -> Option<MessageId> {
        self.nested
    }
}

/// Fields of one message type, sorted by tag, plus merged extensions.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
    extension_ranges: Vec<RangeInclusive<u32>>,
    extensions: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared fields in ascending tag order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Merged extension fields in ascending tag order.
    #[must_use]
    pub fn extensions(&self) -> &[FieldDescriptor] {
        &self.extensions
    }

    /// Whether `tag` falls in a reserved extension range.
    #[must_use]
    pub fn is_extension_tag(&self, tag: u32) -> bool {
        self.extension_ranges.iter().any(|r| r.contains(&tag))
    }

    /// Looks up a declared field, then the extensions when `tag` lies in an
    /// extension range.
    #[must_use]
    pub fn field(&self, tag: u32) -> Option<&FieldDescriptor> {
        let table = if self.is_extension_tag(tag) {
            &self.extensions
        } else {
            &self.fields
        };
        table
            .binary_search_by_key(&tag, FieldDescriptor::tag)
            .ok()
            .map(|i| &table[i])
    }
}

/// Immutable registry of message descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    messages: Vec<MessageDescriptor>,
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&MessageDescriptor> {
        self.messages.get(id.0)
    }

    /// Finds a message by the name it was declared with.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<MessageId> {
        self.messages
            .iter()
            .position(|m| m.name == name)
            .map(MessageId)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Index<MessageId> for Schema {
    type Output = MessageDescriptor;

    fn index(&self, id: MessageId) -> &Self::Output {
        &self.messages[id.0]
    }
}

#[derive(Debug, Default)]
struct Pending {
    name: &'static str,
    fields: Option<Vec<FieldDescriptor>>,
    extension_ranges: Vec<RangeInclusive<u32>>,
    extensions: Vec<FieldDescriptor>,
    redefined: bool,
}

/// Collects declarations until the schema is frozen.
///
/// # Examples
///
/// ```
/// use protosplice::{FieldDescriptor, FieldType, Label, Schema};
///
/// let mut builder = Schema::builder();
/// let node = builder.declare("Node");
/// builder
///     .define(
///         node,
///         [
///             FieldDescriptor::new(1, "value", FieldType::SInt64, Label::Optional),
///             FieldDescriptor::new(2, "children", FieldType::Message, Label::Repeated)
///                 .with_nested(node),
///         ],
///     )
///     .extension_range(node, 100..=199)
///     .extend(
///         node,
///         [FieldDescriptor::new(100, "note", FieldType::String, Label::Optional)],
///     );
/// let schema = builder.build().unwrap();
/// assert!(schema[node].field(100).is_some());
/// ```
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    messages: Vec<Pending>,
    unknown: Option<usize>,
}

impl SchemaBuilder {
    /// Reserves an id for a message type that is defined later.
    pub fn declare(&mut self, name: &'static str) -> MessageId {
        self.messages.push(Pending {
            name,
            ..Pending::default()
        });
        MessageId(self.messages.len() - 1)
    }

    /// Sets the fields of a declared message. Order does not matter.
    ///
    /// Defining twice, or defining an undeclared id, is reported by
    /// [`build`](Self::build).
    pub fn define(
        &mut self,
        id: MessageId,
        fields: impl IntoIterator<Item = FieldDescriptor>,
    ) -> &mut Self {
        let fields: Vec<_> = fields.into_iter().collect();
        match self.messages.get_mut(id.0) {
            Some(pending) if pending.fields.is_none() => pending.fields = Some(fields),
            Some(pending) => pending.redefined = true,
            None => self.unknown = self.unknown.or(Some(id.0)),
        }
        self
    }

    /// Reserves a tag range of `id` for extensions. An undeclared id is
    /// reported by [`build`](Self::build).
    pub fn extension_range(&mut self, id: MessageId, range: RangeInclusive<u32>) -> &mut Self {
        match self.messages.get_mut(id.0) {
            Some(pending) => pending.extension_ranges.push(range),
            None => self.unknown = self.unknown.or(Some(id.0)),
        }
        self
    }

    /// Merges extension fields into the extension table of `id`.
    ///
    /// Extensions are append-only: each tag must lie in a reserved range and
    /// must not collide with a declared field or an earlier extension. An
    /// undeclared id is reported by [`build`](Self::build).
    pub fn extend(
        &mut self,
        id: MessageId,
        fields: impl IntoIterator<Item = FieldDescriptor>,
    ) -> &mut Self {
        match self.messages.get_mut(id.0) {
            Some(pending) => pending.extensions.extend(fields),
            None => self.unknown = self.unknown.or(Some(id.0)),
        }
        self
    }

    /// Validates every declaration and freezes the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        if let Some(index) = self.unknown {
            return Err(SchemaError::UnknownMessage(index));
        }
        let count = self.messages.len();
        let mut messages = Vec::with_capacity(count);
        for pending in self.messages {
            let message = pending.name;
            if pending.redefined {
                return Err(SchemaError::Redefined { message });
            }
            let mut fields = pending.fields.ok_or(SchemaError::Undefined { message })?;
            fields.sort_by_key(FieldDescriptor::tag);
            validate(message, &fields, count)?;

            let mut extensions = pending.extensions;
            extensions.sort_by_key(FieldDescriptor::tag);
            validate(message, &extensions, count)?;
            for ext in &extensions {
                if !pending.extension_ranges.iter().any(|r| r.contains(&ext.tag)) {
                    return Err(SchemaError::NotExtensible {
                        message,
                        tag: ext.tag,
                    });
                }
                if fields.binary_search_by_key(&ext.tag, FieldDescriptor::tag).is_ok() {
                    return Err(SchemaError::ExtensionCollision {
                        message,
                        tag: ext.tag,
                    });
                }
            }

            messages.push(MessageDescriptor {
                name: message,
                fields,
                extension_ranges: pending.extension_ranges,
                extensions,
            });
        }
        Ok(Schema { messages })
    }
}

/// Checks a tag-sorted field table.
fn validate(
    message: &'static str,
    fields: &[FieldDescriptor],
    count: usize,
) -> Result<(), SchemaError> {
    for (i, field) in fields.iter().enumerate() {
        let tag = field.tag;
        if tag == 0 || tag > MAX_TAG {
            return Err(SchemaError::TagOutOfRange { message, tag });
        }
        if i > 0 && fields[i - 1].tag == tag {
            return Err(SchemaError::DuplicateTag { message, tag });
        }
        match (field.ty, field.nested) {
            (FieldType::Message, None) => return Err(SchemaError::MissingNested { message, tag }),
            (FieldType::Message, Some(id)) if id.0 >= count => {
                return Err(SchemaError::UnknownMessage(id.0));
            }
            (FieldType::Message, Some(_)) | (_, None) => {}
            (_, Some(_)) => return Err(SchemaError::UnexpectedNested { message, tag }),
        }
        if let Some(default) = &field.default {
            let mut encoded = Vec::new();
            if field.ty == FieldType::Message
                || field.label == Label::Repeated
                || value::encode(field.ty, default, &mut encoded).is_none()
            {
                return Err(SchemaError::InvalidDefault { message, tag });
            }
        }
        if field.packed && (field.label != Label::Repeated || !field.ty.is_packable()) {
            return Err(SchemaError::InvalidPacked { message, tag });
        }
    }
    Ok(())
}

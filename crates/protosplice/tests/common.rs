#![allow(missing_docs, dead_code)]

use protosplice::{FieldDescriptor, FieldType, Label, MessageId, Schema, Value};

pub const ID: u32 = 1;
pub const NAME: u32 = 2;
pub const TAGS: u32 = 3;
pub const RATIO: u32 = 4;
pub const CODE: u32 = 5;
pub const DELTA: u32 = 6;
pub const SCORES: u32 = 7;
pub const CHILD: u32 = 8;
pub const ENABLED: u32 = 9;

/// `Item`, with `child` pointing back at `Item`.
pub fn item_schema() -> (Schema, MessageId) {
    let mut builder = Schema::builder();
    let item = builder.declare("Item");
    builder.define(
        item,
        [
            FieldDescriptor::new(ID, "id", FieldType::UInt32, Label::Optional),
            FieldDescriptor::new(NAME, "name", FieldType::String, Label::Optional),
            FieldDescriptor::new(TAGS, "tags", FieldType::String, Label::Repeated),
            FieldDescriptor::new(RATIO, "ratio", FieldType::Double, Label::Optional),
            FieldDescriptor::new(CODE, "code", FieldType::Fixed32, Label::Optional),
            FieldDescriptor::new(DELTA, "delta", FieldType::Int32, Label::Optional),
            FieldDescriptor::new(SCORES, "scores", FieldType::SInt32, Label::Repeated).packed(),
            FieldDescriptor::new(CHILD, "child", FieldType::Message, Label::Optional)
                .with_nested(item),
            FieldDescriptor::new(ENABLED, "enabled", FieldType::Bool, Label::Optional)
                .with_default(Value::Bool(true)),
        ],
    );
    (builder.build().unwrap(), item)
}

/// `tag 1 = varint 150, tag 2 = "test"`.
pub const SCENARIO: &[u8] = b"\x08\x96\x01\x12\x04test";

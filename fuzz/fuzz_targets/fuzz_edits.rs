#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use protosplice::{
    Binary, BinaryOptions, Cursor, FieldDescriptor, FieldType, InsertMode, Label, Message,
    MessageId, Schema, Value,
};

const TAGS: [u32; 6] = [1, 2, 3, 4, 5, 6];

fn schema() -> (Schema, MessageId) {
    let mut builder = Schema::builder();
    let item = builder.declare("Item");
    builder.define(
        item,
        [
            FieldDescriptor::new(1, "id", FieldType::UInt32, Label::Optional),
            FieldDescriptor::new(2, "name", FieldType::String, Label::Optional),
            FieldDescriptor::new(3, "tags", FieldType::String, Label::Repeated),
            FieldDescriptor::new(4, "scores", FieldType::SInt64, Label::Repeated).packed(),
            FieldDescriptor::new(5, "child", FieldType::Message, Label::Optional).with_nested(item),
            FieldDescriptor::new(6, "children", FieldType::Message, Label::Repeated)
                .with_nested(item),
        ],
    );
    match builder.build() {
        Ok(schema) => (schema, item),
        Err(err) => panic!("schema: {err}"),
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzValue {
    U32(u32),
    I64(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<FuzzValue> for Value {
    fn from(value: FuzzValue) -> Self {
        match value {
            FuzzValue::U32(v) => Value::UInt32(v),
            FuzzValue::I64(v) => Value::Int64(v),
            FuzzValue::Str(v) => Value::String(v),
            FuzzValue::Bytes(v) => Value::from(v),
        }
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    Put { view: u8, tag: u8, value: FuzzValue },
    Erase { view: u8, tag: u8 },
    Clear { view: u8 },
    Nested { view: u8, tag: u8 },
    Park { view: u8, path: Vec<u8>, steps: u8 },
    Step { cursor: u8 },
    EraseParked { cursor: u8 },
    PutParked { cursor: u8, value: FuzzValue },
    ViewParked { cursor: u8 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    append: bool,
    initial: Vec<u8>,
    ops: Vec<Op>,
}

fn pick<T>(items: &[T], index: u8) -> Option<&T> {
    if items.is_empty() {
        None
    } else {
        items.get(usize::from(index) % items.len())
    }
}

fn pick_mut<T>(items: &mut [T], index: u8) -> Option<&mut T> {
    if items.is_empty() {
        None
    } else {
        let len = items.len();
        items.get_mut(usize::from(index) % len)
    }
}

fn tag(index: u8) -> u32 {
    TAGS[usize::from(index) % TAGS.len()]
}

/// Embedded messages must stay well-formed, or there is nothing to check.
fn acceptable(schema: &Schema, item: MessageId, tag: u32, value: &Value) -> bool {
    match value {
        Value::Bytes(bytes) if matches!(tag, 5 | 6) => {
            let mut nested = Binary::from_vec(bytes.to_vec());
            Message::new(&mut nested, schema, item).is_ok_and(|m| m.check(&nested).is_ok())
        }
        _ => true,
    }
}

fn edits(input: Input) {
    let (schema, item) = schema();
    let options = BinaryOptions {
        insert_mode: if input.append {
            InsertMode::Append
        } else {
            InsertMode::Ordered
        },
        ..Default::default()
    };
    let Ok(mut binary) = Binary::with_options(input.initial, options) else {
        return;
    };
    let Ok(root) = Message::new(&mut binary, &schema, item) else {
        return;
    };
    // only well-formed inputs have offsets worth checking
    if root.check(&binary).is_err() {
        return;
    }

    let mut views = vec![root];
    let mut cursors: Vec<Cursor<'_>> = Vec::new();

    for op in input.ops {
        match op {
            Op::Put { view, tag: t, value } => {
                let (tag, value) = (tag(t), Value::from(value));
                if let Some(view) = pick(&views, view) {
                    if acceptable(&schema, item, tag, &value) {
                        let _ = view.put(&mut binary, tag, &value);
                    }
                }
            }
            Op::Erase { view, tag: t } => {
                if let Some(view) = pick(&views, view) {
                    let _ = view.erase(&mut binary, tag(t));
                }
            }
            Op::Clear { view } => {
                if let Some(view) = pick(&views, view) {
                    let _ = view.clear(&mut binary);
                }
            }
            Op::Nested { view, tag: t } => {
                let nested = pick(&views, view).map(|view| view.nested(&mut binary, tag(t)));
                if let Some(Ok(nested)) = nested {
                    views.push(nested);
                }
            }
            Op::Park { view, path, steps } => {
                if let Some(view) = pick(&views, view) {
                    let path: Vec<u32> = path.iter().take(3).map(|t| tag(*t)).collect();
                    let mut cursor = Cursor::nested(&mut binary, view, &path);
                    for _ in 0..steps % 8 {
                        if !cursor.next(&mut binary) {
                            break;
                        }
                    }
                    cursors.push(cursor);
                }
            }
            Op::Step { cursor } => {
                if let Some(cursor) = pick_mut(&mut cursors, cursor) {
                    let _ = cursor.next(&mut binary);
                }
            }
            Op::EraseParked { cursor } => {
                if let Some(cursor) = pick_mut(&mut cursors, cursor) {
                    let _ = cursor.erase(&mut binary);
                }
            }
            Op::PutParked { cursor, value } => {
                let value = Value::from(value);
                if let Some(cursor) = pick_mut(&mut cursors, cursor) {
                    if acceptable(&schema, item, cursor.tag(), &value) {
                        let _ = cursor.put(&mut binary, &value);
                    }
                }
            }
            Op::ViewParked { cursor } => {
                if let Some(Ok(view)) =
                    pick_mut(&mut cursors, cursor).map(|cursor| cursor.message(&mut binary))
                {
                    views.push(view);
                }
            }
        }

        if let Err(msg) = protosplice::check_parts(&binary) {
            panic!("{msg}\nbytes: {:02x?}", binary.as_bytes());
        }
        if let Some(root) = views.first() {
            if let Err(err) = root.check(&binary) {
                panic!("{err}\nbytes: {:02x?}", binary.as_bytes());
            }
        }
    }
}

fuzz_target!(|input: Input| edits(input));

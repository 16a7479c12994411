#![expect(missing_docs)]

use protosplice::{
    Binary, Cursor, FieldDescriptor, FieldType, Label, Message, MessageId, Schema, Value,
    WireType,
    wire::{decode_header, decode_varint, encode_header, encode_varint},
};
use quickcheck::QuickCheck;
use rstest::rstest;

const A: u32 = 1;
const B: u32 = 2;
const C: u32 = 3;

/// `Outer { a: Middle }`, `Middle { repeated b: Leaf }`, `Leaf { repeated c: uint32 }`.
fn schema() -> (Schema, MessageId) {
    let mut builder = Schema::builder();
    let outer = builder.declare("Outer");
    let middle = builder.declare("Middle");
    let leaf = builder.declare("Leaf");
    builder
        .define(
            outer,
            [FieldDescriptor::new(A, "a", FieldType::Message, Label::Optional).with_nested(middle)],
        )
        .define(
            middle,
            [FieldDescriptor::new(B, "b", FieldType::Message, Label::Repeated).with_nested(leaf)],
        )
        .define(
            leaf,
            [FieldDescriptor::new(C, "c", FieldType::UInt32, Label::Repeated)],
        );
    (builder.build().unwrap(), outer)
}

fn length_delimited(tag: u32, value: &[u8], out: &mut Vec<u8>) {
    encode_header(tag, WireType::LengthDelimited, out);
    encode_varint(u64::try_from(value.len()).unwrap(), out);
    out.extend_from_slice(value);
}

/// One `a`, holding one `b` per group, each holding the group's `c` values.
fn encode(groups: &[Vec<u32>]) -> Vec<u8> {
    let mut middle = Vec::new();
    for group in groups {
        let mut leaf = Vec::new();
        for c in group {
            encode_header(C, WireType::Varint, &mut leaf);
            encode_varint(u64::from(*c), &mut leaf);
        }
        length_delimited(B, &leaf, &mut middle);
    }
    let mut outer = Vec::new();
    length_delimited(A, &middle, &mut outer);
    outer
}

/// Top-level fields of `bytes` as `(tag, value bytes)`.
fn split(mut bytes: &[u8]) -> Vec<(u32, &[u8])> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let (tag, wire_type, header) = decode_header(bytes).unwrap();
        bytes = &bytes[header..];
        let (start, len) = match wire_type {
            WireType::Varint => (0, decode_varint(bytes).unwrap().1),
            WireType::LengthDelimited => {
                let (len, prefix) = decode_varint(bytes).unwrap();
                (prefix, usize::try_from(len).unwrap())
            }
            other => panic!("unexpected wire type {other:?}"),
        };
        out.push((tag, &bytes[start..start + len]));
        bytes = &bytes[start + len..];
    }
    out
}

fn manual_dfs(bytes: &[u8]) -> Vec<Value> {
    let mut out = Vec::new();
    for (tag, a) in split(bytes) {
        if tag != A {
            continue;
        }
        for (tag, b) in split(a) {
            if tag != B {
                continue;
            }
            for (tag, c) in split(b) {
                if tag == C {
                    let value = u32::try_from(decode_varint(c).unwrap().0).unwrap();
                    out.push(Value::UInt32(value));
                }
            }
        }
    }
    out
}

fn walk(binary: &mut Binary, message: &Message<'_>) -> Vec<Value> {
    let mut cursor = Cursor::nested(binary, message, &[A, B, C]);
    let mut out = Vec::new();
    while cursor.next(binary) {
        assert_eq!(cursor.pos(), out.len());
        out.push(cursor.get(binary).unwrap());
    }
    assert!(cursor.valid());
    cursor.destroy(binary);
    out
}

#[rstest]
#[case::two_groups(vec![vec![1, 2], vec![3]])]
#[case::empty_first(vec![vec![], vec![300, 4]])]
#[case::empty_last(vec![vec![7], vec![]])]
#[case::nothing_to_visit(vec![vec![], vec![]])]
fn cursor_matches_a_manual_walk(#[case] groups: Vec<Vec<u32>>) {
    let (schema, outer) = schema();
    let bytes = encode(&groups);
    let expected = manual_dfs(&bytes);
    assert_eq!(expected.len(), groups.iter().map(Vec::len).sum::<usize>());

    let mut binary = Binary::from_vec(bytes);
    let message = Message::new(&mut binary, &schema, outer).unwrap();
    assert_eq!(walk(&mut binary, &message), expected);
    assert_eq!(binary.live_parts(), 1);
}

#[test]
fn cursor_matches_a_manual_walk_quickcheck() {
    #[allow(clippy::needless_pass_by_value)]
    fn prop(groups: Vec<Vec<u32>>) -> bool {
        let (schema, outer) = schema();
        let bytes = encode(&groups);
        let expected = manual_dfs(&bytes);
        let mut binary = Binary::from_vec(bytes);
        let message = Message::new(&mut binary, &schema, outer).unwrap();
        walk(&mut binary, &message) == expected
    }

    #[cfg(not(miri))]
    let tests = if is_ci::cached() { 2_000 } else { 200 };
    #[cfg(miri)]
    let tests = 5;

    QuickCheck::new()
        .tests(tests)
        .quickcheck(prop as fn(Vec<Vec<u32>>) -> bool);
}

#[test]
fn absent_levels_are_not_created() {
    let (schema, outer) = schema();
    let mut binary = Binary::new();
    let message = Message::new(&mut binary, &schema, outer).unwrap();
    assert_eq!(walk(&mut binary, &message), Vec::new());
    assert!(binary.is_empty());
}

#[test]
fn erasing_through_a_deep_cursor_rewrites_every_prefix() {
    let (schema, outer) = schema();
    let groups = vec![vec![1, 200, 3], vec![200], vec![5]];
    let mut binary = Binary::from_vec(encode(&groups));
    let message = Message::new(&mut binary, &schema, outer).unwrap();

    let mut cursor = Cursor::nested(&mut binary, &message, &[A, B, C]);
    let mut visited = 0;
    while cursor.seek(&mut binary, &Value::UInt32(200)) {
        cursor.erase(&mut binary).unwrap();
        visited += 1;
    }
    assert_eq!(visited, 2);
    assert!(cursor.valid());
    cursor.destroy(&mut binary);

    let remaining = encode(&[vec![1, 3], vec![], vec![5]]);
    assert_eq!(binary.as_bytes(), remaining.as_slice());
    assert_eq!(
        manual_dfs(binary.as_bytes()),
        [1, 3, 5].map(Value::UInt32)
    );
    message.check(&binary).unwrap();
}

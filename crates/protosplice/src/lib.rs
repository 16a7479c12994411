//! In-place reading and editing of protocol-buffer encoded bytes.
//!
//! `protosplice` never decodes a message into an object graph. A [`Binary`]
//! owns the encoded bytes; [`Message`] and [`Cursor`] handles address fields
//! by tag and read, overwrite, insert or erase them directly in the buffer.
//! Edits only touch the bytes that change (plus the length prefixes of the
//! enclosing messages), and every other live handle is either moved along
//! with its bytes or reports [`Error::Invalidated`].
//!
//! Field layouts come from a [`Schema`], built once up front with a
//! [`SchemaBuilder`].
//!
//! ```rust
//! use protosplice::{Binary, Cursor, FieldDescriptor, FieldType, Label, Message, Schema, Value};
//!
//! let mut builder = Schema::builder();
//! let item = builder.declare("Item");
//! builder.define(
//!     item,
//!     [
//!         FieldDescriptor::new(1, "id", FieldType::UInt32, Label::Optional),
//!         FieldDescriptor::new(2, "name", FieldType::String, Label::Optional),
//!         FieldDescriptor::new(3, "tags", FieldType::String, Label::Repeated),
//!     ],
//! );
//! let schema = builder.build().unwrap();
//!
//! let mut binary = Binary::from_vec(b"\x08\x96\x01\x12\x04test".to_vec());
//! let message = Message::new(&mut binary, &schema, item).unwrap();
//! message.put(&mut binary, 3, &Value::from("a")).unwrap();
//! message.put(&mut binary, 3, &Value::from("b")).unwrap();
//!
//! let mut tags = Cursor::new(&mut binary, &message, 3);
//! assert!(tags.seek(&mut binary, &Value::from("b")));
//! assert_eq!(tags.pos(), 1);
//! tags.erase(&mut binary).unwrap();
//!
//! assert_eq!(binary.as_bytes(), b"\x08\x96\x01\x12\x04test\x1a\x01a");
//! ```

#![no_std]
extern crate alloc;

#[cfg(test)]
extern crate std;

mod binary;
mod cursor;
mod descriptor;
mod error;
mod field;
mod journal;
mod message;
mod options;
mod part;
mod value;
pub mod wire;


pub use binary::Binary;
pub use cursor::{Cursor, CursorState};
pub use descriptor::{FieldDescriptor, MessageDescriptor, MessageId, Schema, SchemaBuilder};
pub use error::{Error, Result, SchemaError};
pub use message::Message;
pub use options::{BinaryOptions, InsertMode};
pub use part::PartId;
pub use value::{FieldType, Label, Value};
pub use wire::WireType;

/// Offsets of every tracked part, checked against a fresh scan of the
/// buffer. Used by the fuzz targets.
#[cfg(feature = "fuzzing")]
#[doc(hidden)]
pub fn check_parts(binary: &Binary) -> core::result::Result<(), alloc::string::String> {
    tests_support::check_parts(binary)
}

#[cfg(any(test, feature = "fuzzing"))]
mod tests_support;

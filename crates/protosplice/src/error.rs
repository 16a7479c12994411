use thiserror::Error;

use crate::wire::WireType;

/// Failures reported by buffer, message and cursor operations.
///
/// Errors are small and `Copy` so that a [`Cursor`](crate::Cursor) can freeze
/// the first one it sees and keep reporting it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Growing the buffer failed. The buffer and every part derived from it
    /// are poisoned.
    #[error("out of memory while growing the buffer")]
    OutOfMemory,
    /// The part behind a handle was erased, overwritten, released, or
    /// belongs to another buffer.
    #[error("part was invalidated by an earlier edit")]
    Invalidated,
    /// The tag has no occurrence in the message and no default value.
    #[error("field {tag} not found")]
    FieldNotFound {
        /// Tag that was looked up.
        tag: u32,
    },
    /// The tag is neither declared by the message descriptor nor merged in
    /// as an extension.
    #[error("field {tag} is not declared by the descriptor")]
    UnknownField {
        /// Tag that was looked up.
        tag: u32,
    },
    /// The encoded wire type disagrees with the descriptor.
    #[error("field {tag}: expected wire type {expected:?}, found {actual:?}")]
    WireTypeMismatch {
        /// Tag of the offending occurrence.
        tag: u32,
        /// Wire type implied by the descriptor.
        expected: WireType,
        /// Wire type found in the header.
        actual: WireType,
    },
    /// The value cannot be encoded as the field's type.
    #[error("value does not fit the type of field {tag}")]
    ValueMismatch {
        /// Tag of the field being written.
        tag: u32,
    },
    /// A varint does not fit the target width.
    #[error("varint overflows its target width")]
    VarintOverflow,
    /// A tag header or length prefix is truncated, or a decode ran past the
    /// bounds of the buffer.
    #[error("malformed wire data")]
    Malformed,
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Failures raised while assembling a [`Schema`](crate::Schema).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("message {message} declares tag {tag} twice")]
    DuplicateTag { message: &'static str, tag: u32 },
    #[error("message {message}: tag {tag} is outside 1..=536870911")]
    TagOutOfRange { message: &'static str, tag: u32 },
    #[error("message {message}: extension tag {tag} is outside every extension range")]
    NotExtensible { message: &'static str, tag: u32 },
    #[error("message {message}: extension tag {tag} collides with an existing field")]
    ExtensionCollision { message: &'static str, tag: u32 },
    #[error("message {message} was declared but never defined")]
    Undefined { message: &'static str },
    #[error("message {message} was defined twice")]
    Redefined { message: &'static str },
    #[error("message {message}: field {tag} links a nested descriptor but is not a message field")]
    UnexpectedNested { message: &'static str, tag: u32 },
    #[error("message {message}: message field {tag} has no nested descriptor")]
    MissingNested { message: &'static str, tag: u32 },
    #[error("message {message}: field {tag} cannot carry a default value")]
    InvalidDefault { message: &'static str, tag: u32 },
    #[error("message {message}: field {tag} cannot be packed")]
    InvalidPacked { message: &'static str, tag: u32 },
    #[error("unknown message id {0}")]
    UnknownMessage(usize),
}

//! Iteration over the occurrences of one tag, or of a path of tags through
//! nested messages.
//!
//! A cursor keeps one frame per level of its tag path. Each frame names the
//! message being scanned at that level and an anchor inside it: the current
//! occurrence, or, right after an erase, a marker where that occurrence used
//! to start. Scanning resumes after the anchor (or at the marker), so edits
//! made between two calls to [`Cursor::next`] are picked up naturally.
//!
//! ```text
//!   frames[0]  root message      anchor: occurrence of path[0]
//!   frames[1]  its value         anchor: occurrence of path[1]
//!   ...
//!   frames[n]  leaf message      anchor: current occurrence of path[n]
//! ```

use alloc::vec::Vec;

use tracing::warn;

use crate::{
    binary::Binary,
    descriptor::{FieldDescriptor, MessageId, Schema},
    error::{Error, Result},
    field,
    message::Message,
    part::{Part, PartId, PartKind},
    value::Value,
    wire::{Fields, RawField, WireType},
};

/// Where a cursor stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Created or rewound; [`Cursor::next`] moves to the first occurrence.
    Unpositioned,
    /// On an occurrence (or on the gap an erased occurrence left behind).
    Positioned,
    /// Past the last occurrence. Only [`Cursor::rewind`] leaves this state.
    Exhausted,
    /// Frozen by the first structural failure.
    Errored(Error),
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Field(PartId),
    Marker(PartId),
}

impl Anchor {
    fn id(self) -> PartId {
        match self {
            Self::Field(id) | Self::Marker(id) => id,
        }
    }
}

#[derive(Debug)]
struct Frame {
    message: PartId,
    anchor: Option<Anchor>,
}

/// Iterates the occurrences of a tag within a [`Message`].
///
/// Like [`Message`], a cursor is a handle: every call takes the
/// [`Binary`] it was created over, and [`destroy`](Self::destroy) releases
/// the parts it tracks.
///
/// # Examples
///
/// ```rust
/// use protosplice::{Binary, Cursor, FieldDescriptor, FieldType, Label, Message, Schema, Value};
///
/// let mut builder = Schema::builder();
/// let id = builder.declare("List");
/// builder.define(
///     id,
///     [FieldDescriptor::new(1, "item", FieldType::UInt32, Label::Repeated)],
/// );
/// let schema = builder.build().unwrap();
///
/// let mut binary = Binary::from_vec(vec![0x08, 0x01, 0x08, 0x02, 0x08, 0x03]);
/// let list = Message::new(&mut binary, &schema, id).unwrap();
/// let mut cursor = Cursor::new(&mut binary, &list, 1);
///
/// let mut items = Vec::new();
/// while cursor.next(&mut binary) {
///     items.push(cursor.get(&binary).unwrap());
/// }
/// assert_eq!(items, [Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)]);
/// assert!(cursor.valid());
/// ```
#[derive(Debug)]
#[must_use = "a cursor stays tracked by its binary until `destroy` is called"]
pub struct Cursor<'s> {
    schema: &'s Schema,
    path: Vec<&'s FieldDescriptor>,
    tag: u32,
    frames: Vec<Frame>,
    state: CursorState,
    pos: usize,
    erased: bool,
}

impl<'s> Cursor<'s> {
    /// Creates a cursor over the occurrences of `tag` in `message`.
    ///
    /// Only unpacked occurrences are visited. Packed runs of a repeated
    /// scalar are stepped over and left untouched; read them with
    /// [`Message::get_packed`].
    ///
    /// Creation does not fail: problems with the tag or the message freeze
    /// the cursor, see [`error`](Self::error).
    pub fn new(binary: &mut Binary, message: &Message<'s>, tag: u32) -> Self {
        Self::nested(binary, message, &[tag])
    }

    /// Creates a cursor over the occurrences of the last tag of `tags`,
    /// reached through the embedded messages named by the tags before it.
    ///
    /// Intermediate messages are entered lazily as the cursor advances, and
    /// every occurrence of an intermediate tag is visited in turn.
    pub fn nested(binary: &mut Binary, message: &Message<'s>, tags: &[u32]) -> Self {
        let mut cursor = Self {
            schema: message.schema(),
            path: Vec::with_capacity(tags.len()),
            tag: tags.last().copied().unwrap_or_default(),
            frames: Vec::with_capacity(tags.len()),
            state: CursorState::Unpositioned,
            pos: 0,
            erased: false,
        };
        if let Err(err) = cursor.resolve(message.id(), tags) {
            cursor.fail(err);
            return cursor;
        }
        let root = message.part();
        match binary.part(root).and_then(|_| binary.retain(root)) {
            Ok(()) => cursor.frames.push(Frame {
                message: root,
                anchor: None,
            }),
            Err(err) => cursor.fail(err),
        }
        cursor
    }

    fn resolve(&mut self, mut id: MessageId, tags: &[u32]) -> Result<()> {
        let Some((&leaf, intermediate)) = tags.split_last() else {
            return Err(Error::UnknownField { tag: 0 });
        };
        for &tag in intermediate {
            let field = field::lookup(&self.schema[id], tag)?;
            id = field.nested().ok_or(Error::ValueMismatch { tag })?;
            self.path.push(field);
        }
        let field = field::lookup(&self.schema[id], leaf)?;
        if field.is_packed() {
            // elements of a packed run have no occurrence of their own
            return Err(Error::WireTypeMismatch {
                tag: leaf,
                expected: field.field_type().wire_type(),
                actual: WireType::LengthDelimited,
            });
        }
        self.path.push(field);
        Ok(())
    }

    /// Releases every part the cursor tracks.
    pub fn destroy(mut self, binary: &mut Binary) {
        while let Some(frame) = self.frames.pop() {
            Self::release_frame(binary, &frame);
        }
    }

    /// Tag the cursor iterates over (the last tag of a path).
    #[must_use]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Index of the current occurrence, counting from zero.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// The error the cursor froze on, if any.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match self.state {
            CursorState::Errored(err) => Some(err),
            _ => None,
        }
    }

    /// `false` once the cursor has frozen; exhaustion does not count.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.error().is_none()
    }

    /// Moves to the next occurrence. Returns `false` when there is none, or
    /// when the cursor is exhausted or frozen.
    pub fn next(&mut self, binary: &mut Binary) -> bool {
        match self.state {
            CursorState::Exhausted | CursorState::Errored(_) => return false,
            CursorState::Unpositioned | CursorState::Positioned => {}
        }
        match self.advance(binary) {
            Ok(true) => {
                if self.state == CursorState::Positioned && !self.erased {
                    self.pos += 1;
                }
                self.erased = false;
                self.state = CursorState::Positioned;
                true
            }
            Ok(false) => {
                self.erased = false;
                self.state = CursorState::Exhausted;
                false
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    /// Goes back before the first occurrence. Fails only on a frozen cursor.
    pub fn rewind(&mut self, binary: &mut Binary) -> bool {
        if !self.valid() {
            return false;
        }
        while self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                Self::release_frame(binary, &frame);
            }
        }
        if let Some(anchor) = self.frames.first_mut().and_then(|f| f.anchor.take()) {
            binary.release(anchor.id());
        }
        self.state = CursorState::Unpositioned;
        self.pos = 0;
        self.erased = false;
        true
    }

    /// Advances until the current occurrence equals `value`.
    ///
    /// The current occurrence itself is not considered; call
    /// [`matches`](Self::matches) first for that.
    pub fn seek(&mut self, binary: &mut Binary, value: &Value) -> bool {
        while self.next(binary) {
            if self.matches(binary, value) {
                return true;
            }
        }
        false
    }

    /// Whether the current occurrence equals `value`.
    ///
    /// Strings, bytes and embedded messages compare byte for byte, numbers
    /// by value.
    pub fn matches(&mut self, binary: &Binary, value: &Value) -> bool {
        let result = self.current(binary).and_then(|(_, part)| {
            let raw = field::layout(&part).ok_or(Error::Invalidated)?;
            let field = self.leaf()?;
            Ok(field::matches(field, &raw, binary.value(&part), value))
        });
        self.observe(result).unwrap_or(false)
    }

    /// Decodes the current occurrence.
    ///
    /// # Errors
    ///
    /// [`Error::FieldNotFound`] if the cursor is not on an occurrence, the
    /// frozen error if it is frozen, or the decoding error.
    pub fn get(&mut self, binary: &Binary) -> Result<Value> {
        let result = self.current(binary).and_then(|(_, part)| {
            let raw = field::layout(&part).ok_or(Error::Invalidated)?;
            field::decode(self.leaf()?, &raw, binary.value(&part))
        });
        self.observe(result)
    }

    /// Overwrites the current occurrence.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`Error::ValueMismatch`] and
    /// [`Error::OutOfMemory`].
    pub fn put(&mut self, binary: &mut Binary, value: &Value) -> Result<()> {
        let result = self.put_in(binary, value);
        self.observe(result)
    }

    fn put_in(&self, binary: &mut Binary, value: &Value) -> Result<()> {
        let (id, _) = self.current(binary)?;
        let encoded = field::encode_value(self.leaf()?, value)?;
        binary.edit(|b| field::overwrite(b, id, &encoded))
    }

    /// Erases the current occurrence. The following call to
    /// [`next`](Self::next) moves to the occurrence that came after it.
    ///
    /// # Errors
    ///
    /// As [`put`](Self::put).
    pub fn erase(&mut self, binary: &mut Binary) -> Result<()> {
        let result = self.erase_in(binary);
        if let Ok(marker) = result {
            if let Some(frame) = self.frames.last_mut() {
                if let Some(old) = frame.anchor.replace(Anchor::Marker(marker)) {
                    binary.release(old.id());
                }
            }
            self.erased = true;
        }
        self.observe(result.map(drop))
    }

    fn erase_in(&self, binary: &mut Binary) -> Result<PartId> {
        let (_, part) = self.current(binary)?;
        let raw = field::layout(&part).ok_or(Error::Invalidated)?;
        let message = self.frames.last().ok_or(Error::Invalidated)?.message;
        binary.edit(|b| {
            let at = raw.offset();
            let scope = b.align(message)?;
            let marker = b.create_part(Part::marker(at, &scope, message))?;
            let removed = field::remove(b, message, &raw).and_then(|()| b.propagate(message));
            match removed {
                Ok(()) => Ok(marker),
                Err(err) => {
                    b.release(marker);
                    Err(err)
                }
            }
        })
    }

    /// Value bytes of the current occurrence, without header or length
    /// prefix. `None` unless the cursor is on an occurrence.
    #[must_use]
    pub fn raw<'b>(&self, binary: &'b Binary) -> Option<&'b [u8]> {
        let (_, part) = self.current(binary).ok()?;
        Some(binary.value(&part))
    }

    /// Creates a message view over the current occurrence of an embedded
    /// message field.
    ///
    /// # Errors
    ///
    /// [`Error::ValueMismatch`] if the field is not a message field, plus the
    /// errors of [`get`](Self::get).
    pub fn message(&mut self, binary: &mut Binary) -> Result<Message<'s>> {
        let result = self.current(binary).and_then(|(id, _)| {
            let nested = self
                .leaf()?
                .nested()
                .ok_or(Error::ValueMismatch { tag: self.tag })?;
            Message::from_field(binary, self.schema, nested, id)
        });
        self.observe(result)
    }

    fn leaf(&self) -> Result<&'s FieldDescriptor> {
        self.path
            .last()
            .copied()
            .ok_or(Error::FieldNotFound { tag: self.tag })
    }

    /// The current occurrence, if the cursor is on one.
    fn current(&self, binary: &Binary) -> Result<(PartId, Part)> {
        if let CursorState::Errored(err) = self.state {
            return Err(err);
        }
        let anchor = match self.state {
            CursorState::Positioned if self.frames.len() == self.path.len() => {
                self.frames.last().and_then(|f| f.anchor)
            }
            _ => None,
        };
        match anchor {
            Some(Anchor::Field(id)) => Ok((id, binary.part(id)?)),
            _ => Err(Error::FieldNotFound { tag: self.tag }),
        }
    }

    /// Freezes on failures that leave the position untrustworthy.
    fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if matches!(
                err,
                Error::Invalidated | Error::OutOfMemory | Error::Malformed
            ) {
                self.fail(*err);
            }
        }
        result
    }

    fn fail(&mut self, err: Error) {
        if self.valid() {
            warn!(tag = self.tag, pos = self.pos, error = ?err, "cursor frozen");
            self.state = CursorState::Errored(err);
        }
    }

    /// Depth-first search for the next leaf occurrence.
    fn advance(&mut self, binary: &mut Binary) -> Result<bool> {
        let leaf = self.path.len() - 1;
        loop {
            let level = self.frames.len() - 1;
            let Some(raw) = self.step(binary, level)? else {
                if level == 0 {
                    return Ok(false);
                }
                if let Some(frame) = self.frames.pop() {
                    Self::release_frame(binary, &frame);
                }
                continue;
            };

            let tracked = field::track(binary, self.frames[level].message, &raw)?;
            if let Some(old) = self.frames[level].anchor.replace(Anchor::Field(tracked)) {
                binary.release(old.id());
            }
            if level == leaf {
                return Ok(true);
            }

            let message = binary.create_part(Part::new(
                PartKind::Message,
                raw.start,
                raw.end,
                Some(tracked),
            ))?;
            self.frames.push(Frame {
                message,
                anchor: None,
            });
        }
    }

    /// Next occurrence of the tag of `level` after that level's anchor.
    fn step(&self, binary: &mut Binary, level: usize) -> Result<Option<RawField>> {
        let frame = &self.frames[level];
        let field = self.path[level];
        let message = binary.align(frame.message)?;
        let from = match frame.anchor {
            None => message.start,
            Some(Anchor::Field(id)) => binary.align(id)?.end,
            Some(Anchor::Marker(id)) => binary.align(id)?.start,
        };
        let bytes = binary.read(from..message.end)?;
        for raw in Fields::new(bytes, from) {
            let raw = raw?;
            if raw.tag == field.tag() {
                field::check_wire(field, &raw)?;
                if field::is_packed_run(field, &raw) {
                    continue;
                }
                return Ok(Some(raw));
            }
        }
        Ok(None)
    }

    fn release_frame(binary: &mut Binary, frame: &Frame) {
        if let Some(anchor) = frame.anchor {
            binary.release(anchor.id());
        }
        binary.release(frame.message);
    }
}

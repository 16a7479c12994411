//! Tracked byte ranges ("parts") and the arena that owns them.
//!
//! A part describes one message or one field occurrence:
//!
//! ```text
//!   offset()        start                 end
//!   |-- tag_len --|-- len_len --|-- value bytes --|
//! ```
//!
//! Messages have no header (`tag_len == len_len == 0`); a nested message
//! spans exactly the value of the field part it hangs off. Parts form a tree
//! through their `parent` link. A parent stays allocated for as long as a
//! child names it, so walking up the chain to rewrite length prefixes never
//! meets a freed slot.
//!
//! Offsets are kept current lazily: [`Part::apply`] moves a part across one
//! journal entry, or reports that the bytes it described are gone.

use alloc::vec::Vec;

use crate::{journal::JournalEntry, wire::WireType};

/// Handle to a part inside a [`Binary`](crate::Binary).
///
/// Handles are checked on every use: a handle whose slot was freed and
/// reused, or that belongs to another binary, resolves to
/// [`Error::Invalidated`](crate::Error::Invalidated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartId {
    owner: u64,
    index: u32,
    epoch: u32,
}

impl PartId {
    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        Self {
            owner: 0,
            index: u32::MAX,
            epoch: 0,
        }
    }
}

/// What a part describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartKind {
    Message,
    Field { tag: u32, wire_type: WireType },
    /// Empty range remembering where an erased occurrence used to start,
    /// with the value range of the message it was erased from.
    Marker {
        message_start: usize,
        message_end: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Part {
    pub kind: PartKind,
    pub start: usize,
    pub end: usize,
    pub tag_len: usize,
    pub len_len: usize,
    pub parent: Option<PartId>,
    /// Generation of the binary this part was last aligned to.
    pub generation: u64,
    /// Holders plus live children.
    refs: u32,
    pub valid: bool,
}

impl Part {
    pub fn new(kind: PartKind, start: usize, end: usize, parent: Option<PartId>) -> Self {
        Self {
            kind,
            start,
            end,
            tag_len: 0,
            len_len: 0,
            parent,
            generation: 0,
            refs: 1,
            valid: true,
        }
    }

    /// Marker at `at` inside `message`, the current range of part `id`.
    pub fn marker(at: usize, message: &Part, id: PartId) -> Self {
        let kind = PartKind::Marker {
            message_start: message.start,
            message_end: message.end,
        };
        Self::new(kind, at, at, Some(id))
    }

    #[must_use]
    pub fn with_header(mut self, tag_len: usize, len_len: usize) -> Self {
        self.tag_len = tag_len;
        self.len_len = len_len;
        self
    }

    /// First byte of the tag header (or of the value, for messages).
    pub fn offset(&self) -> usize {
        self.start - self.len_len - self.tag_len
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Moves the part across one splice. Returns `false` when the splice
    /// replaced bytes the part described.
    pub fn apply(&mut self, entry: &JournalEntry, id: PartId) -> bool {
        let delta = entry.delta();
        let removed_end = entry.removed_end();

        if let PartKind::Marker {
            message_start,
            message_end,
        } = self.kind
        {
            return self.apply_marker(entry, (message_start, message_end));
        }

        if id == entry.container
            || (self.start <= entry.origin_start && entry.origin_end <= self.end)
        {
            // the edit happened inside this part
            self.end = shift(self.end, delta);
        } else if entry.offset >= self.end {
            // entirely behind us
        } else if removed_end <= self.offset() {
            self.start = shift(self.start, delta);
            self.end = shift(self.end, delta);
        } else if self.len_len > 0
            && entry.offset == self.start - self.len_len
            && removed_end == self.start
        {
            // our own length prefix was rewritten
            self.start = shift(self.start, delta);
            self.end = shift(self.end, delta);
            self.len_len = entry.inserted;
        } else {
            return false;
        }
        true
    }

    /// A marker follows the bytes in front of it. Insertions right at it
    /// stay behind it when its message, or a message enclosing it, makes
    /// them, and go in front of it when a message nested inside it grew up
    /// to the marker. Which handle made the edit does not matter, only
    /// where the edit happened.
    fn apply_marker(&mut self, entry: &JournalEntry, scope: (usize, usize)) -> bool {
        let Some(message_id) = self.parent else {
            return false;
        };
        let mut message = Part::new(PartKind::Message, scope.0, scope.1, None);
        if !message.apply(entry, message_id) {
            return false;
        }

        let at = self.start;
        let origin = (entry.origin_start, entry.origin_end);
        let nested = scope.0 <= origin.0 && origin.1 <= scope.1 && origin != scope;
        if entry.removed_end() <= at && entry.offset < at {
            self.start = shift(at, entry.delta());
        } else if entry.offset == at && entry.removed == 0 && nested {
            self.start = shift(at, entry.delta());
        } else if entry.offset < at {
            return false;
        }
        self.start = self.start.clamp(message.start, message.end);
        self.end = self.start;
        self.kind = PartKind::Marker {
            message_start: message.start,
            message_end: message.end,
        };
        true
    }
}

fn shift(offset: usize, delta: isize) -> usize {
    // journal entries never move a part before the start of the buffer
    offset.saturating_add_signed(delta)
}

#[derive(Debug)]
struct Slot {
    epoch: u32,
    part: Option<Part>,
}

/// Slab of parts belonging to one binary.
#[derive(Debug)]
pub(crate) struct PartArena {
    owner: u64,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl PartArena {
    pub fn new(owner: u64) -> Self {
        Self {
            owner,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `part`, taking a reference on its parent.
    pub fn insert(&mut self, part: Part) -> PartId {
        if let Some(parent) = part.parent {
            if let Some(p) = self.get_mut(parent) {
                p.refs += 1;
            }
        }
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].part = Some(part);
                index
            }
            None => {
                #[expect(clippy::cast_possible_truncation)]
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    epoch: 0,
                    part: Some(part),
                });
                index
            }
        };
        PartId {
            owner: self.owner,
            index,
            epoch: self.slots[index as usize].epoch,
        }
    }

    pub fn get(&self, id: PartId) -> Option<&Part> {
        if id.owner != self.owner {
            return None;
        }
        let slot = self.slots.get(id.index as usize)?;
        if slot.epoch != id.epoch {
            return None;
        }
        slot.part.as_ref()
    }

    pub fn get_mut(&mut self, id: PartId) -> Option<&mut Part> {
        if id.owner != self.owner {
            return None;
        }
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.epoch != id.epoch {
            return None;
        }
        slot.part.as_mut()
    }

    /// Adds a holder to a live part.
    pub fn retain(&mut self, id: PartId) -> bool {
        match self.get_mut(id) {
            Some(part) => {
                part.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference; frees the part, and possibly its ancestors, once
    /// nothing refers to them any more.
    pub fn release(&mut self, id: PartId) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let Some(part) = self.get_mut(id) else {
                return;
            };
            part.refs -= 1;
            if part.refs > 0 {
                return;
            }
            next = part.parent;
            let slot = &mut self.slots[id.index as usize];
            slot.part = None;
            slot.epoch = slot.epoch.wrapping_add(1);
            self.free.push(id.index);
        }
    }

    /// Calls `f` on every allocated part.
    #[expect(clippy::cast_possible_truncation)]
    pub fn for_each_mut(&mut self, mut f: impl FnMut(PartId, &mut Part)) {
        let owner = self.owner;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(part) = slot.part.as_mut() {
                let id = PartId {
                    owner,
                    index: index as u32,
                    epoch: slot.epoch,
                };
                f(id, part);
            }
        }
    }

    /// Ids of every allocated part.
    #[cfg(any(test, feature = "fuzzing"))]
    #[expect(clippy::cast_possible_truncation)]
    pub fn ids(&self) -> Vec<PartId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.part.is_some())
            .map(|(index, slot)| PartId {
                owner: self.owner,
                index: index as u32,
                epoch: slot.epoch,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const FIELD: PartKind = PartKind::Field {
        tag: 1,
        wire_type: WireType::LengthDelimited,
    };

    fn entry(container: PartId, origin: (usize, usize), offset: usize, removed: usize, inserted: usize) -> JournalEntry {
        JournalEntry {
            container,
            origin_start: origin.0,
            origin_end: origin.1,
            offset,
            removed,
            inserted,
            generation: 1,
        }
    }

    // Field with a one-byte tag and one-byte length prefix, value [12, 20).
    fn field() -> Part {
        Part::new(FIELD, 12, 20, None).with_header(1, 1)
    }

    #[rstest]
    // edit inside the field's own value
    #[case(entry(PartId::dangling(), (12, 20), 14, 2, 5), Some((12, 23, 1)))]
    // edit after the field
    #[case(entry(PartId::dangling(), (0, 40), 20, 0, 3), Some((12, 20, 1)))]
    // insertion right before the header
    #[case(entry(PartId::dangling(), (0, 40), 10, 0, 3), Some((15, 23, 1)))]
    // deletion ending at the header
    #[case(entry(PartId::dangling(), (0, 40), 4, 6, 0), Some((6, 14, 1)))]
    // length prefix grows to two bytes
    #[case(entry(PartId::dangling(), (0, 40), 11, 1, 2), Some((13, 21, 2)))]
    // the whole occurrence is erased
    #[case(entry(PartId::dangling(), (0, 40), 10, 10, 0), None)]
    fn field_alignment(#[case] entry: JournalEntry, #[case] expected: Option<(usize, usize, usize)>) {
        let mut part = field();
        let mut id = PartId::dangling();
        id.index = 7;
        let ok = part.apply(&entry, id);
        assert_eq!(ok.then_some((part.start, part.end, part.len_len)), expected);
    }

    #[test]
    fn empty_nested_message_stays_put_when_a_sibling_follows() {
        // message at [12, 12) inside field [10, 12); sibling appended at 12
        let mut message = Part::new(PartKind::Message, 12, 12, None);
        let e = entry(PartId::dangling(), (0, 12), 12, 0, 4);
        let mut id = PartId::dangling();
        id.index = 3;
        assert!(message.apply(&e, id));
        assert_eq!((message.start, message.end), (12, 12));
    }

    #[test]
    fn marker_follows_insertions_into_preceding_empty_message() {
        let mut arena = PartArena::new(9);
        let parent = arena.insert(Part::new(PartKind::Message, 0, 30, None));
        let empty = arena.insert(Part::new(PartKind::Message, 12, 12, None));
        let scope = *arena.get(parent).unwrap();
        let marker_id = arena.insert(Part::marker(12, &scope, parent));
        let mut marker = *arena.get(marker_id).unwrap();

        // insertion into the empty message shifts the marker
        assert!(marker.apply(&entry(empty, (12, 12), 12, 0, 2), marker_id));
        assert_eq!(marker.start, 14);

        // insertion into the marker's own message at the marker stays
        assert!(marker.apply(&entry(parent, (0, 32), 14, 0, 2), marker_id));
        assert_eq!(marker.start, 14);

        // erasing the field that starts at the marker leaves it in place
        assert!(marker.apply(&entry(parent, (0, 34), 14, 5, 0), marker_id));
        assert_eq!(marker.start, 14);

        // erasing bytes before the marker pulls it back
        assert!(marker.apply(&entry(parent, (0, 29), 2, 4, 0), marker_id));
        assert_eq!(marker.start, 10);
        assert_eq!(
            marker.kind,
            PartKind::Marker {
                message_start: 0,
                message_end: 25
            }
        );
    }

    // Marker inside a message whose value is [10, 20).
    #[rstest]
    // a nested message ending at the marker grows
    #[case(20, entry(PartId::dangling(), (16, 20), 20, 0, 3), Some((23, 10, 23)))]
    // the marker's message inserts at the marker, through whatever handle
    #[case(20, entry(PartId::dangling(), (10, 20), 20, 0, 3), Some((20, 10, 23)))]
    #[case(14, entry(PartId::dangling(), (10, 20), 14, 0, 3), Some((14, 10, 23)))]
    // an enclosing message inserts right after the marker's message
    #[case(20, entry(PartId::dangling(), (0, 40), 20, 0, 3), Some((20, 10, 20)))]
    // bytes inserted in front of the message
    #[case(20, entry(PartId::dangling(), (0, 40), 4, 0, 2), Some((22, 12, 22)))]
    // the message's length prefix grows
    #[case(14, entry(PartId::dangling(), (0, 40), 9, 1, 2), Some((15, 11, 21)))]
    // a removal swallows the marker
    #[case(14, entry(PartId::dangling(), (10, 20), 12, 4, 0), None)]
    fn marker_alignment(
        #[case] at: usize,
        #[case] entry: JournalEntry,
        #[case] expected: Option<(usize, usize, usize)>,
    ) {
        let mut message_id = PartId::dangling();
        message_id.index = 3;
        let message = Part::new(PartKind::Message, 10, 20, None);
        let mut marker = Part::marker(at, &message, message_id);
        let ok = marker.apply(&entry, PartId::dangling());
        let found = ok.then(|| match marker.kind {
            PartKind::Marker {
                message_start,
                message_end,
            } => (marker.start, message_start, message_end),
            _ => unreachable!(),
        });
        assert_eq!(found, expected);
        assert_eq!(marker.start, marker.end);
    }

    #[test]
    fn arena_reuses_slots_with_new_epoch() {
        let mut arena = PartArena::new(1);
        let a = arena.insert(Part::new(PartKind::Message, 0, 4, None));
        arena.release(a);
        assert!(arena.get(a).is_none());

        let b = arena.insert(Part::new(PartKind::Message, 0, 4, None));
        assert_ne!(a, b);
        assert!(arena.get(b).is_some());
        assert!(arena.get(a).is_none());
    }

    #[test]
    fn parents_outlive_released_holders() {
        let mut arena = PartArena::new(1);
        let field = arena.insert(field());
        let message = arena.insert(Part::new(PartKind::Message, 12, 20, Some(field)));
        arena.release(field);
        assert!(arena.get(field).is_some(), "child still refers to it");
        assert_eq!(arena.len(), 2);

        arena.release(message);
        assert!(arena.get(field).is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn foreign_handles_do_not_resolve() {
        let mut a = PartArena::new(1);
        let b = PartArena::new(2);
        let id = a.insert(field());
        assert!(b.get(id).is_none());
    }
}

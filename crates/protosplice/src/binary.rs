//! The byte buffer every message and cursor edits in place.

use alloc::vec::Vec;
use core::{
    ops::Range,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, error, trace};

use crate::{
    error::{Error, Result},
    journal::{Journal, JournalEntry},
    options::BinaryOptions,
    part::{Part, PartArena, PartId},
    wire,
};

/// Smallest capacity a growing buffer jumps to.
const MIN_GROWTH: usize = 64;

/// Journal length below which edits never walk the arena.
const COMPACT_AFTER: usize = 64;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// A protocol-buffer encoded byte buffer that can be read and edited in
/// place.
///
/// Messages and cursors created over a binary are handles into it: reading
/// through them borrows the binary, editing borrows it mutably. Every edit
/// keeps the offsets of all other live handles consistent, or marks the
/// handles whose bytes it destroyed as invalid.
///
/// # Examples
///
/// ```rust
/// use protosplice::Binary;
///
/// let binary = Binary::from_vec(vec![0x08, 0x96, 0x01]);
/// assert_eq!(binary.as_bytes(), &[0x08, 0x96, 0x01]);
/// assert_eq!(binary.read(1..3).unwrap(), &[0x96, 0x01]);
/// ```
#[derive(Debug)]
pub struct Binary {
    data: Vec<u8>,
    options: BinaryOptions,
    generation: u64,
    poisoned: bool,
    journal: Journal,
    parts: PartArena,
}

impl Default for Binary {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<u8>> for Binary {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl AsRef<[u8]> for Binary {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Binary {
    /// Creates an empty binary.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Takes ownership of already encoded bytes.
    ///
    /// The bytes are not validated; use [`Message::check`](crate::Message::check)
    /// for that.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            options: BinaryOptions::default(),
            generation: 0,
            poisoned: false,
            journal: Journal::default(),
            parts: PartArena::new(NEXT_OWNER.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Takes ownership of `data` and applies `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if `min_capacity` cannot be reserved or
    /// exceeds `max_capacity`.
    pub fn with_options(mut data: Vec<u8>, options: BinaryOptions) -> Result<Self> {
        if options.max_capacity.is_some_and(|max| options.min_capacity > max) {
            return Err(Error::OutOfMemory);
        }
        let additional = options.min_capacity.saturating_sub(data.len());
        data.try_reserve(additional).map_err(|_| Error::OutOfMemory)?;
        let mut binary = Self::from_vec(data);
        binary.options = options;
        Ok(binary)
    }

    /// Options the binary was created with.
    #[must_use]
    pub fn options(&self) -> &BinaryOptions {
        &self.options
    }

    /// The encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Number of edits applied so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a failed allocation left the binary unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of parts currently tracked, including the ones only kept alive
    /// by their children.
    #[must_use]
    pub fn live_parts(&self) -> usize {
        self.parts.len()
    }

    /// Borrows `range` of the buffer.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] if the range is out of bounds,
    /// [`Error::OutOfMemory`] if the binary is poisoned.
    pub fn read(&self, range: Range<usize>) -> Result<&[u8]> {
        if self.poisoned {
            return Err(Error::OutOfMemory);
        }
        self.data.get(range).ok_or(Error::Malformed)
    }

    /// Gives the bytes back.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Replaces `removed` bytes at `offset` with `insert`, recording the edit
    /// as made inside `container`.
    ///
    /// Returns the change in buffer length. Parts other than `container` are
    /// not touched until they are aligned.
    pub(crate) fn splice(
        &mut self,
        container: PartId,
        offset: usize,
        removed: usize,
        insert: &[u8],
    ) -> Result<isize> {
        let origin = self.align(container)?;
        let removed_end = offset.checked_add(removed).ok_or(Error::Malformed)?;
        if removed_end > self.data.len() {
            return Err(Error::Malformed);
        }

        let required = self.data.len() - removed + insert.len();
        if required > self.data.capacity() {
            self.grow(required)?;
        }

        self.data.splice(offset..removed_end, insert.iter().copied());
        self.generation += 1;
        let entry = JournalEntry {
            container,
            origin_start: origin.start,
            origin_end: origin.end,
            offset,
            removed,
            inserted: insert.len(),
            generation: self.generation,
        };
        self.journal.push(entry);
        trace!(
            offset,
            removed,
            inserted = insert.len(),
            generation = self.generation,
            "splice"
        );
        Ok(entry.delta())
    }

    fn grow(&mut self, required: usize) -> Result<()> {
        let mut target = required
            .max(self.data.capacity().saturating_mul(2))
            .max(MIN_GROWTH);
        if let Some(max) = self.options.max_capacity {
            target = target.min(max);
        }
        let failed = target < required
            || self
                .data
                .try_reserve_exact(target - self.data.len())
                .is_err();
        if failed {
            error!(
                required,
                capacity = self.data.capacity(),
                "buffer growth failed, poisoning binary"
            );
            self.poisoned = true;
            return Err(Error::OutOfMemory);
        }
        Ok(())
    }

    /// Brings `id` up to date with the journal and returns a copy of it.
    pub(crate) fn align(&mut self, id: PartId) -> Result<Part> {
        if self.poisoned {
            return Err(Error::OutOfMemory);
        }
        let part = self.parts.get_mut(id).ok_or(Error::Invalidated)?;
        if catch_up(&self.journal, self.generation, id, part) {
            Ok(*part)
        } else {
            Err(Error::Invalidated)
        }
    }

    /// Ends an edit. Parts are aligned when they are next used; the journal
    /// is compacted once it holds more entries than there are parts.
    pub(crate) fn commit(&mut self) {
        if self.journal.len() >= COMPACT_AFTER.max(self.parts.len()) {
            self.compact();
        }
    }

    /// Aligns every live part and forgets the journal.
    fn compact(&mut self) {
        let (journal, generation) = (&self.journal, self.generation);
        let mut invalidated = 0usize;
        self.parts.for_each_mut(|id, part| {
            if part.valid && !catch_up(journal, generation, id, part) {
                invalidated += 1;
            }
        });
        debug!(
            entries = self.journal.len(),
            parts = self.parts.len(),
            invalidated,
            generation = self.generation,
            "compacted journal"
        );
        self.journal.clear();
    }

    /// Runs `f` and commits whatever it spliced, whether or not it succeeded.
    pub(crate) fn edit<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        self.commit();
        result
    }

    /// Returns a valid part with current offsets, without storing the
    /// alignment.
    pub(crate) fn part(&self, id: PartId) -> Result<Part> {
        if self.poisoned {
            return Err(Error::OutOfMemory);
        }
        let mut part = *self.parts.get(id).ok_or(Error::Invalidated)?;
        if catch_up(&self.journal, self.generation, id, &mut part) {
            Ok(part)
        } else {
            Err(Error::Invalidated)
        }
    }

    /// Value bytes of a part returned by [`Self::part`] or [`Self::align`].
    pub(crate) fn value(&self, part: &Part) -> &[u8] {
        &self.data[part.start..part.end]
    }

    pub(crate) fn create_part(&mut self, mut part: Part) -> Result<PartId> {
        if self.poisoned {
            return Err(Error::OutOfMemory);
        }
        part.generation = self.generation;
        Ok(self.parts.insert(part))
    }

    pub(crate) fn retain(&mut self, id: PartId) -> Result<()> {
        if self.parts.retain(id) {
            Ok(())
        } else {
            Err(Error::Invalidated)
        }
    }

    pub(crate) fn release(&mut self, id: PartId) {
        self.parts.release(id);
    }

    /// Rewrites the length prefixes of `container` and all its ancestors
    /// after the size of `container` changed.
    pub(crate) fn propagate(&mut self, container: PartId) -> Result<()> {
        let mut next = Some(container);
        let mut prefix = Vec::with_capacity(wire::MAX_VARINT_LEN);
        while let Some(id) = next {
            let part = self.align(id)?;
            if part.len_len > 0 {
                prefix.clear();
                wire::encode_varint(part.len() as u64, &mut prefix);
                let at = part.start - part.len_len;
                if self.data[at..part.start] != prefix[..] {
                    // the prefix is outside this part, so the edit belongs
                    // to whatever contains it
                    let owner = part.parent.unwrap_or(id);
                    self.splice(owner, at, part.len_len, &prefix)?;
                }
            }
            next = part.parent;
        }
        Ok(())
    }

    #[cfg(any(test, feature = "fuzzing"))]
    pub(crate) fn part_ids(&self) -> Vec<PartId> {
        self.parts.ids()
    }
}

/// Replays the entries `part` has not seen. Marks it invalid and returns
/// `false` when one of them destroyed the bytes it described.
fn catch_up(journal: &Journal, generation: u64, id: PartId, part: &mut Part) -> bool {
    if !part.valid {
        return false;
    }
    if part.generation == generation {
        return true;
    }
    let Some(pending) = journal.since(part.generation, generation) else {
        part.valid = false;
        return false;
    };
    for entry in pending {
        if !part.apply(entry, id) {
            part.valid = false;
            debug!(
                kind = ?part.kind,
                at = entry.offset,
                generation = entry.generation,
                "part invalidated by edit"
            );
            return false;
        }
    }
    part.generation = generation;
    true
}

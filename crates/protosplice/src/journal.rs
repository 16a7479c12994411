//! Log of splices that live parts have not been aligned to yet.
//!
//! Every splice on a [`Binary`](crate::Binary) appends one entry and bumps the
//! binary's generation. A part remembers the generation it was last aligned
//! at and replays the newer entries to find its current offsets. Once the
//! journal outgrows the arena, every live part is caught up and the journal
//! is cleared.

use alloc::vec::Vec;

use crate::part::PartId;

/// One splice, in the coordinates of the buffer right before it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JournalEntry {
    /// Part the edit was made in.
    pub container: PartId,
    /// Value range of the container before the edit.
    pub origin_start: usize,
    pub origin_end: usize,
    /// First byte replaced.
    pub offset: usize,
    pub removed: usize,
    pub inserted: usize,
    /// Generation the binary reached with this edit.
    pub generation: u64,
}

impl JournalEntry {
    /// Net change of the buffer length.
    #[expect(clippy::cast_possible_wrap)]
    pub fn delta(&self) -> isize {
        self.inserted as isize - self.removed as isize
    }

    /// One past the last byte replaced.
    pub fn removed_end(&self) -> usize {
        self.offset + self.removed
    }
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn push(&mut self, entry: JournalEntry) {
        debug_assert!(
            self.entries
                .last()
                .is_none_or(|last| last.generation + 1 == entry.generation),
            "journal generations must be consecutive"
        );
        self.entries.push(entry);
    }

    /// Entries newer than `generation`, oldest first.
    ///
    /// Returns `None` when some of those entries were already compacted away,
    /// in which case a part at `generation` can no longer be aligned.
    pub fn since(&self, generation: u64, current: u64) -> Option<&[JournalEntry]> {
        let first = self.entries.partition_point(|e| e.generation <= generation);
        let pending = &self.entries[first..];
        let missing = current.checked_sub(generation)?;
        (pending.len() as u64 == missing).then_some(pending)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Where [`Message::put`](crate::Message::put) places a new occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertMode {
    /// Insert before the first field whose tag is greater than the new one,
    /// so messages written in ascending tag order stay that way.
    #[default]
    Ordered,
    /// Append at the end of the message.
    Append,
}

/// Configuration options for a [`Binary`](crate::Binary).
///
/// # Examples
///
/// ```rust
/// use protosplice::{Binary, BinaryOptions, InsertMode};
///
/// let binary = Binary::with_options(
///     vec![0x08, 0x96, 0x01],
///     BinaryOptions {
///         insert_mode: InsertMode::Append,
///         ..Default::default()
///     },
/// )
/// .unwrap();
/// assert_eq!(binary.len(), 3);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryOptions {
    /// Placement of occurrences created by `put` on an absent tag, or on a
    /// repeated tag.
    ///
    /// # Default
    ///
    /// [`InsertMode::Ordered`]
    pub insert_mode: InsertMode,

    /// Capacity reserved when the binary is created.
    ///
    /// Growth past the capacity is geometric, so this only matters when the
    /// final size is known up front.
    ///
    /// # Default
    ///
    /// `0`
    pub min_capacity: usize,

    /// Upper bound on the capacity of the buffer.
    ///
    /// An edit that would need more fails with
    /// [`Error::OutOfMemory`](crate::Error::OutOfMemory) and poisons the
    /// binary, exactly as a failed allocation does.
    ///
    /// # Default
    ///
    /// `None` (bounded only by the allocator)
    pub max_capacity: Option<usize>,
}

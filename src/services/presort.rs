//! Presort staging buffer.
//!
//! Records are staged in a small array kept sorted by key prefix. Staging
//! reorders writes so that the persistent index sees keys in runs of nearby
//! values, and drops repeats of a staged key without touching the index.
//!
//! When the buffer overflows, the entry with the largest prefix is released;
//! smaller keys stay staged longer and leave together on drain.

use crate::models::IndexKey;

/// A staged record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresortEntry {
    /// Index key of the record.
    pub key: IndexKey,
    /// 1-based input line number.
    pub line: u64,
    /// The record bytes as read, delimiter included.
    pub record: Vec<u8>,
}

/// Outcome of [`PresortBuffer::offer`].
#[derive(Debug, PartialEq, Eq)]
pub enum OfferResult {
    /// The record was staged and the buffer is within capacity.
    Staged,
    /// A staged entry already has the same key prefix; the record was dropped.
    DuplicateSuppressed,
    /// The record was staged and this entry (the largest prefix) was
    /// released to make room. The caller resolves it against the index.
    Evicted(PresortEntry),
}

/// Bounded, key-sorted staging area in front of the persistent index.
///
/// Holds at most `capacity` entries with pairwise distinct key prefixes, in
/// ascending prefix order. Insertion is a binary search plus a shift, which
/// is cheap for the few hundred entries this buffer is meant to hold.
#[derive(Debug)]
pub struct PresortBuffer {
    capacity: usize,
    prefix_width: usize,
    entries: Vec<PresortEntry>,
}

impl PresortBuffer {
    /// Creates an empty buffer.
    ///
    /// `prefix_width` is the number of leading key bytes compared for
    /// ordering and for duplicate suppression. With a width below the index
    /// key width, distinct keys sharing a prefix are treated as duplicates.
    #[must_use]
    pub fn new(capacity: usize, prefix_width: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            prefix_width,
            entries: Vec::with_capacity(capacity.max(1) + 1),
        }
    }

    /// Maximum number of staged entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of the key that are compared.
    #[must_use]
    pub const fn prefix_width(&self) -> usize {
        self.prefix_width
    }

    /// Number of staged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offers a record to the buffer.
    ///
    /// The record bytes are copied only when the record is staged.
    pub fn offer(&mut self, key: IndexKey, line: u64, record: &[u8]) -> OfferResult {
        let width = self.prefix_width;
        let probe = key.prefix(width);
        let pos = match self
            .entries
            .binary_search_by(|entry| entry.key.prefix(width).cmp(probe))
        {
            Ok(_) => return OfferResult::DuplicateSuppressed,
            Err(pos) => pos,
        };

        self.entries.insert(
            pos,
            PresortEntry {
                key,
                line,
                record: record.to_vec(),
            },
        );

        if self.entries.len() > self.capacity {
            if let Some(largest) = self.entries.pop() {
                return OfferResult::Evicted(largest);
            }
        }
        OfferResult::Staged
    }

    /// Removes every staged entry in ascending key order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, PresortEntry> {
        self.entries.drain(..)
    }

    /// Staged entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = &PresortEntry> {
        self.entries.iter()
    }
}

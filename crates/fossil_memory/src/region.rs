//! # Memory Regions
//!
//! A region is a word-aligned, owned span of raw memory. Regions are what
//! flows through the two-phase sizing protocol: a component reports how many
//! bytes it needs, the caller obtains a region of that size and hands it back
//! to the component, which carves its own metadata out of it.
//!
//! A region is never split or reallocated once the platform has handed it
//! out; components address sub-ranges of it by word index, and the same
//! allocation travels back to the host on shutdown.
//!
//! Word alignment lets allocator metadata be viewed as plain-old-data
//! through `bytemuck` without any unsafe code.

use std::fmt;

/// Size of one region word in bytes.
pub const WORD_SIZE: u64 = std::mem::size_of::<u64>() as u64;

/// Rounds `bytes` up to a whole number of region words.
#[inline]
#[must_use]
pub const fn align_to_word(bytes: u64) -> u64 {
    bytes.saturating_add(WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

/// An owned, word-aligned span of raw memory.
///
/// Regions are created by the platform layer (see [`crate::platform`]) and
/// passed down by value; whoever holds one owns it.
#[derive(Default, PartialEq, Eq)]
pub struct MemoryRegion {
    words: Box<[u64]>,
}

impl MemoryRegion {
    pub(crate) fn from_words(words: Box<[u64]>) -> Self {
        Self { words }
    }

    /// Returns the size of the region in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.words.len() as u64 * WORD_SIZE
    }

    /// Returns true if the region holds no memory.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Views the region as bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Views the region as mutable bytes.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    #[inline]
    pub(crate) fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline]
    pub(crate) fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    /// Zeroes the whole region.
    pub fn zero(&mut self) {
        self.words.fill(0);
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegion").field("len", &self.len()).finish()
    }
}

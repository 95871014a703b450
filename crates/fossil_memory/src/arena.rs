//! # Arena Allocator
//!
//! One contiguous data block sub-divided at runtime by a [`FreeList`].
//! Blocks can be allocated and freed individually in any order; memory only
//! goes back to the host as a whole when the arena is destroyed.

use crate::error::{MemoryError, MemoryResult};
use crate::freelist::FreeList;
use crate::region::{align_to_word, MemoryRegion};

/// A free-list backed arena.
///
/// Both the free-list metadata and the data block live in the single
/// caller-supplied region, in that order:
///
/// ```text
/// [free-list metadata][data block: total_size bytes]
/// ```
///
/// The region is never split or copied; the data block is addressed at a
/// fixed offset inside it. Allocations are identified by their byte offset
/// into the data block.
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. Use one arena per thread.
///
/// # Example
///
/// ```rust,ignore
/// let required = Arena::memory_requirement(4096);
/// let mut arena = Arena::create(4096, platform::allocate_region(required)?)?;
///
/// let offset = arena.allocate(256)?;
/// arena.bytes_mut(offset, 256)?.fill(0xFF);
/// arena.free(offset, 256)?;
/// ```
#[derive(Debug)]
pub struct Arena {
    /// Size of the data block in bytes.
    total_size: u64,
    /// Free ranges of the data block. Owns the region; the data block is
    /// its spare tail.
    list: FreeList,
}

impl Arena {
    /// Returns the number of bytes [`Arena::create`] needs for an arena with
    /// `total_size` usable bytes. Has no side effects.
    #[inline]
    #[must_use]
    pub const fn memory_requirement(total_size: u64) -> u64 {
        FreeList::memory_requirement(total_size) + align_to_word(total_size)
    }

    /// Creates an arena with `total_size` usable bytes inside `region`.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::RegionTooSmall`] if `region` is smaller than
    ///   [`Arena::memory_requirement`]
    /// - [`MemoryError::ZeroSize`] if `total_size` is zero
    pub fn create(total_size: u64, region: MemoryRegion) -> MemoryResult<Self> {
        let required = Self::memory_requirement(total_size);
        if region.len() < required {
            return Err(MemoryError::RegionTooSmall {
                required,
                provided: region.len(),
            });
        }

        // Zeroes the data block along with the metadata.
        let list = FreeList::create(total_size, region)?;

        tracing::debug!("arena created with {}B usable", total_size);
        Ok(Self { total_size, list })
    }

    /// Returns the size of the data block.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns the number of free bytes.
    #[inline]
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.list.free_space()
    }

    /// Returns the free list backing this arena.
    #[inline]
    #[must_use]
    pub const fn free_list(&self) -> &FreeList {
        &self.list
    }

    /// Returns true if `[offset, offset + size)` lies inside the data block.
    #[inline]
    #[must_use]
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset
            .checked_add(size)
            .is_some_and(|end| end <= self.total_size)
    }

    /// Allocates `size` bytes and returns their offset in the data block.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] if `size` is zero
    /// - [`MemoryError::OutOfSpace`] if the free list cannot satisfy it
    pub fn allocate(&mut self, size: u64) -> MemoryResult<u64> {
        if size == 0 {
            tracing::error!("arena allocation needs a size above 0");
            return Err(MemoryError::ZeroSize);
        }

        self.list.allocate_block(size).map_err(|err| {
            tracing::error!("arena failed to allocate {}B: {}", size, err);
            err
        })
    }

    /// Returns `[offset, offset + size)` to the arena.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::NotOwned`] if the range is not inside the data block
    /// - any error of [`FreeList::free_block`]
    pub fn free(&mut self, offset: u64, size: u64) -> MemoryResult<()> {
        if !self.contains(offset, size) {
            return Err(MemoryError::NotOwned { offset, size });
        }

        self.list.free_block(size, offset).map_err(|err| {
            tracing::error!("arena failed to free block at {} ({}B): {}", offset, size, err);
            err
        })
    }

    /// Views `len` bytes of the data block starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotOwned`] if the range is out of bounds.
    pub fn bytes(&self, offset: u64, len: u64) -> MemoryResult<&[u8]> {
        let range = self.byte_range(offset, len)?;
        Ok(&self.list.spare_bytes()[range])
    }

    /// Mutably views `len` bytes of the data block starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotOwned`] if the range is out of bounds.
    pub fn bytes_mut(&mut self, offset: u64, len: u64) -> MemoryResult<&mut [u8]> {
        let range = self.byte_range(offset, len)?;
        Ok(&mut self.list.spare_bytes_mut()[range])
    }

    /// Copies `len` bytes from `source` to `dest` inside the data block.
    /// The ranges may overlap.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotOwned`] if either range is out of bounds.
    pub fn copy_within(&mut self, source: u64, dest: u64, len: u64) -> MemoryResult<()> {
        let from = self.byte_range(source, len)?;
        let to = self.byte_range(dest, len)?;
        self.list.spare_bytes_mut().copy_within(from, to.start);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn byte_range(&self, offset: u64, len: u64) -> MemoryResult<std::ops::Range<usize>> {
        if !self.contains(offset, len) {
            return Err(MemoryError::NotOwned { offset, size: len });
        }
        // In bounds of an allocated block, so both fit in usize.
        let start = offset as usize;
        Ok(start..start + len as usize)
    }

    /// Zeroes all owned memory and hands the region back to the host.
    ///
    /// The returned region is the one passed to [`Arena::create`]. The arena
    /// never releases memory to the OS itself.
    #[must_use]
    pub fn destroy(self) -> MemoryRegion {
        tracing::debug!("arena of {}B destroyed", self.total_size);
        self.list.destroy()
    }
}

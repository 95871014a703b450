//! # Fixed-Slot Hashtable
//!
//! Direct-indexed table keyed by name. The key hash picks exactly one slot;
//! there is no probing and no collision detection, so two names that hash
//! alike share a slot and the last write wins. The shader and resource
//! systems size their tables so that this does not matter in practice.
//!
//! Backing memory is supplied by the caller, sized with
//! [`Hashtable::memory_requirement`].

use bytemuck::Pod;
use std::marker::PhantomData;

use crate::error::{MemoryError, MemoryResult};
use crate::system::{Block, MemorySystem};

/// Multiplier of the polynomial name hash.
const HASH_MULTIPLIER: u64 = 97;

/// Hashes `name` into one of `slot_count` slots.
#[must_use]
pub fn hash_name(name: &str, slot_count: u32) -> u64 {
    let hash = name
        .bytes()
        .fold(0u64, |hash, byte| hash.wrapping_mul(HASH_MULTIPLIER).wrapping_add(u64::from(byte)));
    hash % u64::from(slot_count.max(1))
}

/// A fixed-slot table of `T` values.
#[derive(Debug)]
pub struct Hashtable<T: Pod> {
    block: Block,
    slot_count: u32,
    _marker: PhantomData<T>,
}

#[allow(clippy::cast_possible_truncation)]
#[inline]
const fn byte_index(bytes: u64) -> usize {
    bytes as usize
}

impl<T: Pod> Hashtable<T> {
    /// Size of one slot in bytes.
    pub const STRIDE: u64 = std::mem::size_of::<T>() as u64;

    /// Returns the bytes needed for `slot_count` slots. Has no side effects.
    #[inline]
    #[must_use]
    pub const fn memory_requirement(slot_count: u32) -> u64 {
        Self::STRIDE * slot_count as u64
    }

    /// Builds a table of `slot_count` zeroed slots in `block`.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] if `slot_count` is zero or `T` is
    ///   zero-sized
    /// - [`MemoryError::RegionTooSmall`] if `block` is smaller than
    ///   [`Hashtable::memory_requirement`]
    pub fn create(memory: &mut MemorySystem, slot_count: u32, block: Block) -> MemoryResult<Self> {
        let required = Self::memory_requirement(slot_count);
        if required == 0 {
            return Err(MemoryError::ZeroSize);
        }
        if block.len() < required {
            return Err(MemoryError::RegionTooSmall {
                required,
                provided: block.len(),
            });
        }

        memory.zero(&block)?;
        Ok(Self {
            block,
            slot_count,
            _marker: PhantomData,
        })
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub const fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Stores `value` in the slot for `name`, overwriting whatever is there.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing block is no longer writable.
    pub fn set(&self, memory: &mut MemorySystem, name: &str, value: T) -> MemoryResult<()> {
        let range = self.slot_range(hash_name(name, self.slot_count));
        memory.bytes_mut(&self.block)?[range].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Returns the value in the slot for `name`.
    ///
    /// Slots never written read as zero (or as the last [`Hashtable::fill`]
    /// value).
    ///
    /// # Errors
    ///
    /// Returns an error if the backing block is no longer readable.
    pub fn get(&self, memory: &MemorySystem, name: &str) -> MemoryResult<T> {
        let range = self.slot_range(hash_name(name, self.slot_count));
        Ok(bytemuck::pod_read_unaligned(&memory.bytes(&self.block)?[range]))
    }

    /// Returns the slot index `name` maps to.
    #[inline]
    #[must_use]
    pub fn slot_of(&self, name: &str) -> u64 {
        hash_name(name, self.slot_count)
    }

    /// Writes `value` into every slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing block is no longer writable.
    pub fn fill(&self, memory: &mut MemorySystem, value: T) -> MemoryResult<()> {
        let live = byte_index(Self::memory_requirement(self.slot_count));
        let bytes = &mut memory.bytes_mut(&self.block)?[..live];
        for slot in bytes.chunks_exact_mut(byte_index(Self::STRIDE)) {
            slot.copy_from_slice(bytemuck::bytes_of(&value));
        }
        Ok(())
    }

    /// Zeroes the slot for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing block is no longer writable.
    pub fn clear(&self, memory: &mut MemorySystem, name: &str) -> MemoryResult<()> {
        let range = self.slot_range(hash_name(name, self.slot_count));
        memory.bytes_mut(&self.block)?[range].fill(0);
        Ok(())
    }

    /// Tears the table down and hands its block back to the caller.
    #[must_use]
    pub fn destroy(self) -> Block {
        self.block
    }

    fn slot_range(&self, slot: u64) -> std::ops::Range<usize> {
        let start = byte_index(slot * Self::STRIDE);
        start..start + byte_index(Self::STRIDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySystemSettings;
    use crate::tag::MemoryTag;

    const INVALID_ID: u32 = u32::MAX;

    fn table(memory: &mut MemorySystem, slots: u32) -> Hashtable<u32> {
        let block = memory
            .allocate(Hashtable::<u32>::memory_requirement(slots), MemoryTag::Renderer)
            .unwrap();
        Hashtable::create(memory, slots, block).unwrap()
    }

    fn memory() -> MemorySystem {
        MemorySystem::init(MemorySystemSettings::with_total_size(1024)).unwrap()
    }

    #[test]
    fn test_hash_name() {
        assert_eq!(hash_name("", 16), 0);
        assert_eq!(hash_name("a", 1000), 97);
        // ('a' * 97 + 'b') % 1000
        assert_eq!(hash_name("ab", 1000), (97 * 97 + 98) % 1000);
        assert_eq!(hash_name("anything", 0), 0);
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut memory = memory();
        let shaders = table(&mut memory, 64);
        shaders.fill(&mut memory, INVALID_ID).unwrap();

        shaders.set(&mut memory, "builtin.material", 3).unwrap();
        assert_eq!(shaders.get(&memory, "builtin.material").unwrap(), 3);
        assert_eq!(shaders.get(&memory, "builtin.ui").unwrap(), INVALID_ID);
    }

    #[test]
    fn test_colliding_names_share_a_slot() {
        let mut memory = memory();
        let shaders = table(&mut memory, 1);
        shaders.set(&mut memory, "first", 1).unwrap();
        shaders.set(&mut memory, "second", 2).unwrap();
        assert_eq!(shaders.get(&memory, "first").unwrap(), 2);
    }

    #[test]
    fn test_clear_zeroes_one_slot() {
        let mut memory = memory();
        let shaders = table(&mut memory, 64);
        shaders.fill(&mut memory, 5).unwrap();
        shaders.clear(&mut memory, "a").unwrap();
        assert_eq!(shaders.get(&memory, "a").unwrap(), 0);
        assert_eq!(shaders.get(&memory, "b").unwrap(), 5);
    }

    #[test]
    fn test_create_validates_block() {
        let mut memory = memory();
        let block = memory.allocate(8, MemoryTag::Renderer).unwrap();
        assert_eq!(
            Hashtable::<u32>::create(&mut memory, 4, block).unwrap_err(),
            MemoryError::RegionTooSmall { required: 16, provided: 8 }
        );
        assert_eq!(
            Hashtable::<u32>::create(&mut memory, 0, block).unwrap_err(),
            MemoryError::ZeroSize
        );
    }

    #[test]
    fn test_destroy_hands_block_back() {
        let mut memory = memory();
        let shaders = table(&mut memory, 8);
        let block = shaders.destroy();
        memory.free(block, block.len(), MemoryTag::Renderer).unwrap();
        assert_eq!(memory.free_space(), 1024);
    }
}

//! # Growable Array
//!
//! The engine's general-purpose collection: a contiguous, auto-resizing
//! buffer of plain-old-data elements living in [`MemorySystem`] memory.
//!
//! Growth doubles the capacity, copies the live elements into the new block
//! and frees the old one. Every operation that touches element storage takes
//! the memory system explicitly; an array must be handed back with
//! [`GrowableArray::destroy`] or its block stays allocated.

use bytemuck::Pod;
use std::marker::PhantomData;

use crate::error::{MemoryError, MemoryResult};
use crate::system::{Block, MemorySystem};
use crate::tag::MemoryTag;

/// Capacity of an array made with [`GrowableArray::create`].
pub const DEFAULT_CAPACITY: u64 = 1;

/// Capacity multiplier applied on growth.
pub const RESIZE_FACTOR: u64 = 2;

/// An auto-resizing array of `T`.
///
/// # Example
///
/// ```rust,ignore
/// let mut stages: GrowableArray<u32> = GrowableArray::create(&mut memory)?;
/// stages.push(&mut memory, VERTEX_STAGE)?;
/// stages.push(&mut memory, FRAGMENT_STAGE)?;
/// assert_eq!(stages.len(), 2);
/// stages.destroy(&mut memory)?;
/// ```
#[derive(Debug)]
pub struct GrowableArray<T: Pod> {
    block: Block,
    capacity: u64,
    length: u64,
    _marker: PhantomData<T>,
}

#[allow(clippy::cast_possible_truncation)]
#[inline]
const fn byte_index(bytes: u64) -> usize {
    // Bounded by the array's own block.
    bytes as usize
}

impl<T: Pod> GrowableArray<T> {
    /// Size of one element in bytes.
    pub const STRIDE: u64 = std::mem::size_of::<T>() as u64;

    /// Creates an empty array with room for one element.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] for zero-sized `T`
    /// - any allocation error of [`MemorySystem::allocate`]
    pub fn create(memory: &mut MemorySystem) -> MemoryResult<Self> {
        Self::create_reserve(memory, DEFAULT_CAPACITY)
    }

    /// Creates an empty array with room for `capacity` elements.
    ///
    /// A capacity of zero is raised to one so that doubling can make
    /// progress.
    ///
    /// # Errors
    ///
    /// Same as [`GrowableArray::create`].
    pub fn create_reserve(memory: &mut MemorySystem, capacity: u64) -> MemoryResult<Self> {
        Self::with_layout(memory, capacity, false)
    }

    /// Creates an array of `capacity` zeroed elements with the length
    /// already set to the capacity.
    ///
    /// Meant for sparse, slot-addressed use through [`GrowableArray::set`]
    /// and [`GrowableArray::get`]; pushing onto it grows it.
    ///
    /// # Errors
    ///
    /// Same as [`GrowableArray::create`].
    pub fn create_reserve_with_length(memory: &mut MemorySystem, capacity: u64) -> MemoryResult<Self> {
        Self::with_layout(memory, capacity, true)
    }

    fn with_layout(memory: &mut MemorySystem, capacity: u64, filled: bool) -> MemoryResult<Self> {
        if Self::STRIDE == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let capacity = capacity.max(1);
        let block = memory.allocate(capacity * Self::STRIDE, MemoryTag::GrowableArray)?;

        Ok(Self {
            block,
            capacity,
            length: if filled { capacity } else { 0 },
            _marker: PhantomData,
        })
    }

    /// Number of live elements.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.length
    }

    /// Returns true if there are no live elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of elements the current block can hold.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Size of one element in bytes.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> u64 {
        Self::STRIDE
    }

    /// The memory block currently backing the array.
    #[inline]
    #[must_use]
    pub const fn block(&self) -> &Block {
        &self.block
    }

    /// Overrides the length. Elements past the old length keep whatever
    /// bytes their slots hold.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `length` exceeds the
    /// capacity.
    pub fn set_len(&mut self, length: u64) -> MemoryResult<()> {
        if length > self.capacity {
            return Err(MemoryError::IndexOutOfBounds {
                index: length,
                length: self.capacity,
            });
        }
        self.length = length;
        Ok(())
    }

    /// Appends `value`, doubling the capacity first if the array is full.
    ///
    /// # Errors
    ///
    /// Any error raised while growing, including a free of the old block
    /// that the arena cannot track. The array, its block and the tag
    /// counters are left as they were.
    pub fn push(&mut self, memory: &mut MemorySystem, value: T) -> MemoryResult<()> {
        if self.length >= self.capacity {
            self.reallocate(memory, self.capacity * RESIZE_FACTOR)?;
        }
        self.write(memory, self.length, &value)?;
        self.length += 1;
        Ok(())
    }

    /// Removes and returns the last element, or `None` if empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing block is no longer readable.
    pub fn pop(&mut self, memory: &MemorySystem) -> MemoryResult<Option<T>> {
        if self.length == 0 {
            return Ok(None);
        }
        let value = self.read(memory, self.length - 1)?;
        self.length -= 1;
        Ok(Some(value))
    }

    /// Inserts `value` at `index`, shifting the tail up by one element.
    ///
    /// Only existing positions are accepted; use [`GrowableArray::push`] to
    /// append.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::IndexOutOfBounds`] if `index >= len()`; the array is
    ///   left unchanged
    /// - any error raised while growing; the array is left unchanged, as
    ///   for [`GrowableArray::push`]
    pub fn insert_at(&mut self, memory: &mut MemorySystem, index: u64, value: T) -> MemoryResult<()> {
        if index >= self.length {
            tracing::error!(
                "growable array insert at {} is past its length {}",
                index,
                self.length
            );
            return Err(MemoryError::IndexOutOfBounds {
                index,
                length: self.length,
            });
        }
        if self.length >= self.capacity {
            self.reallocate(memory, self.capacity * RESIZE_FACTOR)?;
        }

        let stride = byte_index(Self::STRIDE);
        let start = byte_index(index * Self::STRIDE);
        let end = byte_index(self.length * Self::STRIDE);
        let bytes = memory.bytes_mut(&self.block)?;
        bytes.copy_within(start..end, start + stride);
        bytes[start..start + stride].copy_from_slice(bytemuck::bytes_of(&value));

        self.length += 1;
        Ok(())
    }

    /// Removes and returns the element at `index`, shifting the tail down by
    /// one element.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `index >= len()`; the
    /// array is left unchanged.
    pub fn pop_at(&mut self, memory: &mut MemorySystem, index: u64) -> MemoryResult<T> {
        if index >= self.length {
            tracing::error!(
                "growable array pop at {} is past its length {}",
                index,
                self.length
            );
            return Err(MemoryError::IndexOutOfBounds {
                index,
                length: self.length,
            });
        }

        let value = self.read(memory, index)?;
        let stride = byte_index(Self::STRIDE);
        let start = byte_index(index * Self::STRIDE);
        let end = byte_index(self.length * Self::STRIDE);
        memory
            .bytes_mut(&self.block)?
            .copy_within(start + stride..end, start);

        self.length -= 1;
        Ok(value)
    }

    /// Returns a copy of the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `index >= len()`.
    pub fn get(&self, memory: &MemorySystem, index: u64) -> MemoryResult<T> {
        self.check_index(index)?;
        self.read(memory, index)
    }

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `index >= len()`.
    pub fn set(&mut self, memory: &mut MemorySystem, index: u64, value: T) -> MemoryResult<()> {
        self.check_index(index)?;
        self.write(memory, index, &value)
    }

    /// Iterates over copies of the live elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing block is no longer readable.
    pub fn iter<'a>(&self, memory: &'a MemorySystem) -> MemoryResult<impl Iterator<Item = T> + 'a> {
        let live = byte_index(self.length * Self::STRIDE);
        let bytes = &memory.bytes(&self.block)?[..live];
        Ok(bytes
            .chunks_exact(byte_index(Self::STRIDE))
            .map(bytemuck::pod_read_unaligned))
    }

    /// Copies the live elements out into a `Vec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing block is no longer readable.
    pub fn to_vec(&self, memory: &MemorySystem) -> MemoryResult<Vec<T>> {
        Ok(self.iter(memory)?.collect())
    }

    /// Drops every element but keeps the capacity.
    #[inline]
    pub fn clear(&mut self) {
        self.length = 0;
    }

    /// Reallocates the block to hold exactly `len()` elements (at least one).
    ///
    /// # Errors
    ///
    /// Same as [`GrowableArray::push`]; the array is left unchanged.
    pub fn shrink(&mut self, memory: &mut MemorySystem) -> MemoryResult<()> {
        let target = self.length.max(1);
        if target == self.capacity {
            return Ok(());
        }
        self.reallocate(memory, target)
    }

    /// Frees the backing block.
    ///
    /// # Errors
    ///
    /// Any error of [`MemorySystem::free`].
    pub fn destroy(self, memory: &mut MemorySystem) -> MemoryResult<()> {
        memory.free(self.block, self.capacity * Self::STRIDE, MemoryTag::GrowableArray)
    }

    /// Moves the live elements into a fresh block of `capacity` elements
    /// and frees the old block.
    ///
    /// Either the move completes or the array, its old block and the tag
    /// counters are left as they were: the new block is released again if
    /// the copy or the free of the old block fails.
    fn reallocate(&mut self, memory: &mut MemorySystem, capacity: u64) -> MemoryResult<()> {
        let new_size = capacity * Self::STRIDE;
        let block = memory.allocate(new_size, MemoryTag::GrowableArray)?;

        let live = self.length * Self::STRIDE;
        let moved = if live > 0 {
            memory.copy(&block, &self.block, live)
        } else {
            Ok(())
        };
        let moved = moved.and_then(|()| {
            memory.release(self.block, self.capacity * Self::STRIDE, MemoryTag::GrowableArray)
        });

        if let Err(err) = moved {
            tracing::warn!(
                "growable array could not move to {} elements: {}",
                capacity,
                err
            );
            if let Err(undo) = memory.release(block, new_size, MemoryTag::GrowableArray) {
                tracing::error!("growable array leaked a {}B block: {}", new_size, undo);
            }
            return Err(err);
        }

        tracing::trace!(
            "growable array moved from {} to {} elements",
            self.capacity,
            capacity
        );
        self.block = block;
        self.capacity = capacity;
        Ok(())
    }

    fn check_index(&self, index: u64) -> MemoryResult<()> {
        if index >= self.length {
            return Err(MemoryError::IndexOutOfBounds {
                index,
                length: self.length,
            });
        }
        Ok(())
    }

    fn read(&self, memory: &MemorySystem, index: u64) -> MemoryResult<T> {
        let start = byte_index(index * Self::STRIDE);
        let bytes = memory.bytes(&self.block)?;
        Ok(bytemuck::pod_read_unaligned(
            &bytes[start..start + byte_index(Self::STRIDE)],
        ))
    }

    fn write(&self, memory: &mut MemorySystem, index: u64, value: &T) -> MemoryResult<()> {
        let start = byte_index(index * Self::STRIDE);
        let bytes = memory.bytes_mut(&self.block)?;
        bytes[start..start + byte_index(Self::STRIDE)].copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySystemSettings;
    use crate::units::kibibytes;
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
    struct Vertex {
        position: [f32; 3],
        color: u32,
    }

    fn memory() -> MemorySystem {
        MemorySystem::init(MemorySystemSettings::with_total_size(kibibytes(16))).unwrap()
    }

    fn filled(memory: &mut MemorySystem, values: &[u32]) -> GrowableArray<u32> {
        let mut array = GrowableArray::create(memory).unwrap();
        for &value in values {
            array.push(memory, value).unwrap();
        }
        array
    }

    #[test]
    fn test_create_defaults() {
        let mut memory = memory();
        let array: GrowableArray<u64> = GrowableArray::create(&mut memory).unwrap();
        assert_eq!(array.capacity(), 1);
        assert_eq!(array.len(), 0);
        assert_eq!(array.stride(), 8);
        assert!(array.is_empty());
        assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 8);
    }

    #[test]
    fn test_push_doubles_capacity_and_preserves_elements() {
        let mut memory = memory();
        let mut array = GrowableArray::create(&mut memory).unwrap();
        let mut capacities = Vec::new();
        for value in 0..9u32 {
            let before = array.capacity();
            let prefix = array.to_vec(&memory).unwrap();
            array.push(&mut memory, value * 3).unwrap();

            assert!(array.capacity() >= before);
            if array.capacity() != before {
                assert_eq!(array.capacity(), before * 2);
            }
            assert_eq!(&array.to_vec(&memory).unwrap()[..prefix.len()], &prefix[..]);
            capacities.push(array.capacity());
        }
        assert_eq!(capacities, vec![1, 2, 4, 4, 8, 8, 8, 8, 16]);
        assert_eq!(array.len(), 9);
        assert_eq!(array.get(&memory, 8).unwrap(), 24);
    }

    #[test]
    fn test_growth_releases_old_blocks() {
        let mut memory = memory();
        let array = filled(&mut memory, &[1, 2, 3, 4, 5]);
        assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 8 * 4);

        array.destroy(&mut memory).unwrap();
        assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 0);
        assert_eq!(memory.free_space(), kibibytes(16));
    }

    #[test]
    fn test_pop() {
        let mut memory = memory();
        let mut array = filled(&mut memory, &[10, 20]);
        assert_eq!(array.pop(&memory).unwrap(), Some(20));
        assert_eq!(array.pop(&memory).unwrap(), Some(10));
        assert_eq!(array.pop(&memory).unwrap(), None);
        assert_eq!(array.capacity(), 2);
    }

    #[test]
    fn test_insert_at_shifts_tail() {
        let mut memory = memory();
        let mut array = filled(&mut memory, &[1, 2, 3, 4]);
        assert_eq!(array.capacity(), 4);

        array.insert_at(&mut memory, 0, 100).unwrap();
        assert_eq!(array.to_vec(&memory).unwrap(), vec![100, 1, 2, 3, 4]);
        assert_eq!(array.capacity(), 8);

        array.insert_at(&mut memory, 4, 200).unwrap();
        assert_eq!(array.to_vec(&memory).unwrap(), vec![100, 1, 2, 3, 200, 4]);
    }

    #[test]
    fn test_insert_at_past_length_is_a_no_op() {
        let mut memory = memory();
        let mut array = filled(&mut memory, &[1, 2]);
        assert_eq!(
            array.insert_at(&mut memory, 2, 9),
            Err(MemoryError::IndexOutOfBounds { index: 2, length: 2 })
        );
        assert_eq!(array.to_vec(&memory).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_pop_at_shifts_tail() {
        let mut memory = memory();
        let mut array = filled(&mut memory, &[1, 2, 3, 4, 5]);

        assert_eq!(array.pop_at(&mut memory, 1).unwrap(), 2);
        assert_eq!(array.to_vec(&memory).unwrap(), vec![1, 3, 4, 5]);
        assert_eq!(array.pop_at(&mut memory, 3).unwrap(), 5);
        assert_eq!(array.to_vec(&memory).unwrap(), vec![1, 3, 4]);

        assert_eq!(
            array.pop_at(&mut memory, 3),
            Err(MemoryError::IndexOutOfBounds { index: 3, length: 3 })
        );
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut memory = memory();
        let mut array = filled(&mut memory, &[1, 2, 3]);
        array.clear();
        assert_eq!(array.len(), 0);
        assert_eq!(array.capacity(), 4);
    }

    #[test]
    fn test_shrink_to_length() {
        let mut memory = memory();
        let mut array = filled(&mut memory, &[1, 2, 3, 4, 5]);
        assert_eq!(array.capacity(), 8);

        array.shrink(&mut memory).unwrap();
        assert_eq!(array.capacity(), 5);
        assert_eq!(array.to_vec(&memory).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 20);

        array.clear();
        array.shrink(&mut memory).unwrap();
        assert_eq!(array.capacity(), 1);
    }

    #[test]
    fn test_reserve_with_length_for_slot_access() {
        let mut memory = memory();
        let mut slots: GrowableArray<u32> =
            GrowableArray::create_reserve_with_length(&mut memory, 4).unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots.to_vec(&memory).unwrap(), vec![0, 0, 0, 0]);

        slots.set(&mut memory, 2, 7).unwrap();
        assert_eq!(slots.get(&memory, 2).unwrap(), 7);
        assert!(slots.get(&memory, 4).is_err());
    }

    #[test]
    fn test_set_len_bounded_by_capacity() {
        let mut memory = memory();
        let mut array: GrowableArray<u16> = GrowableArray::create_reserve(&mut memory, 8).unwrap();
        array.set_len(8).unwrap();
        assert_eq!(array.len(), 8);
        assert!(array.set_len(9).is_err());
    }

    #[test]
    fn test_struct_elements() {
        let mut memory = memory();
        let mut vertices = GrowableArray::create(&mut memory).unwrap();
        let a = Vertex { position: [1.0, 2.0, 3.0], color: 0xFF00_00FF };
        let b = Vertex { position: [4.0, 5.0, 6.0], color: 0x00FF_00FF };
        vertices.push(&mut memory, a).unwrap();
        vertices.push(&mut memory, b).unwrap();
        vertices.insert_at(&mut memory, 0, b).unwrap();

        assert_eq!(vertices.stride(), 16);
        assert_eq!(vertices.iter(&memory).unwrap().collect::<Vec<_>>(), vec![b, a, b]);
    }

    /// A 16-byte system has two free-list node slots. Leaves a one-byte
    /// array at offset 0 holding `7` and fills both slots with free ranges
    /// that do not touch it, so freeing the array's block needs a third.
    fn array_with_full_node_pool(memory: &mut MemorySystem) -> GrowableArray<u8> {
        let mut array = GrowableArray::create(memory).unwrap();
        array.push(memory, 7).unwrap();
        let _a = memory.allocate(1, MemoryTag::Application).unwrap();
        let b = memory.allocate(1, MemoryTag::Application).unwrap();
        let _c = memory.allocate(1, MemoryTag::Application).unwrap();
        memory.free(b, 1, MemoryTag::Application).unwrap();
        assert_eq!(free_ranges(memory), vec![(2, 1), (4, 12)]);
        array
    }

    fn free_ranges(memory: &MemorySystem) -> Vec<(u64, u64)> {
        memory
            .arena()
            .free_list()
            .ranges()
            .map(|range| (range.offset, range.size))
            .collect()
    }

    #[test]
    fn test_failed_growth_leaves_array_and_counters_unchanged() {
        let mut memory = MemorySystem::init(MemorySystemSettings::with_total_size(16)).unwrap();
        let mut array = array_with_full_node_pool(&mut memory);

        assert_eq!(
            array.push(&mut memory, 9),
            Err(MemoryError::NodePoolExhausted { capacity: 2 })
        );
        assert_eq!(
            array.insert_at(&mut memory, 0, 9),
            Err(MemoryError::NodePoolExhausted { capacity: 2 })
        );

        assert_eq!(array.capacity(), 1);
        assert_eq!(array.len(), 1);
        assert_eq!(array.to_vec(&memory).unwrap(), vec![7]);
        assert_eq!(array.block().origin(), crate::system::BlockOrigin::Arena { offset: 0 });
        assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 1);
        assert_eq!(free_ranges(&memory), vec![(2, 1), (4, 12)]);
        assert_eq!(memory.free_space(), 13);
    }

    #[test]
    fn test_failed_shrink_leaves_array_unchanged() {
        let mut memory = MemorySystem::init(MemorySystemSettings::with_total_size(16)).unwrap();
        let mut array: GrowableArray<u8> = GrowableArray::create_reserve(&mut memory, 2).unwrap();
        array.push(&mut memory, 5).unwrap();
        let _a = memory.allocate(1, MemoryTag::Application).unwrap();
        let b = memory.allocate(2, MemoryTag::Application).unwrap();
        let _c = memory.allocate(1, MemoryTag::Application).unwrap();
        memory.free(b, 2, MemoryTag::Application).unwrap();
        assert_eq!(free_ranges(&memory), vec![(3, 2), (6, 10)]);

        assert_eq!(
            array.shrink(&mut memory),
            Err(MemoryError::NodePoolExhausted { capacity: 2 })
        );
        assert_eq!(array.capacity(), 2);
        assert_eq!(array.to_vec(&memory).unwrap(), vec![5]);
        assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 2);
        assert_eq!(free_ranges(&memory), vec![(3, 2), (6, 10)]);
    }

    #[test]
    fn test_growth_succeeds_once_a_node_frees_up() {
        let mut memory = MemorySystem::init(MemorySystemSettings::with_total_size(16)).unwrap();
        let mut array = array_with_full_node_pool(&mut memory);
        assert!(array.push(&mut memory, 9).is_err());

        // Filling the hole at offset 2 returns its node to the pool.
        let hole = memory.allocate(1, MemoryTag::Application).unwrap();
        assert_eq!(hole.origin(), crate::system::BlockOrigin::Arena { offset: 2 });

        array.push(&mut memory, 9).unwrap();
        assert_eq!(array.to_vec(&memory).unwrap(), vec![7, 9]);
        assert_eq!(array.capacity(), 2);
        assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 2);
    }
}

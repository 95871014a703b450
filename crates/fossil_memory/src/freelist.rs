//! # Free-List Allocator
//!
//! Tracks the free byte ranges of a fixed-size address space as a singly
//! linked list sorted by offset. The list hands out offsets, never memory;
//! the owner (usually an [`Arena`](crate::Arena)) maps them onto a real
//! block.
//!
//! ## Layout
//!
//! All metadata lives inside the caller-supplied region:
//!
//! ```text
//! [node slots: max_entries * 24 bytes][free-index stack: max_entries * 8 bytes][spare]
//! ```
//!
//! A region larger than [`FreeList::memory_requirement`] is accepted whole.
//! The spare words past the metadata are zeroed on create and destroy and
//! otherwise left alone; the arena keeps its data block there so that both
//! live in one allocation.
//!
//! Links between nodes are slot indices. Unused slots are invalidated
//! (every field set to the sentinel) and their indices sit on the free-index
//! stack, so acquiring or returning a node is O(1).
//!
//! ## Invariants
//!
//! - Ranges never overlap and are kept in strictly ascending offset order.
//! - After any free, no two nodes are adjacent
//!   (`a.offset + a.size != b.offset`).

use bytemuck::{Pod, Zeroable};
use std::fmt;

use crate::error::{MemoryError, MemoryResult};
use crate::region::MemoryRegion;

/// Sentinel for "no node" and for invalidated node fields.
const INVALID: u64 = u64::MAX;

/// Region words occupied by one node slot.
const NODE_WORDS: usize = std::mem::size_of::<FreeListNode>() / std::mem::size_of::<u64>();

/// One free range as stored in the node pool.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
struct FreeListNode {
    offset: u64,
    size: u64,
    next: u64,
}

impl FreeListNode {
    const INVALIDATED: Self = Self {
        offset: INVALID,
        size: INVALID,
        next: INVALID,
    };

    #[inline]
    const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A free byte range `[offset, offset + size)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FreeRange {
    /// First free byte.
    pub offset: u64,
    /// Number of free bytes.
    pub size: u64,
}

impl FreeRange {
    /// One past the last free byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[allow(clippy::cast_possible_truncation)]
#[inline]
const fn slot(index: u64) -> usize {
    // Indices are bounded by the node pool, which fits in the address space.
    index as usize
}

/// Coalescing first-fit free-list allocator.
///
/// # Thread Safety
///
/// NOT thread-safe. The allocator is driven from a single thread.
///
/// # Example
///
/// ```rust,ignore
/// let required = FreeList::memory_requirement(1024);
/// let region = platform::allocate_region(required)?;
/// let mut list = FreeList::create(1024, region)?;
///
/// let offset = list.allocate_block(64)?;
/// list.free_block(64, offset)?;
/// assert_eq!(list.free_space(), 1024);
/// ```
pub struct FreeList {
    /// Size of the managed address space in bytes.
    total_size: u64,
    /// Number of node slots in the pool.
    max_entries: u64,
    /// Slot index of the first free range, or `INVALID` when fully allocated.
    head: u64,
    /// Number of indices on the free-index stack.
    free_top: u64,
    /// Node slots followed by the free-index stack.
    region: MemoryRegion,
}

impl FreeList {
    /// Maximum number of nodes a list over `total_size` bytes may need.
    ///
    /// One node per pointer-width of address space is a generous upper
    /// bound on fragmentation.
    #[inline]
    #[must_use]
    pub const fn max_entries_for(total_size: u64) -> u64 {
        let entries = total_size / std::mem::size_of::<usize>() as u64;
        if entries == 0 {
            1
        } else {
            entries
        }
    }

    /// Returns the number of bytes [`FreeList::create`] needs for a list
    /// managing `total_size` bytes.
    ///
    /// This is the query half of the two-phase protocol and has no side
    /// effects.
    #[inline]
    #[must_use]
    pub const fn memory_requirement(total_size: u64) -> u64 {
        let entries = Self::max_entries_for(total_size);
        entries * (std::mem::size_of::<FreeListNode>() as u64 + std::mem::size_of::<u64>() as u64)
    }

    /// Creates a free list over `total_size` bytes using `region` for its
    /// node pool.
    ///
    /// The head node initially spans the whole address space.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] if `total_size` is zero
    /// - [`MemoryError::RegionTooSmall`] if `region` is smaller than
    ///   [`FreeList::memory_requirement`]
    pub fn create(total_size: u64, region: MemoryRegion) -> MemoryResult<Self> {
        if total_size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let mut list = Self::empty(total_size, region)?;

        let head = list.acquire_node()?;
        list.set_node(
            head,
            FreeListNode {
                offset: 0,
                size: total_size,
                next: INVALID,
            },
        );
        list.head = head;

        tracing::trace!(
            "free list created over {}B with {} node slots",
            total_size,
            list.max_entries
        );
        Ok(list)
    }

    /// Builds a list with every slot invalidated and no ranges.
    fn empty(total_size: u64, mut region: MemoryRegion) -> MemoryResult<Self> {
        let required = Self::memory_requirement(total_size);
        if region.len() < required {
            return Err(MemoryError::RegionTooSmall {
                required,
                provided: region.len(),
            });
        }
        region.zero();

        let mut list = Self {
            total_size,
            max_entries: Self::max_entries_for(total_size),
            head: INVALID,
            free_top: 0,
            region,
        };
        list.reset_pool();
        Ok(list)
    }

    /// Invalidates every slot and refills the free-index stack so that
    /// slot 0 is handed out first.
    fn reset_pool(&mut self) {
        let max_entries = self.max_entries;
        let (nodes, stack) = self.parts_mut();
        nodes.fill(FreeListNode::INVALIDATED);
        for (position, index) in stack.iter_mut().zip((0..max_entries).rev()) {
            *position = index;
        }
        self.free_top = max_entries;
        self.head = INVALID;
    }

    /// Returns the size of the managed address space.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns the number of node slots in the pool.
    #[inline]
    #[must_use]
    pub const fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Returns the number of free ranges currently in the list.
    #[inline]
    #[must_use]
    pub const fn node_count(&self) -> u64 {
        self.max_entries - self.free_top
    }

    /// Iterates over the free ranges in ascending offset order.
    #[must_use]
    pub fn ranges(&self) -> Ranges<'_> {
        Ranges {
            list: self,
            cursor: self.head,
        }
    }

    /// Sums the sizes of all free ranges. O(n) in the node count.
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.ranges().map(|range| range.size).sum()
    }

    /// Allocates `size` bytes and returns their offset.
    ///
    /// The first node whose size matches exactly is consumed whole. If no
    /// node matches exactly, the first larger node (in offset order) is
    /// split in place: its offset advances by `size` and it shrinks.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] if `size` is zero
    /// - [`MemoryError::OutOfSpace`] if no node is large enough; the list
    ///   is left untouched
    pub fn allocate_block(&mut self, size: u64) -> MemoryResult<u64> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let mut previous = INVALID;
        let mut current = self.head;
        let mut first_larger = INVALID;

        while current != INVALID {
            let node = self.node(current);
            if node.size == size {
                if previous == INVALID {
                    self.head = node.next;
                } else {
                    let mut prev_node = self.node(previous);
                    prev_node.next = node.next;
                    self.set_node(previous, prev_node);
                }
                self.release_node(current);
                return Ok(node.offset);
            }
            if node.size > size && first_larger == INVALID {
                first_larger = current;
            }

            previous = current;
            current = node.next;
        }

        if first_larger != INVALID {
            let mut node = self.node(first_larger);
            let offset = node.offset;
            node.offset += size;
            node.size -= size;
            self.set_node(first_larger, node);
            return Ok(offset);
        }

        let available = self.free_space();
        tracing::warn!(
            "free list has no block large enough (requested: {}B, available: {}B)",
            size,
            available
        );
        Err(MemoryError::OutOfSpace {
            requested: size,
            available,
        })
    }

    /// Returns `[offset, offset + size)` to the list.
    ///
    /// The range is inserted at its sorted position and coalesced with
    /// both neighbours. Freeing a range that was never allocated, or
    /// freeing twice, is a caller error that is not detected in general.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ZeroSize`] if `size` is zero
    /// - [`MemoryError::NotOwned`] if the range extends past the end of the
    ///   address space
    /// - [`MemoryError::NodePoolExhausted`] if a new node is needed and none
    ///   is left
    pub fn free_block(&mut self, size: u64, offset: u64) -> MemoryResult<()> {
        if size == 0 {
            tracing::warn!("free list asked to free a zero-sized block at offset {}", offset);
            return Err(MemoryError::ZeroSize);
        }
        let in_bounds = offset
            .checked_add(size)
            .is_some_and(|end| end <= self.total_size);
        if !in_bounds {
            tracing::warn!(
                "free list asked to free [{}, +{}B) outside its {}B address space",
                offset,
                size,
                self.total_size
            );
            return Err(MemoryError::NotOwned { offset, size });
        }

        let mut previous = INVALID;
        let mut current = self.head;
        while current != INVALID {
            let mut node = self.node(current);
            if node.offset == offset {
                tracing::warn!(
                    "freeing offset {} which already starts a free range; possible double free",
                    offset
                );
                node.size += size;
                self.set_node(current, node);
                self.merge_forward(current);
                return Ok(());
            }
            if node.offset > offset {
                break;
            }
            previous = current;
            current = node.next;
        }

        self.insert_between(previous, current, FreeRange { offset, size })
    }

    /// Links `range` between `previous` and `next` (either may be
    /// `INVALID`), coalescing with whichever neighbours it touches.
    fn insert_between(&mut self, previous: u64, next: u64, range: FreeRange) -> MemoryResult<()> {
        let joins_previous = previous != INVALID && self.node(previous).end() == range.offset;
        let joins_next = next != INVALID && range.end() == self.node(next).offset;

        match (joins_previous, joins_next) {
            (true, true) => {
                let next_node = self.node(next);
                let mut prev_node = self.node(previous);
                prev_node.size += range.size + next_node.size;
                prev_node.next = next_node.next;
                self.set_node(previous, prev_node);
                self.release_node(next);
            }
            (true, false) => {
                let mut prev_node = self.node(previous);
                prev_node.size += range.size;
                self.set_node(previous, prev_node);
            }
            (false, true) => {
                let mut next_node = self.node(next);
                next_node.offset = range.offset;
                next_node.size += range.size;
                self.set_node(next, next_node);
            }
            (false, false) => {
                let index = self.acquire_node().map_err(|err| {
                    tracing::warn!(
                        "free list cannot track freed range [{}, +{}B): {}",
                        range.offset,
                        range.size,
                        err
                    );
                    err
                })?;
                self.set_node(
                    index,
                    FreeListNode {
                        offset: range.offset,
                        size: range.size,
                        next,
                    },
                );
                if previous == INVALID {
                    self.head = index;
                } else {
                    let mut prev_node = self.node(previous);
                    prev_node.next = index;
                    self.set_node(previous, prev_node);
                }
            }
        }
        Ok(())
    }

    /// Absorbs the successor of `index` if the two now touch.
    fn merge_forward(&mut self, index: u64) {
        let mut node = self.node(index);
        if node.next == INVALID {
            return;
        }
        let next = self.node(node.next);
        if node.end() == next.offset {
            let absorbed = node.next;
            node.size += next.size;
            node.next = next.next;
            self.set_node(index, node);
            self.release_node(absorbed);
        }
    }

    /// Resets the list to a single range spanning the whole address space.
    pub fn clear(&mut self) {
        self.reset_pool();
        // The pool was just refilled, so a slot is always available.
        if let Ok(head) = self.acquire_node() {
            self.set_node(
                head,
                FreeListNode {
                    offset: 0,
                    size: self.total_size,
                    next: INVALID,
                },
            );
            self.head = head;
        }
    }

    /// Grows the list to manage `new_size` bytes, moving its metadata into
    /// `new_region`.
    ///
    /// Existing ranges are carried over in order; the new tail
    /// `[total_size, new_size)` is either appended to a trailing free range
    /// or added as a new one. The old region is handed back to the caller;
    /// its spare words are not carried over.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::ResizeShrinks`] if `new_size` is below the current size
    /// - [`MemoryError::RegionTooSmall`] if `new_region` is too small
    /// - [`MemoryError::NodePoolExhausted`] if the old ranges do not fit
    pub fn resize(&mut self, new_size: u64, new_region: MemoryRegion) -> MemoryResult<MemoryRegion> {
        if new_size < self.total_size {
            return Err(MemoryError::ResizeShrinks {
                current: self.total_size,
                requested: new_size,
            });
        }

        let mut grown = Self::empty(new_size, new_region)?;
        let mut tail = INVALID;
        for range in self.ranges() {
            tail = grown.push_back(tail, range)?;
        }

        let growth = new_size - self.total_size;
        if growth > 0 {
            let extension = FreeRange {
                offset: self.total_size,
                size: growth,
            };
            if tail != INVALID && grown.node(tail).end() == self.total_size {
                let mut node = grown.node(tail);
                node.size += growth;
                grown.set_node(tail, node);
            } else {
                grown.push_back(tail, extension)?;
            }
        }

        tracing::debug!("free list resized from {}B to {}B", self.total_size, new_size);
        let old = std::mem::replace(self, grown);
        Ok(old.region)
    }

    /// Appends `range` after `tail` and returns the new tail.
    fn push_back(&mut self, tail: u64, range: FreeRange) -> MemoryResult<u64> {
        let index = self.acquire_node()?;
        self.set_node(
            index,
            FreeListNode {
                offset: range.offset,
                size: range.size,
                next: INVALID,
            },
        );
        if tail == INVALID {
            self.head = index;
        } else {
            let mut tail_node = self.node(tail);
            tail_node.next = index;
            self.set_node(tail, tail_node);
        }
        Ok(index)
    }

    /// Zeroes the whole region and hands it back to its owner.
    #[must_use]
    pub fn destroy(mut self) -> MemoryRegion {
        self.region.zero();
        self.region
    }

    /// Bytes of the region past the list's own metadata.
    pub(crate) fn spare_bytes(&self) -> &[u8] {
        let start = self.metadata_words();
        bytemuck::cast_slice(&self.region.words()[start..])
    }

    /// Mutable bytes of the region past the list's own metadata.
    pub(crate) fn spare_bytes_mut(&mut self) -> &mut [u8] {
        let start = self.metadata_words();
        bytemuck::cast_slice_mut(&mut self.region.words_mut()[start..])
    }

    /// Returns the region backing this list.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> &MemoryRegion {
        &self.region
    }

    // -------------------------------------------------------------------------
    // Node pool
    // -------------------------------------------------------------------------

    #[inline]
    const fn metadata_words(&self) -> usize {
        slot(self.max_entries) * (NODE_WORDS + 1)
    }

    fn parts(&self) -> (&[FreeListNode], &[u64]) {
        let node_words = slot(self.max_entries) * NODE_WORDS;
        let (nodes, stack) = self.region.words().split_at(node_words);
        (bytemuck::cast_slice(nodes), &stack[..slot(self.max_entries)])
    }

    fn parts_mut(&mut self) -> (&mut [FreeListNode], &mut [u64]) {
        let node_words = slot(self.max_entries) * NODE_WORDS;
        let entries = slot(self.max_entries);
        let (nodes, stack) = self.region.words_mut().split_at_mut(node_words);
        (bytemuck::cast_slice_mut(nodes), &mut stack[..entries])
    }

    #[inline]
    fn node(&self, index: u64) -> FreeListNode {
        self.parts().0[slot(index)]
    }

    #[inline]
    fn set_node(&mut self, index: u64, node: FreeListNode) {
        self.parts_mut().0[slot(index)] = node;
    }

    fn acquire_node(&mut self) -> MemoryResult<u64> {
        if self.free_top == 0 {
            return Err(MemoryError::NodePoolExhausted {
                capacity: self.max_entries,
            });
        }
        self.free_top -= 1;
        let top = slot(self.free_top);
        Ok(self.parts().1[top])
    }

    fn release_node(&mut self, index: u64) {
        let top = slot(self.free_top);
        let (nodes, stack) = self.parts_mut();
        nodes[slot(index)] = FreeListNode::INVALIDATED;
        stack[top] = index;
        self.free_top += 1;
    }
}

impl fmt::Debug for FreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field("total_size", &self.total_size)
            .field("max_entries", &self.max_entries)
            .field("ranges", &self.ranges().collect::<Vec<_>>())
            .finish()
    }
}

/// Iterator over the free ranges of a [`FreeList`].
pub struct Ranges<'a> {
    list: &'a FreeList,
    cursor: u64,
}

impl Iterator for Ranges<'_> {
    type Item = FreeRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == INVALID {
            return None;
        }
        let node = self.list.node(self.cursor);
        self.cursor = node.next;
        Some(FreeRange {
            offset: node.offset,
            size: node.size,
        })
    }
}

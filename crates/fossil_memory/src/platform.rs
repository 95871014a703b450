//! # Platform Memory Primitives
//!
//! The only place the engine talks to the operating system allocator.
//! It is reached exactly twice: to back the memory system's arena, and as
//! the fallback when the arena cannot serve a request.

use crate::error::{MemoryError, MemoryResult};
use crate::region::{align_to_word, MemoryRegion, WORD_SIZE};

/// Allocates a zeroed, word-aligned region of at least `size` bytes.
///
/// # Errors
///
/// Returns [`MemoryError::PlatformAllocationFailed`] if the OS refuses.
pub fn allocate_region(size: u64) -> MemoryResult<MemoryRegion> {
    let words = usize::try_from(align_to_word(size) / WORD_SIZE)
        .map_err(|_| MemoryError::PlatformAllocationFailed { size })?;

    let mut storage: Vec<u64> = Vec::new();
    storage
        .try_reserve_exact(words)
        .map_err(|_| MemoryError::PlatformAllocationFailed { size })?;
    storage.resize(words, 0);

    tracing::trace!("platform allocated region of {}B", size);
    Ok(MemoryRegion::from_words(storage.into_boxed_slice()))
}

/// Allocates a zeroed byte buffer of exactly `size` bytes.
///
/// # Errors
///
/// Returns [`MemoryError::PlatformAllocationFailed`] if the OS refuses.
pub fn allocate_bytes(size: u64) -> MemoryResult<Box<[u8]>> {
    let len = usize::try_from(size).map_err(|_| MemoryError::PlatformAllocationFailed { size })?;

    let mut storage: Vec<u8> = Vec::new();
    storage
        .try_reserve_exact(len)
        .map_err(|_| MemoryError::PlatformAllocationFailed { size })?;
    storage.resize(len, 0);

    Ok(storage.into_boxed_slice())
}

/// Returns a region to the OS.
pub fn release_region(region: MemoryRegion) {
    tracing::trace!("platform released region of {}B", region.len());
    drop(region);
}

/// Zeroes `block`.
#[inline]
pub fn zero_memory(block: &mut [u8]) {
    block.fill(0);
}

/// Copies as many bytes as fit from `source` into `dest`.
#[inline]
pub fn copy_memory(dest: &mut [u8], source: &[u8]) {
    let len = dest.len().min(source.len());
    dest[..len].copy_from_slice(&source[..len]);
}

/// Sets every byte of `dest` to `value`.
#[inline]
pub fn set_memory(dest: &mut [u8], value: u8) {
    dest.fill(value);
}

//! # Memory System
//!
//! The single entry point every engine subsystem allocates through.
//!
//! One [`MemorySystem`] owns one [`Arena`] sized from a host-chosen byte
//! budget. Each request carries a [`MemoryTag`]; the system keeps a running
//! byte count per tag and in total. When the arena cannot serve a request
//! the system falls back to the platform allocator, so callers only ever see
//! a failure if the OS itself refuses.
//!
//! ## Startup
//!
//! ```rust,ignore
//! let settings = MemorySystemSettings::with_total_size(mebibytes(64));
//!
//! // Query, then commit.
//! let required = MemorySystem::memory_requirement(&settings);
//! let region = platform::allocate_region(required)?;
//! let mut memory = MemorySystem::with_region(settings, region)?;
//!
//! let block = memory.allocate(256, MemoryTag::Renderer)?;
//! memory.free(block, 256, MemoryTag::Renderer)?;
//!
//! platform::release_region(memory.shutdown());
//! ```
//!
//! ## Accounting
//!
//! Counters are updated before the arena is consulted and are never rolled
//! back, and frees decrement whatever size and tag the caller passes. A
//! mismatched tag or size between allocate and free skews the statistics;
//! this is logged, not prevented.
//!
//! ## Thread Safety
//!
//! The system is `!Send` and `!Sync`. It is owned by the main loop and
//! passed by reference to whoever needs memory.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::arena::Arena;
use crate::error::{MemoryError, MemoryResult};
use crate::platform;
use crate::region::MemoryRegion;
use crate::settings::MemorySystemSettings;
use crate::tag::MemoryTag;
use crate::units::format_bytes;

/// Where the bytes of a [`Block`] live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockOrigin {
    /// Inside the arena's data block.
    Arena {
        /// Byte offset into the data block.
        offset: u64,
    },
    /// A fallback allocation straight from the platform layer.
    Platform {
        /// Fallback allocation id.
        id: u64,
    },
}

/// Handle to memory handed out by [`MemorySystem::allocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    origin: BlockOrigin,
    len: u64,
}

impl Block {
    /// Where the block lives.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> BlockOrigin {
        self.origin
    }

    /// Size the block was allocated with.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true for zero-sized blocks.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the block lives in the arena.
    #[inline]
    #[must_use]
    pub const fn is_arena(&self) -> bool {
        matches!(self.origin, BlockOrigin::Arena { .. })
    }
}

/// Aggregate and per-tag byte counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    total_allocated: u64,
    tagged: [u64; MemoryTag::COUNT],
}

impl MemoryStats {
    /// Bytes currently allocated across all tags.
    #[inline]
    #[must_use]
    pub const fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Bytes currently allocated under `tag`.
    #[inline]
    #[must_use]
    pub const fn tagged(&self, tag: MemoryTag) -> u64 {
        self.tagged[tag.index()]
    }

    fn record_allocate(&mut self, size: u64, tag: MemoryTag) {
        self.total_allocated = self.total_allocated.wrapping_add(size);
        self.tagged[tag.index()] = self.tagged[tag.index()].wrapping_add(size);
    }

    /// Returns false if the decrement wrapped below zero.
    fn record_free(&mut self, size: u64, tag: MemoryTag) -> bool {
        let slot = &mut self.tagged[tag.index()];
        let consistent = *slot >= size && self.total_allocated >= size;
        *slot = slot.wrapping_sub(size);
        self.total_allocated = self.total_allocated.wrapping_sub(size);
        consistent
    }
}

/// The tag-accounted allocation front end.
pub struct MemorySystem {
    settings: MemorySystemSettings,
    stats: MemoryStats,
    /// Number of allocate calls since startup.
    allocation_count: u64,
    arena: Arena,
    /// Fallback allocations, keyed by id.
    platform_blocks: HashMap<u64, Box<[u8]>>,
    next_platform_id: u64,
    _single_threaded: PhantomData<*const ()>,
}

impl MemorySystem {
    /// Returns the bytes [`MemorySystem::with_region`] needs for `settings`.
    /// Has no side effects.
    #[inline]
    #[must_use]
    pub const fn memory_requirement(settings: &MemorySystemSettings) -> u64 {
        Arena::memory_requirement(settings.total_size)
    }

    /// Builds the memory system inside a host-supplied region.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidConfig`] if the settings are invalid
    /// - [`MemoryError::RegionTooSmall`] if `region` is smaller than
    ///   [`MemorySystem::memory_requirement`]
    pub fn with_region(settings: MemorySystemSettings, region: MemoryRegion) -> MemoryResult<Self> {
        settings.validate()?;

        let arena = Arena::create(settings.total_size, region).map_err(|err| {
            tracing::error!("memory system failed to create its arena: {}", err);
            err
        })?;

        tracing::debug!("memory system allocated {}B", settings.total_size);
        Ok(Self {
            settings,
            stats: MemoryStats::default(),
            allocation_count: 0,
            arena,
            platform_blocks: HashMap::new(),
            next_platform_id: 0,
            _single_threaded: PhantomData,
        })
    }

    /// Allocates its own backing region from the platform and builds the
    /// memory system in it.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidConfig`] if the settings are invalid
    /// - [`MemoryError::PlatformAllocationFailed`] if the OS refuses; the
    ///   host should treat this as fatal
    pub fn init(settings: MemorySystemSettings) -> MemoryResult<Self> {
        settings.validate()?;

        let required = Self::memory_requirement(&settings);
        let region = platform::allocate_region(required).map_err(|err| {
            tracing::error!("memory system could not obtain {}B from the platform: {}", required, err);
            err
        })?;
        Self::with_region(settings, region)
    }

    /// Returns the settings the system was built with.
    #[inline]
    #[must_use]
    pub const fn settings(&self) -> &MemorySystemSettings {
        &self.settings
    }

    /// Returns the current byte counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    /// Returns the number of allocate calls since startup.
    #[inline]
    #[must_use]
    pub const fn allocation_count(&self) -> u64 {
        self.allocation_count
    }

    /// Returns the free bytes left in the arena.
    #[inline]
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.arena.free_space()
    }

    /// Returns the number of live fallback allocations.
    #[inline]
    #[must_use]
    pub fn platform_block_count(&self) -> usize {
        self.platform_blocks.len()
    }

    /// Returns the arena behind this system.
    #[inline]
    #[must_use]
    pub const fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Allocates `size` zeroed bytes under `tag`.
    ///
    /// Counters are bumped first. If the arena cannot serve the request the
    /// bytes come from the platform allocator instead; those are counted
    /// under their tag but not tracked by the arena.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::PlatformAllocationFailed`] if both the arena
    /// and the platform fallback fail. The counters keep the bytes.
    pub fn allocate(&mut self, size: u64, tag: MemoryTag) -> MemoryResult<Block> {
        warn_unknown(tag, "allocate");

        self.stats.record_allocate(size, tag);
        self.allocation_count += 1;

        match self.arena.allocate(size) {
            Ok(offset) => {
                platform::zero_memory(self.arena.bytes_mut(offset, size)?);
                Ok(Block {
                    origin: BlockOrigin::Arena { offset },
                    len: size,
                })
            }
            Err(err) => {
                tracing::warn!(
                    "arena could not serve {}B ({}); falling back to the platform allocator",
                    size,
                    err
                );
                let bytes = platform::allocate_bytes(size).map_err(|err| {
                    tracing::error!("memory system failed to allocate {}B under {}", size, tag);
                    err
                })?;

                let id = self.next_platform_id;
                self.next_platform_id += 1;
                self.platform_blocks.insert(id, bytes);
                Ok(Block {
                    origin: BlockOrigin::Platform { id },
                    len: size,
                })
            }
        }
    }

    /// Frees `block`, decrementing `size` bytes from `tag`.
    ///
    /// `size` and `tag` must match the allocating call. A mismatch is logged
    /// and the caller's values win.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::BlockNotFound`] if a fallback block was already freed
    /// - any arena free error
    pub fn free(&mut self, block: Block, size: u64, tag: MemoryTag) -> MemoryResult<()> {
        warn_unknown(tag, "free");
        if size != block.len {
            tracing::warn!(
                "freeing a {}B block as {}B; accounting will drift",
                block.len,
                size
            );
        }

        if !self.stats.record_free(size, tag) {
            tracing::warn!("freeing {}B under {} underflows the tag accounting", size, tag);
        }
        self.release_backing(block, size)
    }

    /// Frees `block` and only then decrements the counters, so a failed free
    /// leaves the statistics as they were. Used by containers that undo a
    /// half-finished move.
    pub(crate) fn release(&mut self, block: Block, size: u64, tag: MemoryTag) -> MemoryResult<()> {
        self.release_backing(block, size)?;
        if !self.stats.record_free(size, tag) {
            tracing::warn!("freeing {}B under {} underflows the tag accounting", size, tag);
        }
        Ok(())
    }

    fn release_backing(&mut self, block: Block, size: u64) -> MemoryResult<()> {
        match block.origin {
            BlockOrigin::Arena { offset } => self.arena.free(offset, size),
            BlockOrigin::Platform { id } => {
                if self.platform_blocks.remove(&id).is_some() {
                    Ok(())
                } else {
                    tracing::warn!("fallback block {} was already freed", id);
                    Err(MemoryError::BlockNotFound { offset: id, size })
                }
            }
        }
    }

    /// Views the bytes of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BlockNotFound`] for a freed fallback block, or
    /// [`MemoryError::NotOwned`] for an arena block outside the data block.
    pub fn bytes(&self, block: &Block) -> MemoryResult<&[u8]> {
        match block.origin {
            BlockOrigin::Arena { offset } => self.arena.bytes(offset, block.len),
            BlockOrigin::Platform { id } => self
                .platform_blocks
                .get(&id)
                .map(|bytes| &bytes[..])
                .ok_or(MemoryError::BlockNotFound {
                    offset: id,
                    size: block.len,
                }),
        }
    }

    /// Mutably views the bytes of `block`.
    ///
    /// # Errors
    ///
    /// Same as [`MemorySystem::bytes`].
    pub fn bytes_mut(&mut self, block: &Block) -> MemoryResult<&mut [u8]> {
        match block.origin {
            BlockOrigin::Arena { offset } => self.arena.bytes_mut(offset, block.len),
            BlockOrigin::Platform { id } => self
                .platform_blocks
                .get_mut(&id)
                .map(|bytes| &mut bytes[..])
                .ok_or(MemoryError::BlockNotFound {
                    offset: id,
                    size: block.len,
                }),
        }
    }

    /// Zeroes `block`.
    ///
    /// # Errors
    ///
    /// Same as [`MemorySystem::bytes_mut`].
    pub fn zero(&mut self, block: &Block) -> MemoryResult<()> {
        platform::zero_memory(self.bytes_mut(block)?);
        Ok(())
    }

    /// Sets every byte of `block` to `value`.
    ///
    /// # Errors
    ///
    /// Same as [`MemorySystem::bytes_mut`].
    pub fn set(&mut self, block: &Block, value: u8) -> MemoryResult<()> {
        platform::set_memory(self.bytes_mut(block)?, value);
        Ok(())
    }

    /// Copies the first `size` bytes of `source` into `dest`.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::IndexOutOfBounds`] if either block is shorter than
    ///   `size`
    /// - same as [`MemorySystem::bytes_mut`]
    pub fn copy(&mut self, dest: &Block, source: &Block, size: u64) -> MemoryResult<()> {
        let shortest = dest.len.min(source.len);
        if size > shortest {
            return Err(MemoryError::IndexOutOfBounds {
                index: size,
                length: shortest,
            });
        }

        let len = slice_len(size);
        let missing = |id: u64, block: &Block| MemoryError::BlockNotFound {
            offset: id,
            size: block.len,
        };
        match (source.origin, dest.origin) {
            (BlockOrigin::Arena { offset: from }, BlockOrigin::Arena { offset: to }) => {
                self.arena.copy_within(from, to, size)
            }
            (BlockOrigin::Arena { offset: from }, BlockOrigin::Platform { id }) => {
                let from = self.arena.bytes(from, size)?;
                let to = self
                    .platform_blocks
                    .get_mut(&id)
                    .ok_or_else(|| missing(id, dest))?;
                platform::copy_memory(&mut to[..len], from);
                Ok(())
            }
            (BlockOrigin::Platform { id }, BlockOrigin::Arena { offset: to }) => {
                let from = self
                    .platform_blocks
                    .get(&id)
                    .ok_or_else(|| missing(id, source))?;
                let to = self.arena.bytes_mut(to, size)?;
                platform::copy_memory(to, &from[..len]);
                Ok(())
            }
            (BlockOrigin::Platform { id: from }, BlockOrigin::Platform { id: to }) if from == to => {
                let bytes = self
                    .platform_blocks
                    .get_mut(&from)
                    .ok_or_else(|| missing(from, source))?;
                bytes.copy_within(..len, 0);
                Ok(())
            }
            (BlockOrigin::Platform { id: from }, BlockOrigin::Platform { id: to }) => {
                // Take the source out of the map so both buffers can be
                // borrowed at once; the box moves, its bytes do not.
                let staged = self
                    .platform_blocks
                    .remove(&from)
                    .ok_or_else(|| missing(from, source))?;
                let outcome = match self.platform_blocks.get_mut(&to) {
                    Some(bytes) => {
                        platform::copy_memory(&mut bytes[..len], &staged[..len]);
                        Ok(())
                    }
                    None => Err(missing(to, dest)),
                };
                self.platform_blocks.insert(from, staged);
                outcome
            }
        }
    }

    /// Returns a printable per-tag usage report.
    #[must_use]
    pub fn usage_report(&self) -> UsageReport<'_> {
        UsageReport { stats: &self.stats }
    }

    /// Logs the per-tag usage report at info level.
    pub fn log_usage(&self) {
        tracing::info!(
            "memory usage: {} allocated in {} calls, {} free in arena",
            format_bytes(self.stats.total_allocated),
            self.allocation_count,
            format_bytes(self.free_space())
        );
        for tag in MemoryTag::ALL {
            tracing::info!("  {:<20}: {}", tag, format_bytes(self.stats.tagged(tag)));
        }
    }

    /// Shuts the system down and hands the backing region back to the host.
    ///
    /// Outstanding fallback allocations are returned to the platform here.
    #[must_use]
    pub fn shutdown(self) -> MemoryRegion {
        if self.settings.report_on_shutdown {
            self.log_usage();
        }
        if self.stats.total_allocated != 0 {
            tracing::debug!(
                "memory system shutting down with {} still allocated",
                format_bytes(self.stats.total_allocated)
            );
        }

        let Self {
            arena,
            platform_blocks,
            ..
        } = self;
        drop(platform_blocks);
        arena.destroy()
    }
}

impl fmt::Debug for MemorySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySystem")
            .field("settings", &self.settings)
            .field("stats", &self.stats)
            .field("allocation_count", &self.allocation_count)
            .field("free_space", &self.free_space())
            .field("platform_blocks", &self.platform_blocks.len())
            .finish()
    }
}

/// Per-tag usage report, one line per tag with binary-unit scaling.
pub struct UsageReport<'a> {
    stats: &'a MemoryStats,
}

impl fmt::Display for UsageReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tag in MemoryTag::ALL {
            writeln!(f, "  {:<20}: {}", tag, format_bytes(self.stats.tagged(tag)))?;
        }
        Ok(())
    }
}

fn warn_unknown(tag: MemoryTag, operation: &str) {
    if tag == MemoryTag::Unknown {
        tracing::warn!("{} called using MemoryTag::Unknown", operation);
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn slice_len(size: u64) -> usize {
    // Only used for sizes already bounded by a live block.
    size as usize
}

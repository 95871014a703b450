//! # Memory Error Types
//!
//! All errors that can occur in the allocation layer.

use thiserror::Error;

/// Errors that can occur in the memory system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// No free range is large enough for the request.
    #[error("out of space: requested {requested}B, available {available}B")]
    OutOfSpace {
        /// Bytes requested.
        requested: u64,
        /// Total free bytes across all ranges.
        available: u64,
    },

    /// A zero-byte size was passed where a real size is required.
    #[error("size must be greater than zero")]
    ZeroSize,

    /// Every node slot of the free list is in use.
    #[error("free-list node pool exhausted (capacity {capacity})")]
    NodePoolExhausted {
        /// Number of node slots in the pool.
        capacity: u64,
    },

    /// The range to free could not be placed in the free list.
    #[error("block not found: offset {offset}, size {size}")]
    BlockNotFound {
        /// Offset of the block.
        offset: u64,
        /// Size of the block.
        size: u64,
    },

    /// The range does not belong to this allocator.
    #[error("block not owned by this allocator: offset {offset}, size {size}")]
    NotOwned {
        /// Offset of the block.
        offset: u64,
        /// Size of the block.
        size: u64,
    },

    /// A caller-supplied memory region is smaller than the queried requirement.
    #[error("memory region too small: required {required}B, provided {provided}B")]
    RegionTooSmall {
        /// Bytes required.
        required: u64,
        /// Bytes provided.
        provided: u64,
    },

    /// Element index past the end of a collection.
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// Requested index.
        index: u64,
        /// Current length.
        length: u64,
    },

    /// The platform layer could not provide memory.
    #[error("platform allocation of {size}B failed")]
    PlatformAllocationFailed {
        /// Bytes requested from the platform.
        size: u64,
    },

    /// A resize asked for less memory than is currently managed.
    #[error("resize cannot shrink: current {current}B, requested {requested}B")]
    ResizeShrinks {
        /// Current total size.
        current: u64,
        /// Requested total size.
        requested: u64,
    },

    /// Invalid settings.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Settings file could not be read.
    #[error("io error: {0}")]
    Io(String),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

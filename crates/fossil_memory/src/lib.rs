//! # FOSSIL Memory
//!
//! The allocation layer every FOSSIL subsystem sits on:
//! - One large region, obtained from the platform once at startup
//! - A coalescing free list carving that region into blocks
//! - A tag-accounted front end that tracks who uses how much
//! - A growable array and a fixed-slot hashtable on top
//!
//! ## Architecture Rules
//!
//! 1. **Query, then commit** - Every component first reports how many bytes
//!    it needs, then is built inside memory of exactly that size
//! 2. **One arena** - Nothing goes back to the OS until shutdown
//! 3. **Every allocation is tagged** - `MemoryTag::Unknown` works, but
//!    complains
//! 4. **Single-threaded** - The memory system is `!Send`; it is passed by
//!    reference, never shared
//!
//! ## Example
//!
//! ```rust,ignore
//! use fossil_memory::{GrowableArray, MemorySystem, MemorySystemSettings, MemoryTag};
//!
//! let mut memory = MemorySystem::init(MemorySystemSettings::default())?;
//!
//! let mut extensions: GrowableArray<u32> = GrowableArray::create(&mut memory)?;
//! extensions.push(&mut memory, 42)?;
//!
//! memory.log_usage();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arena;
pub mod error;
pub mod freelist;
pub mod growable;
pub mod hashtable;
pub mod platform;
pub mod region;
pub mod settings;
pub mod system;
pub mod tag;
pub mod units;

pub use arena::Arena;
pub use error::{MemoryError, MemoryResult};
pub use freelist::{FreeList, FreeRange};
pub use growable::GrowableArray;
pub use hashtable::Hashtable;
pub use region::MemoryRegion;
pub use settings::MemorySystemSettings;
pub use system::{Block, BlockOrigin, MemoryStats, MemorySystem, UsageReport};
pub use tag::MemoryTag;
pub use units::{format_bytes, gibibytes, kibibytes, mebibytes};

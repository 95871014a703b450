//! # Memory Tags
//!
//! Closed set of categories attached to every allocation for byte
//! accounting. Tags never route memory to different pools.

use std::fmt;

/// Category label for an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MemoryTag {
    /// Uncategorised. Legal, but every use is logged as a warning.
    Unknown = 0,
    /// Fixed-size arrays.
    Array = 1,
    /// Growable array buffers.
    GrowableArray = 2,
    /// String storage.
    String = 3,
    /// Application-level state.
    Application = 4,
    /// Texture data.
    Texture = 5,
    /// Memory owned by sub-allocators.
    Allocators = 6,
    /// Raw file contents.
    FileData = 7,
    /// Renderer state.
    Renderer = 8,
    /// Loaded resources.
    Resource = 9,
}

impl MemoryTag {
    /// Number of tags.
    pub const COUNT: usize = 10;

    /// Every tag in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Unknown,
        Self::Array,
        Self::GrowableArray,
        Self::String,
        Self::Application,
        Self::Texture,
        Self::Allocators,
        Self::FileData,
        Self::Renderer,
        Self::Resource,
    ];

    /// Index of this tag into per-tag tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Upper-case name used in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Array => "ARRAY",
            Self::GrowableArray => "GROWABLE_ARRAY",
            Self::String => "STRING",
            Self::Application => "APPLICATION",
            Self::Texture => "TEXTURE",
            Self::Allocators => "ALLOCATORS",
            Self::FileData => "FILE_DATA",
            Self::Renderer => "RENDERER",
            Self::Resource => "RESOURCE",
        }
    }
}

impl fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_match_table_order() {
        for (position, tag) in MemoryTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), position);
        }
    }

    #[test]
    fn test_display_pads() {
        assert_eq!(format!("{:<8}|", MemoryTag::Array), "ARRAY   |");
        assert_eq!(MemoryTag::FileData.to_string(), "FILE_DATA");
    }
}

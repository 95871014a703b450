//! # Memory System Settings
//!
//! Loaded once at startup, either built in code or read from a TOML file:
//!
//! ```toml
//! total_size = 268435456
//! report_on_shutdown = true
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{MemoryError, MemoryResult};
use crate::units::gibibytes;

/// Settings for [`MemorySystem`](crate::MemorySystem).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemorySystemSettings {
    /// Usable bytes in the arena.
    pub total_size: u64,
    /// Log the per-tag usage report when the system shuts down.
    pub report_on_shutdown: bool,
}

/// A 1 GiB arena. The free-list node pool adds four bytes of metadata per
/// managed byte, so [`MemorySystem::memory_requirement`](crate::MemorySystem::memory_requirement)
/// asks the platform for 5 GiB in total with these settings. Development
/// runs should set a smaller `total_size`.
impl Default for MemorySystemSettings {
    fn default() -> Self {
        Self {
            total_size: gibibytes(1),
            report_on_shutdown: false,
        }
    }
}

impl MemorySystemSettings {
    /// Settings with `total_size` usable bytes and defaults otherwise.
    #[must_use]
    pub const fn with_total_size(total_size: u64) -> Self {
        Self {
            total_size,
            report_on_shutdown: false,
        }
    }

    /// Parses settings from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] on malformed or invalid input.
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|err| MemoryError::InvalidConfig(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::Io`] if the file cannot be read
    /// - [`MemoryError::InvalidConfig`] on malformed or invalid input
    pub fn from_file(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| MemoryError::Io(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks the settings for values the memory system cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if `total_size` is zero.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.total_size == 0 {
            return Err(MemoryError::InvalidConfig(
                "total_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

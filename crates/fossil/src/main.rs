//! # FOSSIL Host
//!
//! Boots the memory layer the way the engine does at startup:
//!
//! 1. Ask the memory system how many bytes it needs
//! 2. Get exactly that many bytes from the platform, once
//! 3. Build the memory system inside them
//! 4. Run the subsystems, report usage, shut down
//! 5. Give the block back to the platform in one call
//!
//! With no settings file the default 1 GiB arena is used, which needs 5 GiB
//! from the platform once the free-list node pool is included.
//!
//! ```bash
//! # Default settings (1 GiB arena, 5 GiB requested)
//! ./fossil_host
//!
//! # Settings file
//! RUST_LOG=debug ./fossil_host crates/fossil/memory.toml
//! ```

use std::process::ExitCode;

use fossil_memory::{
    format_bytes, platform, GrowableArray, Hashtable, MemoryResult, MemorySystem,
    MemorySystemSettings, MemoryTag,
};
use tracing_subscriber::EnvFilter;

/// Marks an unused hashtable slot or resource id.
const INVALID_ID: u32 = u32::MAX;

/// Slots in the shader name lookup table.
const SHADER_LOOKUP_SLOTS: u32 = 1024;

/// Shaders registered by the workload.
const BUILTIN_SHADERS: [&str; 3] = ["builtin.material", "builtin.ui", "builtin.skybox"];

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_settings() -> MemoryResult<MemorySystemSettings> {
    match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!("loading memory settings from {}", path);
            MemorySystemSettings::from_file(path)
        }
        None => Ok(MemorySystemSettings::default()),
    }
}

/// The subsystem startup sequence, reduced to its memory traffic.
fn run_workload(memory: &mut MemorySystem) -> MemoryResult<()> {
    // Required renderer extensions, collected one by one.
    let mut extensions: GrowableArray<u32> = GrowableArray::create(memory)?;
    for id in 0..12 {
        extensions.push(memory, id)?;
    }
    tracing::info!(
        "{} renderer extensions requested (capacity {})",
        extensions.len(),
        extensions.capacity()
    );

    // Shader name -> id lookup.
    let block = memory.allocate(
        Hashtable::<u32>::memory_requirement(SHADER_LOOKUP_SLOTS),
        MemoryTag::Renderer,
    )?;
    let lookup: Hashtable<u32> = Hashtable::create(memory, SHADER_LOOKUP_SLOTS, block)?;
    lookup.fill(memory, INVALID_ID)?;
    for (id, name) in (0u32..).zip(BUILTIN_SHADERS) {
        lookup.set(memory, name, id)?;
    }
    for name in BUILTIN_SHADERS {
        tracing::debug!("shader {} -> id {}", name, lookup.get(memory, name)?);
    }

    // Scratch file contents, larger than a typical block.
    let file = memory.allocate(64 * 1024, MemoryTag::FileData)?;
    memory.set(&file, b' ')?;

    memory.log_usage();

    memory.free(file, 64 * 1024, MemoryTag::FileData)?;
    let block = lookup.destroy();
    memory.free(block, block.len(), MemoryTag::Renderer)?;
    extensions.destroy(memory)?;
    Ok(())
}

fn main() -> ExitCode {
    init_logging();

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!("invalid memory settings: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let required = MemorySystem::memory_requirement(&settings);
    tracing::info!(
        "memory system needs {} to manage {}",
        format_bytes(required),
        format_bytes(settings.total_size)
    );

    let region = match platform::allocate_region(required) {
        Ok(region) => region,
        Err(err) => {
            tracing::error!("failed to obtain the memory block: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut memory = match MemorySystem::with_region(settings, region) {
        Ok(memory) => memory,
        Err(err) => {
            tracing::error!("failed to initialise the memory system: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run_workload(&mut memory);
    if let Err(err) = &outcome {
        tracing::error!("workload failed: {}", err);
    }

    platform::release_region(memory.shutdown());
    tracing::info!("memory released");

    if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

//! Integration tests for the growable array and the fixed-slot hashtable
//! running on a shared memory system.

use fossil_memory::{
    GrowableArray, Hashtable, MemoryError, MemorySystem, MemorySystemSettings, MemoryTag,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const INVALID_ID: u32 = u32::MAX;

fn memory(total_size: u64) -> MemorySystem {
    MemorySystem::init(MemorySystemSettings::with_total_size(total_size)).unwrap()
}

#[test]
fn test_growable_array_matches_vec_model() {
    let mut memory = memory(256 * 1024);
    let mut rng = StdRng::seed_from_u64(7);
    let mut array: GrowableArray<u64> = GrowableArray::create(&mut memory).unwrap();
    let mut model: Vec<u64> = Vec::new();

    for step in 0..2_000u64 {
        let capacity = array.capacity();
        match rng.gen_range(0..5) {
            0 | 1 => {
                array.push(&mut memory, step).unwrap();
                model.push(step);
            }
            2 => {
                assert_eq!(array.pop(&memory).unwrap(), model.pop());
            }
            3 if !model.is_empty() => {
                let index = rng.gen_range(0..model.len());
                array.insert_at(&mut memory, index as u64, step).unwrap();
                model.insert(index, step);
            }
            4 if !model.is_empty() => {
                let index = rng.gen_range(0..model.len());
                assert_eq!(
                    array.pop_at(&mut memory, index as u64).unwrap(),
                    model.remove(index)
                );
            }
            _ => {}
        }

        assert!(array.capacity() >= capacity, "capacity shrank without shrink()");
        assert!(array.len() <= array.capacity());
        assert_eq!(array.len(), model.len() as u64);
    }
    assert_eq!(array.to_vec(&memory).unwrap(), model);

    array.shrink(&mut memory).unwrap();
    assert_eq!(array.capacity(), (model.len() as u64).max(1));
    assert_eq!(array.to_vec(&memory).unwrap(), model);

    array.destroy(&mut memory).unwrap();
    assert_eq!(memory.stats().tagged(MemoryTag::GrowableArray), 0);
    assert_eq!(memory.free_space(), 256 * 1024);
}

#[test]
fn test_out_of_range_edits_leave_array_untouched() {
    let mut memory = memory(4096);
    let mut array: GrowableArray<u32> = GrowableArray::create(&mut memory).unwrap();
    for value in [5, 6, 7] {
        array.push(&mut memory, value).unwrap();
    }

    assert!(matches!(
        array.insert_at(&mut memory, 3, 0),
        Err(MemoryError::IndexOutOfBounds { index: 3, length: 3 })
    ));
    assert!(matches!(
        array.pop_at(&mut memory, 10),
        Err(MemoryError::IndexOutOfBounds { index: 10, length: 3 })
    ));
    assert!(array.get(&memory, 3).is_err());
    assert_eq!(array.to_vec(&memory).unwrap(), vec![5, 6, 7]);
}

#[test]
fn test_arrays_grow_past_the_arena_onto_the_platform() {
    let mut memory = memory(64);
    let mut array: GrowableArray<u64> = GrowableArray::create(&mut memory).unwrap();
    for value in 0..32 {
        array.push(&mut memory, value).unwrap();
    }

    assert!(!array.block().is_arena());
    assert_eq!(array.to_vec(&memory).unwrap(), (0..32).collect::<Vec<_>>());

    array.destroy(&mut memory).unwrap();
    assert_eq!(memory.platform_block_count(), 0);
    assert_eq!(memory.stats().total_allocated(), 0);
}

#[test]
fn test_shader_lookup_table() {
    let mut memory = memory(64 * 1024);
    let slots = 1024;
    let block = memory
        .allocate(Hashtable::<u32>::memory_requirement(slots), MemoryTag::Renderer)
        .unwrap();
    let lookup: Hashtable<u32> = Hashtable::create(&mut memory, slots, block).unwrap();
    lookup.fill(&mut memory, INVALID_ID).unwrap();

    let names = ["builtin.material", "builtin.ui", "builtin.skybox"];
    let mut seen = Vec::new();
    for name in names {
        let slot = lookup.slot_of(name);
        assert!(slot < u64::from(slots));
        assert!(!seen.contains(&slot), "{name} collided");
        seen.push(slot);
        assert_eq!(lookup.get(&memory, name).unwrap(), INVALID_ID);
    }

    for (id, name) in (0u32..).zip(names) {
        lookup.set(&mut memory, name, id).unwrap();
    }
    for (id, name) in (0u32..).zip(names) {
        assert_eq!(lookup.get(&memory, name).unwrap(), id);
    }

    lookup.clear(&mut memory, "builtin.ui").unwrap();
    assert_eq!(lookup.get(&memory, "builtin.ui").unwrap(), 0);

    let block = lookup.destroy();
    memory.free(block, block.len(), MemoryTag::Renderer).unwrap();
    assert_eq!(memory.stats().tagged(MemoryTag::Renderer), 0);
}

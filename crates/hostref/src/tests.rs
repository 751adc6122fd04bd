use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::Error;
use crate::Handle;
use crate::HandleTable;
use crate::Result;
use crate::MIN_CAPACITY;

type R<T> = Result<T>;

// ============================================================================
//  ISSUING
// ============================================================================

#[test]
fn test_sequential_handles_increase_and_skip_null() {
    let mut table = HandleTable::new();
    let handles: Vec<Handle> = (0..100).map(|i| table.register(i)).collect();

    assert!(handles.iter().all(|h| !h.is_null()));
    assert!(handles.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(handles[0], Handle(1));
    assert_eq!(table.len(), 100);
}

#[test]
fn test_growth_keeps_earlier_handles() -> R<()> {
    let mut table = HandleTable::new();
    let handles: Vec<(Handle, String)> = (0..MIN_CAPACITY * 4 + 3)
        .map(|i| {
            let value = format!("value-{}", i);
            (table.register(value.clone()), value)
        })
        .collect();

    assert!(table.capacity() >= handles.len());
    for (handle, value) in &handles {
        assert_eq!(table.get(*handle)?, value);
    }
    Ok(())
}

#[test]
fn test_capacity_doubles() {
    let mut table = HandleTable::new();
    assert_eq!(table.capacity(), MIN_CAPACITY);

    for i in 0..MIN_CAPACITY {
        table.register(i);
    }
    assert_eq!(table.capacity(), MIN_CAPACITY);

    table.register(MIN_CAPACITY);
    assert_eq!(table.capacity(), MIN_CAPACITY * 2);
}

#[test]
fn test_zero_capacity_table_grows() -> R<()> {
    let mut table = HandleTable::with_capacity(0);
    let h = table.register("x");
    assert_eq!(table.capacity(), MIN_CAPACITY);
    assert_eq!(*table.get(h)?, "x");
    Ok(())
}

// ============================================================================
//  RELEASE & REUSE
// ============================================================================

#[test]
fn test_free_then_register_reuses_slot() -> R<()> {
    let mut table = HandleTable::new();
    let a = table.register("a");
    let b = table.register("b");
    let _c = table.register("c");

    assert_eq!(table.free(b)?, "b");
    let d = table.register("d");

    assert_eq!(d.slot(), b.slot());
    assert_eq!(*table.get(d)?, "d");
    assert_eq!(*table.get(a)?, "a");
    Ok(())
}

#[test]
fn test_reuse_is_lifo() -> R<()> {
    let mut table = HandleTable::new();
    let handles: Vec<Handle> = (0..5).map(|i| table.register(i)).collect();

    table.free(handles[1])?;
    table.free(handles[3])?;

    assert_eq!(table.register(10), handles[3]);
    assert_eq!(table.register(11), handles[1]);
    assert_eq!(table.register(12), Handle(6));
    Ok(())
}

#[test]
fn test_capacity_never_shrinks() -> R<()> {
    let mut table = HandleTable::new();
    let handles: Vec<Handle> = (0..40).map(|i| table.register(i)).collect();
    let grown = table.capacity();

    for h in handles {
        table.free(h)?;
    }

    assert!(table.is_empty());
    assert_eq!(table.capacity(), grown);
    Ok(())
}

// ============================================================================
//  FAULTS
// ============================================================================

#[test]
fn test_null_handle_is_rejected() {
    let mut table: HandleTable<u8> = HandleTable::new();
    assert_eq!(table.get(Handle::NULL).err(), Some(Error::Null));
    assert_eq!(table.set(Handle::NULL, 1).err(), Some(Error::Null));
}

#[test]
fn test_never_issued_handle_is_out_of_range() {
    let mut table = HandleTable::new();
    table.register(1u8);

    // Inside the allocated capacity, but never handed out.
    let err = table.get(Handle(5)).unwrap_err();
    assert_eq!(err, Error::OutOfRange { handle: Handle(5), issued: 1 });
}

#[test]
fn test_double_free_is_detected() -> R<()> {
    let mut table = HandleTable::new();
    let h = table.register(7u32);
    table.free(h)?;

    assert_eq!(table.free(h).err(), Some(Error::Vacant(h)));

    // The free-list must hold the slot exactly once.
    let first = table.register(1);
    let second = table.register(2);
    assert_eq!(first, h);
    assert_ne!(second, h);
    Ok(())
}

#[test]
fn test_set_on_released_handle_fails() -> R<()> {
    let mut table = HandleTable::new();
    let h = table.register(1u32);
    table.free(h)?;
    assert_eq!(table.set(h, 2).err(), Some(Error::Vacant(h)));
    Ok(())
}

#[test]
fn test_set_and_replace_mutate_in_place() -> R<()> {
    let mut table = HandleTable::new();
    let h = table.register(String::from("0"));

    table.set(h, String::from("11"))?;
    assert_eq!(table.get(h)?, "11");

    let old = table.replace(h, String::from("0"))?;
    assert_eq!(old, "11");
    assert_eq!(table.get(h)?, "0");
    assert_eq!(table.len(), 1);
    Ok(())
}

#[test]
fn test_iter_skips_released_slots() -> R<()> {
    let mut table = HandleTable::new();
    let a = table.register('a');
    let b = table.register('b');
    let c = table.register('c');
    table.free(b)?;

    let live: Vec<(Handle, char)> = table.iter().map(|(h, v)| (h, *v)).collect();
    assert_eq!(live, vec![(a, 'a'), (c, 'c')]);
    Ok(())
}

// ============================================================================
//  MODEL CHECK
// ============================================================================

#[test]
fn test_random_operations_match_model() -> R<()> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut table = HandleTable::new();
    let mut model: HashMap<Handle, u64> = HashMap::new();
    let mut released: Vec<Handle> = Vec::new();
    let mut capacity = table.capacity();

    for step in 0..5_000u64 {
        let live: Vec<Handle> = model.keys().copied().collect();
        match rng.gen_range(0..10) {
            0..=4 => {
                let h = table.register(step);
                assert!(!h.is_null());
                assert!(!model.contains_key(&h), "handle {} issued twice", h);
                if let Some(expected) = released.pop() {
                    assert_eq!(h, expected, "reuse must be LIFO");
                }
                model.insert(h, step);
            }
            5..=7 if !live.is_empty() => {
                let h = live[rng.gen_range(0..live.len())];
                assert_eq!(table.free(h)?, model.remove(&h).unwrap_or_default());
                released.push(h);
            }
            8 if !live.is_empty() => {
                let h = live[rng.gen_range(0..live.len())];
                table.set(h, step)?;
                model.insert(h, step);
            }
            _ => {}
        }

        assert!(table.capacity() >= capacity);
        capacity = table.capacity();
        assert_eq!(table.len(), model.len());
    }

    for (h, value) in &model {
        assert_eq!(table.get(*h)?, value);
    }
    Ok(())
}

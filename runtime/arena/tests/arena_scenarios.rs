//! End-to-end arena scenarios
//!
//! These tests pin down the observable contract of the pools:
//! - full-pool exhaustion and what `free` gives back under each policy
//! - kernel/device translation round trips across a whole window

use copro_arena::*;

const MIB: usize = 1024 * 1024;
const KIB: usize = 1024;

fn one_mib_pool(policy: AllocPolicy) -> (Arena, PoolHandle) {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Arena::new(policy);
    let pool = arena
        .init_pool("DMA_TAAISP", BackingRegion::new(0x4000_0000, 0xE000_0000, MIB), PAGE_SIZE)
        .expect("Failed to bind pool");
    (arena, pool)
}

/// Four quarter-pool buffers fill a 1 MiB pool exactly; with the bump policy
/// freeing the first one does not make room for another.
#[test]
fn test_bump_pool_is_non_reclaiming() {
    let (arena, pool) = one_mib_pool(AllocPolicy::Bump);

    let buffers: Vec<Allocation> = (0..4)
        .map(|_| arena.allocate(pool, 256 * KIB).expect("quarter allocation"))
        .collect();

    for buffer in &buffers {
        assert!(buffer.kernel_addr >= 0x4000_0000);
        assert!(buffer.kernel_addr < 0x4000_0000 + MIB);
    }

    assert!(matches!(arena.allocate(pool, 1), Err(ArenaError::OutOfMemory { .. })));

    arena.free(pool, buffers[0].kernel_addr).expect("free first");
    assert!(matches!(
        arena.allocate(pool, 256 * KIB),
        Err(ArenaError::OutOfMemory { .. })
    ));

    let stats = arena.stats(pool).unwrap();
    assert_eq!(stats.used, 3 * 256 * KIB);
    assert_eq!(stats.end, MIB);
}

/// The same sequence under the free-list policy reuses the released quarter.
#[test]
fn test_free_list_pool_reclaims() {
    let (arena, pool) = one_mib_pool(AllocPolicy::FreeList);

    let buffers: Vec<Allocation> = (0..4)
        .map(|_| arena.allocate(pool, 256 * KIB).expect("quarter allocation"))
        .collect();
    assert!(arena.allocate(pool, 1).is_err());

    arena.free(pool, buffers[0].kernel_addr).expect("free first");
    let reused = arena.allocate(pool, 256 * KIB).expect("reuse released quarter");

    assert_eq!(reused.kernel_addr, buffers[0].kernel_addr);
    assert_eq!(reused.device_addr, buffers[0].device_addr);
}

/// Every allocation translates to the device and back to itself, and the
/// first byte past the window is rejected in both directions.
#[test]
fn test_translation_round_trip() {
    let (arena, pool) = one_mib_pool(AllocPolicy::Bump);

    let mut sizes = vec![1, 4095, 4096, 10_000, 64 * KIB, 3];
    while let Some(size) = sizes.pop() {
        let buffer = arena.allocate(pool, size).expect("allocation");

        let dva = arena.translate_to_device(pool, buffer.kernel_addr).unwrap();
        assert_eq!(dva, buffer.device_addr);
        assert_eq!(arena.translate_to_kernel(pool, dva).unwrap(), buffer.kernel_addr);

        let last = buffer.kernel_addr + buffer.size - 1;
        let last_dva = arena.translate_to_device(pool, last).unwrap();
        assert_eq!(arena.translate_to_kernel(pool, last_dva).unwrap(), last);
    }

    assert!(matches!(
        arena.translate_to_device(pool, 0x4000_0000 + MIB),
        Err(ArenaError::OutOfRange { .. })
    ));
    assert!(matches!(
        arena.translate_to_kernel(pool, 0xE000_0000 + MIB as u64),
        Err(ArenaError::OutOfRange { .. })
    ));
}

/// Racing binds of one name all land on the same pool
#[test]
fn test_concurrent_init_pool_binds_name_once() {
    use std::sync::Barrier;
    use std::thread;

    let _ = env_logger::builder().is_test(true).try_init();
    let arena = Arena::new(AllocPolicy::Bump);
    let barrier = Barrier::new(8);

    let handles: Vec<PoolHandle> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let arena = &arena;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    arena
                        .init_pool("DMA_VRA", BackingRegion::new(0x5000_0000 + i * MIB, 0xB000_0000, MIB), PAGE_SIZE)
                        .unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(handles.iter().all(|&h| h == handles[0]));
    assert_eq!(arena.pool_by_name("DMA_VRA"), Some(handles[0]));

    // A second name gets a distinct pool and the first stays unique
    let other = arena
        .init_pool("DMA_TNR", BackingRegion::new(0x7000_0000, 0xC000_0000, MIB), PAGE_SIZE)
        .unwrap();
    assert_ne!(other, handles[0]);
    arena.allocate(handles[0], KIB).unwrap();
    assert_eq!(arena.report_leaks(), 1);
}

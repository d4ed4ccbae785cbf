use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use copro_arena::{AllocPolicy, Arena, BackingRegion};

fn bench_policy(c: &mut Criterion, name: &str, policy: AllocPolicy) {
    let arena = Arena::new(policy);
    let pool = arena
        .init_pool("BENCH", BackingRegion::new(0x1000_0000, 0x1000_0000, 64 * 1024 * 1024), 64)
        .unwrap();

    c.bench_function(name, |b| {
        b.iter(|| {
            let buffer = arena.allocate(pool, black_box(4096)).unwrap();
            arena.free(pool, buffer.kernel_addr).unwrap();
            if policy == AllocPolicy::Bump && arena.stats(pool).unwrap().end > 60 * 1024 * 1024 {
                arena
                    .init_pool("BENCH", BackingRegion::new(0x1000_0000, 0x1000_0000, 64 * 1024 * 1024), 64)
                    .unwrap();
            }
        })
    });
}

fn bench_alloc_free(c: &mut Criterion) {
    bench_policy(c, "arena_bump_alloc_free_4k", AllocPolicy::Bump);
    bench_policy(c, "arena_free_list_alloc_free_4k", AllocPolicy::FreeList);
}

criterion_group!(benches, bench_alloc_free);
criterion_main!(benches);

//! Benchmarks for the entity cache.

use std::collections::HashSet;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use entity_cache::cache::evictor::{EvictionCandidate, Evictor};
use entity_cache::cache::{EntityCache, EntityKind, ImageFrame, LoadHandle, Resolved};

fn bench_victim_selection(c: &mut Criterion) {
    let evictor = Evictor::new();

    // 10,000 resident 256KB frames in shuffled recency order.
    let candidates: Vec<EvictionCandidate> = (0..10_000u64)
        .map(|i| EvictionCandidate {
            id: format!("frame-{i}"),
            size_in_bytes: 256 * 1024,
            last_accessed: (i * 7919) % 10_000,
        })
        .collect();
    let related: HashSet<String> = (0..500).map(|i| format!("frame-{i}")).collect();

    c.bench_function("evict_select_100_from_10k", |b| {
        b.iter(|| {
            let plan = evictor.select_victims(black_box(candidates.clone()), 100 * 256 * 1024, &related);
            black_box(plan);
        })
    });
}

fn bench_put_resolve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    // Room for 64 frames: steady state evicts one frame per insert.
    let cache = rt.block_on(async { EntityCache::with_max_budget(64 * 4096).unwrap() });
    let pixels = Bytes::from(vec![0u8; 4096]);
    let mut next = 0u64;

    c.bench_function("put_resolve_4kb_frame", |b| {
        b.iter(|| {
            next += 1;
            let id = format!("frame-{next}");
            rt.block_on(async {
                let (completer, handle) = LoadHandle::image_channel();
                let shared = cache.put(id, handle).unwrap();
                completer.resolve(Resolved::new(4096, ImageFrame::new(64, 64, 1, 8, pixels.clone())));
                black_box(shared.await.unwrap());
            });
        })
    });

    c.bench_function("get_resident_frame", |b| {
        let id = format!("frame-{next}");
        b.iter(|| black_box(cache.get_resolved(EntityKind::Image, black_box(&id))));
    });
}

criterion_group!(benches, bench_victim_selection, bench_put_resolve);
criterion_main!(benches);

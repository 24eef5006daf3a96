//! Store benchmarks
//!
//! Measures cached reads, write propagation through chains of derived atoms,
//! and fan-out to many subscribers.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use atomstore_core::{atom, derived, Atom, PrimitiveAtom, Store, Subscription};

fn chain(depth: usize) -> (PrimitiveAtom<u64>, Atom<u64>) {
    let base = atom(0u64);
    let mut tip: Atom<u64> = base.as_atom().clone();
    for _ in 0..depth {
        let previous = tip.clone();
        tip = derived(move |get| Ok(get.get(&previous)? + 1));
    }
    (base, tip)
}

fn bench_cached_read(c: &mut Criterion) {
    let store = Store::new();
    let (_base, tip) = chain(32);
    store.get(&tip).unwrap();

    c.bench_function("cached_read_depth_32", |b| {
        b.iter(|| black_box(store.get(&tip).unwrap()))
    });
}

fn bench_chain_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("mounted_chain_write");
    for depth in [4usize, 32, 256] {
        let store = Store::new();
        let (base, tip) = chain(depth);
        let _sub = store.subscribe(&tip, || {}).unwrap();
        let mut next = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                next += 1;
                store.set(&base, next).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out_write");
    for width in [16usize, 256] {
        let store = Store::new();
        let base = atom(0u64);
        let subscriptions: Vec<Subscription> = (0..width)
            .map(|offset| {
                let base = base.clone();
                let view = derived(move |get| Ok(get.get(&base)? + offset as u64));
                store.subscribe(&view, || {}).unwrap()
            })
            .collect();
        let mut next = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                store.set(&base, next).unwrap();
            })
        });
        drop(subscriptions);
    }
    group.finish();
}

criterion_group!(benches, bench_cached_read, bench_chain_propagation, bench_fan_out);
criterion_main!(benches);

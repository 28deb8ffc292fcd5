use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use core_sched::PairingHeap;
use rand::{Rng, SeedableRng, rngs::StdRng};

fn insert_pop(c: &mut Criterion) {
    c.bench_function("insert_pop_4096", |b| {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let keys: Vec<f64> = (0..4096).map(|_| rng.gen_range(0.0..1.0e6)).collect();

        b.iter(|| {
            let mut heap = PairingHeap::with_capacity(4096);
            for (i, &tn) in keys.iter().enumerate() {
                heap.alloc(tn, i as u32);
            }
            while !heap.is_empty() {
                let h = heap.pop();
                black_box(heap.tn(h));
                heap.destroy(h);
            }
        });
    });
}

fn decrease_storm(c: &mut Criterion) {
    c.bench_function("decrease_storm_4096", |b| {
        let mut rng = StdRng::seed_from_u64(0xdeca);
        let keys: Vec<f64> = (0..4096).map(|_| rng.gen_range(1.0e3..1.0e6)).collect();

        b.iter(|| {
            let mut heap = PairingHeap::with_capacity(4096);
            let handles: Vec<_> = keys
                .iter()
                .enumerate()
                .map(|(i, &tn)| heap.alloc(tn, i as u32))
                .collect();

            // Event-driven workloads mostly lower keys; emulate that.
            for (round, &h) in handles.iter().enumerate() {
                let lowered = keys[round] * 0.5;
                heap.decrease(lowered, h);
            }
            black_box(heap.top_tn());
        });
    });
}

fn reintegrate_cycle(c: &mut Criterion) {
    c.bench_function("pop_reintegrate_4096", |b| {
        let mut rng = StdRng::seed_from_u64(0xc1c1e);
        let keys: Vec<f64> = (0..4096).map(|_| rng.gen_range(0.0..1.0e3)).collect();

        b.iter(|| {
            let mut heap = PairingHeap::with_capacity(4096);
            for (i, &tn) in keys.iter().enumerate() {
                heap.alloc(tn, i as u32);
            }

            // One simulated "step": drain the tied top, push everything back
            // later in time, the scheduler's steady-state pattern.
            for _ in 0..4096 {
                let h = heap.pop();
                let tn = heap.tn(h);
                heap.reintegrate(tn + 1.0, h);
            }
            black_box(heap.len());
        });
    });
}

criterion_group!(benches, insert_pop, decrease_storm, reintegrate_cycle);
criterion_main!(benches);

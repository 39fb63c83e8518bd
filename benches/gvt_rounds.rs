//! Benchmarks how quickly a round of [`tempus::gvt::GvtManager`] closes as
//! the number of in-flight cross-worker sends contending on the same pair
//! of atomics grows. No teacher counterpart measures this directly — MUSE's
//! GVT token circulates over MPI ranks, not shared atomics — so this is
//! grounded purely in `gvt.rs`'s own `start_round`/`on_send`/`on_receive`/
//! `try_close_round` lifecycle.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempus::prelude::*;
use tempus::event::Color;

fn run_round(in_flight: usize) -> VTime {
    let gvt = GvtManager::new();
    let color = gvt.send_color();
    for _ in 0..in_flight {
        gvt.on_send(color);
    }
    gvt.start_round();
    for i in 0..in_flight {
        gvt.on_receive(color, i as u64);
    }
    gvt.try_close_round(&[in_flight as u64]).unwrap_or(0)
}

fn bench_round_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("gvt_round_closure");
    for in_flight in [0usize, 16, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::new("in_flight", in_flight), in_flight, |b, &in_flight| {
            b.iter(|| black_box(run_round(in_flight)));
        });
    }
    group.finish();
}

fn bench_send_receive_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("gvt_send_receive_pair");
    group.bench_function("on_send_then_on_receive", |b| {
        let gvt = GvtManager::new();
        let color = Color::White;
        b.iter(|| {
            gvt.on_send(color);
            black_box(gvt.on_receive(color, 0));
        });
    });
    group.finish();
}

criterion_group!(benches, bench_round_closure, bench_send_receive_pair);
criterion_main!(benches);

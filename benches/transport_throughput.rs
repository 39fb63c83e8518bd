//! Benchmarks the multi-worker path across the five intra-node transport
//! variants: how cross-worker delivery contention scales with the chosen
//! queue implementation (a conservative/optimistic hybrid engine is out of
//! scope here).

use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempus::prelude::*;

const NUM_PLANETS: usize = 7;
const AGENTS_PER_PLANET: usize = 16;
const TERMINAL: u64 = 20_000;

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Ball {
    hops: u32,
}

struct RingAgent {
    id: usize,
    total: usize,
}

impl Agent<Ball> for RingAgent {
    fn initialize(&mut self, ctx: &mut AgentContext<Ball>) {
        let _ = ctx.schedule((self.id + 1) % self.total, 1, Ball { hops: 0 });
    }

    fn execute_task(&mut self, ctx: &mut AgentContext<Ball>, batch: &[Event<Ball>]) -> Result<()> {
        for event in batch {
            ctx.schedule((self.id + 1) % self.total, 1, Ball { hops: event.payload.hops + 1 })?;
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &mut AgentContext<Ball>) {}
    fn snapshot(&self) -> Vec<u8> {
        Vec::new()
    }
    fn restore(&mut self, _bytes: &[u8]) {}
}

fn run_ring(transport: IntraVariant) -> RunSummary {
    let total = NUM_PLANETS * AGENTS_PER_PLANET;
    let mut config = SimConfig::new(NUM_PLANETS)
        .with_time_bounds(TERMINAL, 1.0)
        .with_throttle_horizon(64)
        .with_transport(transport, 4);
    for id in 0..total {
        config = config.assign_agent_to_worker(id / AGENTS_PER_PLANET).unwrap();
    }
    let mut manager = SimulationManager::<Ball>::new(config);
    for id in 0..total {
        manager = manager.place_agent(id / AGENTS_PER_PLANET, Box::new(RingAgent { id, total })).unwrap();
    }
    manager.run::<2048, 128>().unwrap()
}

fn bench_transport_variants(c: &mut Criterion) {
    let mut group = c.benchmark_group("transport_throughput");
    group.sample_size(10);
    for variant in [
        IntraVariant::SingleMutex,
        IntraVariant::SingleSpin,
        IntraVariant::ShardedMutex,
        IntraVariant::ShardedSpin,
        IntraVariant::LockFree,
    ] {
        group.bench_with_input(BenchmarkId::new("variant", format!("{variant:?}")), &variant, |b, &variant| {
            b.iter(|| black_box(run_ring(variant)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transport_variants);
criterion_main!(benches);

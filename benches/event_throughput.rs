use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempus::prelude::*;

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Tick(u64);

struct ThroughputAgent {
    id: usize,
}

impl Agent<Tick> for ThroughputAgent {
    fn initialize(&mut self, ctx: &mut AgentContext<Tick>) {
        let _ = ctx.schedule(self.id, 1, Tick(0));
    }

    fn execute_task(&mut self, ctx: &mut AgentContext<Tick>, batch: &[Event<Tick>]) -> Result<()> {
        for event in batch {
            ctx.schedule(self.id, 1, Tick(event.payload.0 + 1))?;
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &mut AgentContext<Tick>) {}
    fn snapshot(&self) -> Vec<u8> {
        Vec::new()
    }
    fn restore(&mut self, _bytes: &[u8]) {}
}

fn run_single_worker(num_agents: usize, terminal: u64) -> RunSummary {
    let mut config = SimConfig::new(1).with_time_bounds(terminal, 1.0).with_throttle_horizon(terminal);
    for _ in 0..num_agents {
        config = config.assign_agent_to_worker(0).unwrap();
    }
    let mut manager = SimulationManager::<Tick>::new(config);
    for id in 0..num_agents {
        manager = manager.place_agent(0, Box::new(ThroughputAgent { id })).unwrap();
    }
    manager.run::<2048, 128>().unwrap()
}

fn bench_event_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_throughput");
    for num_agents in [1, 10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("agents", num_agents), num_agents, |b, &num_agents| {
            b.iter(|| black_box(run_single_worker(num_agents, 1000)));
        });
    }
    group.finish();
}

fn bench_single_agent_long_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_agent_throughput");
    group.sample_size(10);
    for terminal in [10_000u64, 100_000, 1_000_000].iter() {
        group.bench_with_input(BenchmarkId::new("terminal", terminal), terminal, |b, &terminal| {
            b.iter(|| black_box(run_single_worker(1, terminal)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_event_throughput, bench_single_agent_long_run);
criterion_main!(benches);

//! Boundary behavior: a single worker running a single self-scheduling agent
//! never has anywhere to receive a cross-worker message from, so `rollback`
//! (only ever invoked from `worker.rs::drain_inbox`, which only sees
//! messages a *peer* worker sent) can never fire and no anti-message is ever
//! produced. This exercises that structurally, by running a lone agent to
//! completion and checking it ticked exactly as many times as a
//! straggler-free run implies.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tempus::prelude::*;

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Tick;

struct SelfTicker {
    ticks: Arc<AtomicU32>,
}

impl Agent<Tick> for SelfTicker {
    fn initialize(&mut self, ctx: &mut AgentContext<Tick>) {
        let _ = ctx.schedule(ctx.id, 1, Tick);
    }

    fn execute_task(&mut self, ctx: &mut AgentContext<Tick>, batch: &[Event<Tick>]) -> Result<()> {
        for _ in batch {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            if ctx.lvt + 1 < 20 {
                ctx.schedule(ctx.id, 1, Tick)?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &mut AgentContext<Tick>) {}
    fn snapshot(&self) -> Vec<u8> {
        Vec::new()
    }
    fn restore(&mut self, _bytes: &[u8]) {}
}

#[test]
fn single_worker_single_agent_never_rolls_back() {
    let ticks = Arc::new(AtomicU32::new(0));
    let config = SimConfig::new(1)
        .with_time_bounds(20, 1.0)
        .with_throttle_horizon(1000)
        .assign_agent_to_worker(0)
        .unwrap();

    let summary = SimulationManager::<Tick>::new(config)
        .place_agent(0, Box::new(SelfTicker { ticks: ticks.clone() }))
        .unwrap()
        .run::<64, 8>()
        .unwrap();

    // The agent reschedules itself every tick from t=1 through t=19.
    assert_eq!(ticks.load(Ordering::Relaxed), 19);
    assert_eq!(summary.worker_final_times, vec![20]);
    assert_eq!(summary.gvt, VTime::MAX);
}

#[test]
fn zero_chunk_redistribution_round_trips_cleanly() {
    // A run small enough that no worker ever accumulates enough recycled
    // capacity to redistribute still must report a well-formed, empty
    // recycler summary rather than erroring.
    let config = SimConfig::new(2)
        .with_time_bounds(5, 1.0)
        .with_throttle_horizon(50)
        .assign_agent_to_worker(0)
        .unwrap()
        .assign_agent_to_worker(1)
        .unwrap();

    let ticks = Arc::new(AtomicU32::new(0));
    let summary = SimulationManager::<Tick>::new(config)
        .place_agent(0, Box::new(SelfTicker { ticks: ticks.clone() }))
        .unwrap()
        .place_agent(1, Box::new(SelfTicker { ticks }))
        .unwrap()
        .run::<64, 8>()
        .unwrap();

    assert_eq!(summary.combined_recycler_stats.len(), 2);
    assert!(summary.combined_recycler_stats.iter().all(|s| s.allocated_bytes == 0));
}

//! End-to-end scenario: two agents on a single worker bounce one event back
//! and forth exactly once. Agent 0 schedules e1 (send=0, recv=1) to agent 1;
//! agent 1's `execute_task` schedules e2 (send=1, recv=2) back to agent 0,
//! which records the rally without scheduling further. With terminal=3 the
//! worker reaches the end with no stragglers, no rollback and no
//! anti-message possible: a single worker never sends an event through its
//! own inbox (see `worker.rs::route`), so `rollback` is never invoked.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tempus::prelude::*;

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Rally(u32);

struct Server {
    opponent: AgentId,
    rallies_seen: Arc<AtomicU32>,
}

impl Agent<Rally> for Server {
    fn initialize(&mut self, ctx: &mut AgentContext<Rally>) {
        let _ = ctx.schedule(self.opponent, 1, Rally(0));
    }

    fn execute_task(&mut self, _ctx: &mut AgentContext<Rally>, batch: &[Event<Rally>]) -> Result<()> {
        for event in batch {
            self.rallies_seen.fetch_add(1, Ordering::Relaxed);
            let _ = event;
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &mut AgentContext<Rally>) {}
    fn snapshot(&self) -> Vec<u8> {
        Vec::new()
    }
    fn restore(&mut self, _bytes: &[u8]) {}
}

struct Receiver {
    opponent: AgentId,
    rallies_seen: Arc<AtomicU32>,
}

impl Agent<Rally> for Receiver {
    fn initialize(&mut self, _ctx: &mut AgentContext<Rally>) {}

    fn execute_task(&mut self, ctx: &mut AgentContext<Rally>, batch: &[Event<Rally>]) -> Result<()> {
        for event in batch {
            self.rallies_seen.fetch_add(1, Ordering::Relaxed);
            ctx.schedule(self.opponent, 1, Rally(event.payload.0 + 1))?;
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &mut AgentContext<Rally>) {}
    fn snapshot(&self) -> Vec<u8> {
        Vec::new()
    }
    fn restore(&mut self, _bytes: &[u8]) {}
}

#[test]
fn ping_pong_two_agents_one_worker() {
    let rallies = Arc::new(AtomicU32::new(0));

    let config = SimConfig::new(1)
        .with_time_bounds(3, 1.0)
        .with_throttle_horizon(100)
        .assign_agent_to_worker(0)
        .unwrap()
        .assign_agent_to_worker(0)
        .unwrap();

    let summary = SimulationManager::<Rally>::new(config)
        .place_agent(0, Box::new(Server { opponent: 1, rallies_seen: rallies.clone() }))
        .unwrap()
        .place_agent(0, Box::new(Receiver { opponent: 0, rallies_seen: rallies.clone() }))
        .unwrap()
        .run::<64, 8>()
        .unwrap();

    // e1 delivered to agent 1 at t=1, e2 delivered back to agent 0 at t=2:
    // exactly two deliveries before the run reaches its terminal time of 3.
    assert_eq!(rallies.load(Ordering::Relaxed), 2);
    assert_eq!(summary.worker_final_times, vec![3]);
    // Clean shutdown: GVT reports the simulation-horizon sentinel.
    assert_eq!(summary.gvt, VTime::MAX);
}

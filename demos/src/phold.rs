//! PHOLD: the canonical PDES benchmark. A `side * side` torus of agents,
//! each holding `initial_events` self-addressed events at startup; every
//! event received fires one new event to a randomly chosen one of the four
//! grid neighbours after a random delay in `1..=max_delay`.
//!
//! Grounded in `examples/PHOLDSimulation/PHOLDAgent.{h,cpp}`: the neighbour
//! offsets (`-1, -Y, Y, 1`), the wraparound arithmetic, and the
//! schedule-on-initialize-then-schedule-on-receive shape all carry over
//! unchanged from that agent.

use bytemuck::{Pod, Zeroable};
use tempus::prelude::*;

const SIDE: usize = 8;
const INITIAL_EVENTS: usize = 4;
const MAX_DELAY: u64 = 8;
const WORKERS: usize = 4;
const TERMINAL: u64 = 20_000;

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Hop {
    from: u32,
}

/// A tiny xorshift64 generator. Its entire state is one `u64`, so snapshot
/// and restore are exact and allocation-free, unlike a general-purpose RNG
/// whose internal state isn't meant to be serialized.
struct Xorshift64(u64);

impl Xorshift64 {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn range(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

struct PholdAgent {
    id: usize,
    side: usize,
    rng: Xorshift64,
}

impl PholdAgent {
    fn new(id: usize, side: usize) -> Self {
        Self { id, side, rng: Xorshift64((id as u64).wrapping_mul(0x9E3779B97F4A7C15) | 1) }
    }

    /// One of the four torus neighbours of `self.id`, matching the
    /// `Change[4] = {-1, -Y, Y, 1}` offsets in the original agent.
    fn neighbour(&mut self) -> usize {
        let total = self.side * self.side;
        let offsets: [i64; 4] = [-1, -(self.side as i64), self.side as i64, 1];
        let offset = offsets[self.rng.range(4) as usize];
        let mut next = self.id as i64 + offset;
        if next < 0 {
            next += total as i64;
        }
        if next >= total as i64 {
            next -= total as i64;
        }
        next as usize
    }

    fn delay(&mut self) -> u64 {
        1 + self.rng.range(MAX_DELAY)
    }
}

impl Agent<Hop> for PholdAgent {
    fn initialize(&mut self, ctx: &mut AgentContext<Hop>) {
        for _ in 0..INITIAL_EVENTS {
            let delay = self.delay();
            let _ = ctx.schedule(self.id, delay, Hop { from: self.id as u32 });
        }
    }

    fn execute_task(&mut self, ctx: &mut AgentContext<Hop>, batch: &[Event<Hop>]) -> Result<()> {
        for event in batch {
            let receiver = self.neighbour();
            let delay = self.delay();
            ctx.schedule(receiver, delay, Hop { from: event.payload.from })?;
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &mut AgentContext<Hop>) {}

    fn snapshot(&self) -> Vec<u8> {
        self.rng.0.to_le_bytes().to_vec()
    }

    fn restore(&mut self, bytes: &[u8]) {
        self.rng.0 = u64::from_le_bytes(bytes.try_into().expect("phold snapshot is 8 bytes"));
    }
}

/// A clean shutdown reports GVT as the simulation-horizon sentinel
/// (`VTime::MAX`) rather than whatever tick the last round happened to
/// close on; print it as `+inf` instead of a confusing large integer.
fn fmt_gvt(gvt: VTime) -> String {
    if gvt == VTime::MAX {
        "+inf".to_string()
    } else {
        gvt.to_string()
    }
}

fn main() {
    let total_agents = SIDE * SIDE;
    // Agent ids are assigned in contiguous per-worker blocks (see
    // `SimulationManager::run`), so grid index `id` must land on worker
    // `id / chunk` for `self.id` to match the global id the kernel actually
    // dispatches to, keeping the neighbour arithmetic addressing real agents.
    let chunk = total_agents.div_ceil(WORKERS);
    let mut config = SimConfig::new(WORKERS)
        .with_time_bounds(TERMINAL, 1.0)
        .with_throttle_horizon(64)
        .with_gvt_delay_rate(8);

    for id in 0..total_agents {
        config = config.assign_agent_to_worker(id / chunk).unwrap();
    }

    let mut manager = SimulationManager::<Hop>::new(config);
    for id in 0..total_agents {
        manager = manager
            .place_agent(id / chunk, Box::new(PholdAgent::new(id, SIDE)))
            .unwrap();
    }

    let summary = manager.run::<2048, 128>().unwrap();
    println!("phold: {total_agents} agents over {SIDE}x{SIDE} grid on {WORKERS} workers");
    println!("final gvt: {}", fmt_gvt(summary.gvt));
    println!("worker final times: {:?}", summary.worker_final_times);
    for (rank, stats) in summary.combined_recycler_stats.iter().enumerate() {
        println!(
            "worker {rank}: allocated_bytes {} recycled_bytes {}",
            stats.allocated_bytes, stats.recycled_bytes
        );
    }
}

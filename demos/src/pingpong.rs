//! Ping-pong: two agents on two different workers bounce one event back and
//! forth. Deliberately the smallest scenario that can exercise a straggler
//! rollback: run the two workers with a generous throttle horizon and a
//! cross-worker transport delay will occasionally let one side race ahead
//! of a reply the other side hasn't sent yet, forcing the receiving side to
//! roll back once the late event lands behind its local time.

use bytemuck::{Pod, Zeroable};
use tempus::prelude::*;

const TERMINAL: u64 = 5_000;
const VOLLEY_DELAY: u64 = 3;

#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Ball {
    rallies: u32,
}

struct Paddle {
    id: usize,
    opponent: usize,
    hits: u32,
}

impl Agent<Ball> for Paddle {
    fn initialize(&mut self, ctx: &mut AgentContext<Ball>) {
        if self.id == 0 {
            let _ = ctx.schedule(self.opponent, VOLLEY_DELAY, Ball { rallies: 0 });
        }
    }

    fn execute_task(&mut self, ctx: &mut AgentContext<Ball>, batch: &[Event<Ball>]) -> Result<()> {
        for event in batch {
            self.hits += 1;
            ctx.schedule(
                self.opponent,
                VOLLEY_DELAY,
                Ball { rallies: event.payload.rallies + 1 },
            )?;
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &mut AgentContext<Ball>) {
        println!("paddle {} returned the ball {} times", self.id, self.hits);
    }

    fn snapshot(&self) -> Vec<u8> {
        self.hits.to_le_bytes().to_vec()
    }

    fn restore(&mut self, bytes: &[u8]) {
        self.hits = u32::from_le_bytes(bytes.try_into().expect("pingpong snapshot is 4 bytes"));
    }
}

fn main() {
    let config = SimConfig::new(2)
        .with_time_bounds(TERMINAL, 1.0)
        .with_throttle_horizon(32)
        .with_gvt_delay_rate(4)
        .assign_agent_to_worker(0)
        .unwrap()
        .assign_agent_to_worker(1)
        .unwrap();

    let summary = SimulationManager::<Ball>::new(config)
        .place_agent(0, Box::new(Paddle { id: 0, opponent: 1, hits: 0 }))
        .unwrap()
        .place_agent(1, Box::new(Paddle { id: 1, opponent: 0, hits: 0 }))
        .unwrap()
        .run::<256, 32>()
        .unwrap();

    println!("final gvt: {}", fmt_gvt(summary.gvt));
    println!("worker final times: {:?}", summary.worker_final_times);
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

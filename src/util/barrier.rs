//! A reusable N-party barrier, built on the same spin-wait idiom as
//! [`crate::util::spinlock::SpinLock`].
//!
//! `std::sync::Barrier` would do, but it is not reusable across generations
//! without the caller tracking its own round counter. Every worker waits
//! here exactly once, after it has reached the simulation's terminal time
//! and before it finalizes its agents, so no worker can finalize while a
//! peer might still send it a straggler and force a rollback.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::spinlock::SpinLock;

struct State {
    arrived: usize,
    generation: u64,
}

pub struct Barrier {
    parties: usize,
    state: SpinLock<State>,
    generation_gate: AtomicUsize,
}

impl Barrier {
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        Self {
            parties,
            state: SpinLock::new(State {
                arrived: 0,
                generation: 0,
            }),
            generation_gate: AtomicUsize::new(0),
        }
    }

    /// Blocks until `parties` threads have called `wait` for the current
    /// generation, then releases all of them and advances the generation so
    /// a late arrival from this round can never be mistaken for the next.
    pub fn wait(&self) {
        let my_gen;
        {
            let mut s = self.state.lock();
            s.arrived += 1;
            my_gen = s.generation;
            if s.arrived == self.parties {
                s.arrived = 0;
                s.generation = s.generation.wrapping_add(1);
                self.generation_gate.store(s.generation as usize, Ordering::Release);
                return;
            }
        }
        while self.generation_gate.load(Ordering::Acquire) as u64 == my_gen {
            std::hint::spin_loop();
        }
    }
}

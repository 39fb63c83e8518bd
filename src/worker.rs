//! The worker loop: owns a set of agents, one scheduler queue, and drives
//! them forward in virtual time under Time Warp.
//!
//! Poll inbound messages (rolling back first if any arrived in the past),
//! tick the scheduler queue, dispatch batches to agents, advance the clock,
//! and throttle against how far ahead of GVT this worker is allowed to run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use bytemuck::Pod;

use crate::agent::{Agent, AgentContext, StateHistory};
use crate::error::Result;
use crate::event::Event;
use crate::gvt::GvtManager;
use crate::logging;
use crate::output::{OutputAdapter, Sink};
use crate::queue::SchedulerQueue;
use crate::recycler::{EventRecycler, Redistribution};
use crate::time::{AgentId, VTime};
use crate::transport::intra::IntraQueue;
use crate::transport::node::CrossNodeTransport;
use crate::util::barrier::Barrier;

/// What travels over a worker's inbox: ordinary events, or a NUMA
/// redistribution bundle (§4.8) piggy-backing on the same transport.
pub enum WorkerMessage<T> {
    Event(Event<T>),
    Redistribute(Redistribution),
}

/// Per-worker tuning, carried in from [`crate::config::SimConfig`].
#[derive(Copy, Clone, Debug)]
pub struct WorkerConfig {
    pub terminal: VTime,
    pub throttle_horizon: VTime,
    pub gvt_delay_rate: u64,
    pub dealloc_thresh: f64,
    /// This worker's identity for logging and for labeling redistribution
    /// traffic; not used as a recycler array index (each worker's
    /// `EventRecycler` is single-hint, see `fossil_collect`).
    pub numa_hint: usize,
    /// Max wire events drained from the cross-node transport per poll
    /// (`--max-mpi-batch`).
    pub max_mpi_batch: usize,
}

/// Every worker's `EventRecycler` tracks exactly one NUMA hint — its own.
/// Cross-worker identity is carried separately via `WorkerConfig::numa_hint`
/// for logging; the recycler itself never needs to index by rank.
const LOCAL_NUMA_HINT: usize = 0;

/// Owns every agent assigned to this worker and runs them to completion.
pub struct Worker<T, const SLOTS: usize, const HEIGHT: usize> {
    pub rank: usize,
    /// The global agent id of `agents[0]`: agent ids are assigned in
    /// contiguous per-worker blocks (see `SimulationManager::run`), so a
    /// global id's local slot in this worker's vectors is `id - base`.
    base: AgentId,
    /// Total agent count across every worker, for validating a `schedule`
    /// receiver id regardless of which worker it lands on.
    total_agents: usize,
    agents: Vec<Box<dyn Agent<T>>>,
    histories: Vec<StateHistory>,
    sent_history: Vec<BTreeMap<VTime, Vec<Event<T>>>>,
    outputs: Vec<OutputAdapter>,
    queue: SchedulerQueue<T, SLOTS, HEIGHT>,
    recycler: EventRecycler,
    gvt: Arc<GvtManager>,
    local_time: Arc<AtomicU64>,
    peer_local_times: Vec<Arc<AtomicU64>>,
    inbox: Arc<IntraQueue<WorkerMessage<T>>>,
    peer_inboxes: Vec<Arc<IntraQueue<WorkerMessage<T>>>>,
    /// `agent_owner[agent_id]` is the worker rank that owns that agent.
    agent_owner: Arc<Vec<usize>>,
    config: WorkerConfig,
    steps: u64,
    /// Present only when the simulation manager was given one (§4.6 step 1).
    /// Polled from inside the step loop rather than once before any worker
    /// starts, so externally-injected wire events keep arriving for the
    /// life of the run.
    node_transport: Option<Arc<dyn CrossNodeTransport>>,
    /// Steps remaining before the next cross-node poll. Backs off
    /// exponentially on an empty poll and resets to 1 the moment something
    /// arrives, so an idle transport costs nearly nothing per step.
    cross_node_poll_backoff: u64,
    steps_until_cross_node_poll: u64,
    /// Every worker waits here once it reaches the terminal time, so no
    /// worker finalizes its agents while a peer might still roll it back
    /// (§5's end-of-simulation barrier).
    barrier: Arc<Barrier>,
}

pub enum StepOutcome {
    Progressed,
    Terminated,
}

/// What a worker hands back to the simulation manager once it has run to
/// completion: enough to fold its recycler into the process-wide finalize
/// sweep (§4.7) without the manager reaching into worker-private fields.
pub struct WorkerReport {
    pub rank: usize,
    pub final_time: VTime,
    pub recycler: EventRecycler,
}

impl<T, const SLOTS: usize, const HEIGHT: usize> Worker<T, SLOTS, HEIGHT>
where
    T: Pod + Clone + Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rank: usize,
        base: AgentId,
        total_agents: usize,
        agents: Vec<Box<dyn Agent<T>>>,
        gvt: Arc<GvtManager>,
        local_time: Arc<AtomicU64>,
        peer_local_times: Vec<Arc<AtomicU64>>,
        inbox: Arc<IntraQueue<WorkerMessage<T>>>,
        peer_inboxes: Vec<Arc<IntraQueue<WorkerMessage<T>>>>,
        agent_owner: Arc<Vec<usize>>,
        config: WorkerConfig,
        node_transport: Option<Arc<dyn CrossNodeTransport>>,
        barrier: Arc<Barrier>,
    ) -> Result<Self> {
        let n = agents.len();
        Ok(Self {
            rank,
            base,
            total_agents,
            histories: (0..n).map(|_| StateHistory::new()).collect(),
            sent_history: (0..n).map(|_| BTreeMap::new()).collect(),
            outputs: (0..n).map(|_| OutputAdapter::new()).collect(),
            agents,
            queue: SchedulerQueue::new()?,
            recycler: EventRecycler::new(1, 1, config.dealloc_thresh),
            gvt,
            local_time,
            peer_local_times,
            inbox,
            peer_inboxes,
            agent_owner,
            config,
            steps: 0,
            node_transport,
            cross_node_poll_backoff: 1,
            steps_until_cross_node_poll: 0,
            barrier,
        })
    }

    pub fn now(&self) -> VTime {
        self.queue.now()
    }

    /// Runs until the terminal time is reached or a model bug aborts the
    /// run. Throttles against GVT to bound how far ahead of the slowest
    /// worker this one may speculate (`Planet::run`'s sleep-and-retry loop).
    /// Consumes `self`: this is the body of the thread the simulation
    /// manager spawns per worker, and its return value is what that thread
    /// hands back on join.
    pub fn run(mut self) -> Result<WorkerReport> {
        let _span = logging::worker_span(self.rank).entered();
        self.initialize_agents()?;
        loop {
            let gvt = self.gvt.gvt();
            if gvt + self.config.throttle_horizon < self.now() {
                sleep(Duration::from_nanos(100));
                continue;
            }
            match self.step()? {
                StepOutcome::Progressed => {}
                StepOutcome::Terminated => break,
            }
            self.steps += 1;
            if self.steps % self.config.gvt_delay_rate == 0 {
                self.gvt.start_round();
            }
        }
        self.barrier.wait();
        self.finalize_agents();
        Ok(WorkerReport {
            rank: self.rank,
            final_time: self.now(),
            recycler: self.recycler,
        })
    }

    fn step(&mut self) -> Result<StepOutcome> {
        if self.now() >= self.config.terminal {
            return Ok(StepOutcome::Terminated);
        }
        self.poll_cross_node()?;
        self.drain_inbox()?;
        match self.queue.pop_min_batch()? {
            Some((receiver, batch)) => self.dispatch(receiver, &batch)?,
            None => self.queue.advance(),
        }
        self.local_time.store(self.now(), Ordering::Release);

        if self.steps % self.config.gvt_delay_rate == 0 {
            if let Some(new_gvt) = self.gvt.try_close_round(&self.all_local_times()) {
                logging::log_gvt_advance(self.gvt.gvt(), new_gvt);
                self.fossil_collect(new_gvt);
            }
        }
        Ok(StepOutcome::Progressed)
    }

    /// Adaptively polls the cross-node transport, if one is attached,
    /// decoding arrived wire events and routing each to whichever local
    /// worker owns its receiver (§4.6 step 1). Backs off exponentially on
    /// an empty poll, and resets to polling every step the moment something
    /// arrives, so an idle link costs one decrement per step instead of a
    /// syscall.
    ///
    /// Outbound delivery to an agent hosted on a genuinely different node is
    /// out of scope here: this kernel's agent address space spans only the
    /// workers one [`crate::manager::SimulationManager`] owns, so there is
    /// no routing table mapping a receiver id to a remote node. The
    /// transport trait exists so a multi-node deployment can add that
    /// mapping without touching the worker loop; this build only consumes
    /// whatever such a deployment (or a test harness) injects inbound.
    fn poll_cross_node(&mut self) -> Result<()> {
        let Some(transport) = self.node_transport.clone() else {
            return Ok(());
        };
        if self.steps_until_cross_node_poll > 0 {
            self.steps_until_cross_node_poll -= 1;
            return Ok(());
        }
        let batch = transport.recv_batch(Some(self.config.max_mpi_batch))?;
        if batch.is_empty() {
            self.cross_node_poll_backoff = (self.cross_node_poll_backoff * 2).min(64);
            self.steps_until_cross_node_poll = self.cross_node_poll_backoff - 1;
            return Ok(());
        }
        self.cross_node_poll_backoff = 1;
        self.steps_until_cross_node_poll = 0;
        for (_, bytes) in batch {
            let Some(event) = Event::<T>::from_wire(&bytes) else {
                continue;
            };
            self.gvt.on_receive(event.color, event.send_time);
            let owner = self.agent_owner[event.receiver];
            if owner == self.rank {
                if event.receive_time < self.now() {
                    self.rollback(event.receive_time)?;
                }
                self.queue.schedule(event);
            } else {
                self.peer_inboxes[Self::peer_slot(self.rank, owner)]
                    .send(event.receiver, WorkerMessage::Event(event));
            }
        }
        Ok(())
    }

    fn all_local_times(&self) -> Vec<VTime> {
        std::iter::once(self.now())
            .chain(self.peer_local_times.iter().map(|t| t.load(Ordering::Acquire)))
            .collect()
    }

    /// Drains this worker's inbox, rolling back first on any straggler
    /// event (one whose receive_time has already passed), then scheduling
    /// or annihilating every message, exactly mirroring
    /// `Planet::poll_interplanetary_messenger`.
    fn drain_inbox(&mut self) -> Result<()> {
        for msg in self.inbox.drain_all() {
            match msg {
                WorkerMessage::Redistribute(bundle) => {
                    self.recycler.accept_redistribution(bundle);
                }
                WorkerMessage::Event(event) => {
                    self.gvt.on_receive(event.color, event.send_time);
                    if event.receive_time < self.now() {
                        self.rollback(event.receive_time)?;
                    }
                    self.queue.schedule(event);
                }
            }
        }
        Ok(())
    }

    /// Calls every local agent's `initialize` once, before the first step,
    /// and routes whatever events it schedules — the seeding step
    /// `Planet::run` performs before entering its step loop.
    fn initialize_agents(&mut self) -> Result<()> {
        for i in 0..self.agents.len() {
            let mut pending = Vec::new();
            let color = self.gvt.send_color();
            {
                let mut ctx = AgentContext::new(
                    self.base + i,
                    self.now(),
                    self.gvt.gvt(),
                    self.total_agents,
                    color,
                    &mut pending,
                    &mut self.outputs[i],
                );
                self.agents[i].initialize(&mut ctx);
            }
            for event in pending {
                self.sent_history[i].entry(event.send_time).or_default().push(event.clone());
                self.route(event);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, receiver: AgentId, batch: &[Event<T>]) -> Result<()> {
        let local = receiver - self.base;
        let now = self.now();
        self.histories[local].record(now, self.agents[local].snapshot());

        let mut pending = Vec::new();
        let color = self.gvt.send_color();
        {
            let mut ctx = AgentContext::new(
                receiver,
                now,
                self.gvt.gvt(),
                self.total_agents,
                color,
                &mut pending,
                &mut self.outputs[local],
            );
            self.agents[local].execute_task(&mut ctx, batch)?;
        }

        for event in pending {
            self.sent_history[local].entry(event.send_time).or_default().push(event.clone());
            self.route(event);
        }
        Ok(())
    }

    /// Same-worker delivery goes straight into the local queue: there is no
    /// asynchronous hop for GVT's in-flight count to track. Only events that
    /// actually cross a worker boundary are counted in flight, matching
    /// `GVTManager.cpp`'s accounting of messages sent to other ranks.
    fn route(&mut self, event: Event<T>) {
        let owner = self.agent_owner[event.receiver];
        if owner == self.rank {
            self.queue.schedule(event);
        } else {
            self.gvt.on_send(event.color);
            self.peer_inboxes[Self::peer_slot(self.rank, owner)].send(event.receiver, WorkerMessage::Event(event));
        }
    }

    fn peer_slot(rank: usize, owner: usize) -> usize {
        if owner < rank {
            owner
        } else {
            owner - 1
        }
    }

    /// Rolls every agent on this worker back to `time`: restores the newest
    /// state snapshot at or before it, rewinds the scheduler queue (which
    /// keeps still-pending entries in place), discards output written at or
    /// after `time`, and re-sends an anti-message for every event this
    /// worker's agents sent at or after `time` — matching
    /// `Planet::rollback`.
    fn rollback(&mut self, time: VTime) -> Result<()> {
        logging::log_rollback(self.rank, self.now(), time);
        for i in 0..self.agents.len() {
            if let Some(snapshot) = self.histories[i].snapshot_at_or_before(time) {
                self.agents[i].restore(snapshot);
            }
            self.histories[i].truncate_after(time);
            self.outputs[i].rollback(time);

            let stale: Vec<(VTime, Vec<Event<T>>)> = self.sent_history[i]
                .split_off(&time)
                .into_iter()
                .collect();
            for (_, events) in stale {
                for event in events {
                    if event.release_ref() {
                        // no further holders; nothing to recycle for
                        // in-process events (see DESIGN.md).
                    }
                    self.route(event.negate());
                }
            }
        }
        self.queue.rollback(time);
        Ok(())
    }

    /// Drops history and output entries that can no longer be rolled back
    /// to, and lets the recycler consider redistributing idle capacity.
    fn fossil_collect(&mut self, gvt: VTime) {
        let mut sink = NullSink;
        for i in 0..self.agents.len() {
            self.histories[i].fossil_collect(gvt);
            self.sent_history[i].retain(|t, _| *t >= gvt);
            self.outputs[i].garbage_collect(gvt, &mut sink);
        }
        self.recycler.scan_pending(LOCAL_NUMA_HINT);
        let peers: Vec<usize> = (0..self.peer_inboxes.len() + 1).filter(|r| *r != self.rank).collect();
        for (peer, bundle) in self.recycler.maybe_redistribute(LOCAL_NUMA_HINT, &peers) {
            logging::log_redistribution(self.rank, peer, 0, bundle.chunks.len());
            self.peer_inboxes[Self::peer_slot(self.rank, peer)]
                .send(0, WorkerMessage::Redistribute(bundle));
        }
    }

    fn finalize_agents(&mut self) {
        let gvt = self.gvt.gvt();
        for i in 0..self.agents.len() {
            let mut pending = Vec::new();
            let color = self.gvt.send_color();
            let mut ctx = AgentContext::new(
                self.base + i,
                self.now(),
                gvt,
                self.total_agents,
                color,
                &mut pending,
                &mut self.outputs[i],
            );
            self.agents[i].finalize(&mut ctx);
        }
    }
}

struct NullSink;
impl Sink for NullSink {
    fn commit(&mut self, _time: VTime, _data: &[u8]) {}
}

//! The logical process contract: what an application implements, and the
//! per-agent execution surface the worker hands it.
//!
//! Generalizes a `ThreadedAgent`-style dispatch shape into a three-method
//! lifecycle this kernel names explicitly (`initialize`/`execute_task`/
//! `finalize`), superseding a narrower `step`/`read_message` pair.

use std::collections::BTreeMap;

use crate::error::{KernelError, ModelBugKind, Result};
use crate::event::{Color, Event};
use crate::output::OutputAdapter;
use crate::time::{AgentId, VTime};

/// Implemented by application code. One value per logical process; a worker
/// owns a `Vec<Box<dyn Agent<T>>>` and dispatches batches to them by index.
pub trait Agent<T>: Send {
    /// Called once, before the first event is ever delivered.
    fn initialize(&mut self, ctx: &mut AgentContext<T>);

    /// Called with every batch of events sharing a receive_time addressed to
    /// this agent (§4.6 step 4). May call [`AgentContext::schedule`] any
    /// number of times and must not retain borrows of `batch` past return.
    fn execute_task(&mut self, ctx: &mut AgentContext<T>, batch: &[Event<T>]) -> Result<()>;

    /// Called once the run's terminal time has been passed and this agent's
    /// worker is shutting down.
    fn finalize(&mut self, ctx: &mut AgentContext<T>);

    /// Captures enough of this agent's internal state to later restore it
    /// exactly via [`Agent::restore`]. Called by the worker before every
    /// batch dispatch (§4.2's "clone before execute").
    fn snapshot(&self) -> Vec<u8>;

    /// Restores state previously returned by [`Agent::snapshot`]. Called on
    /// rollback with the newest snapshot at or before the rollback target.
    fn restore(&mut self, bytes: &[u8]);
}

/// The execution surface passed to every `Agent` method: local virtual
/// time, the agent's own id, and the ability to schedule new events. Built
/// fresh by the worker for each dispatch; nothing here outlives the call.
pub struct AgentContext<'a, T> {
    pub id: AgentId,
    pub lvt: VTime,
    pub gvt: VTime,
    agent_count: usize,
    active_color: Color,
    pending: &'a mut Vec<Event<T>>,
    output: &'a mut OutputAdapter,
}

impl<'a, T> AgentContext<'a, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: AgentId,
        lvt: VTime,
        gvt: VTime,
        agent_count: usize,
        active_color: Color,
        pending: &'a mut Vec<Event<T>>,
        output: &'a mut OutputAdapter,
    ) -> Self {
        Self {
            id,
            lvt,
            gvt,
            agent_count,
            active_color,
            pending,
            output,
        }
    }

    /// Buffers `data` as this agent's output at the current local virtual
    /// time. Speculative until GVT passes `lvt`: see [`OutputAdapter`] for
    /// how rollback and fossil collection resolve it (C9).
    pub fn write(&mut self, data: Vec<u8>) {
        self.output.write(self.lvt, data);
    }

    /// Schedules delivery of `payload` to `receiver` at `lvt + delay`.
    /// Zero delay and unknown receivers are model bugs, not recoverable
    /// errors: the worker that observes this return aborts the run.
    pub fn schedule(&mut self, receiver: AgentId, delay: VTime, payload: T) -> Result<()> {
        if receiver >= self.agent_count {
            return Err(KernelError::ModelBug(ModelBugKind::UnknownAgent { agent: receiver }));
        }
        if delay == 0 {
            return Err(KernelError::ModelBug(ModelBugKind::ZeroOrNegativeDelay {
                lvt: self.lvt,
                attempted: self.lvt,
            }));
        }
        let receive_time = self.lvt + delay;
        self.pending.push(Event::new(
            self.id,
            receiver,
            self.lvt,
            receive_time,
            self.active_color,
            payload,
        ));
        Ok(())
    }
}

/// Time-tagged snapshot history for one agent, consulted on rollback and
/// trimmed on fossil collection. Plays the role `mesocarp::logging::journal::
/// Journal` would, implemented locally here (see DESIGN.md) rather than
/// against that crate's unverified write-side API.
#[derive(Default)]
pub struct StateHistory {
    entries: BTreeMap<VTime, Vec<u8>>,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, time: VTime, snapshot: Vec<u8>) {
        self.entries.insert(time, snapshot);
    }

    /// Newest snapshot at or before `time`, for restoring after a rollback
    /// to `time`.
    pub fn snapshot_at_or_before(&self, time: VTime) -> Option<&[u8]> {
        self.entries.range(..=time).next_back().map(|(_, v)| v.as_slice())
    }

    /// Drops every entry strictly newer than `time` (the rollback target
    /// itself is kept, since it is the state being restored to).
    pub fn truncate_after(&mut self, time: VTime) {
        self.entries.retain(|t, _| *t <= time);
    }

    /// Drops every entry strictly older than `gvt`: no rollback can ever
    /// target a time before the committed global virtual time again.
    pub fn fossil_collect(&mut self, gvt: VTime) {
        self.entries = self.entries.split_off(&gvt);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_rejects_zero_delay() {
        let mut pending = Vec::new();
        let mut output = OutputAdapter::new();
        let mut ctx = AgentContext::new(0, 10, 0, 2, Color::White, &mut pending, &mut output);
        assert!(ctx.schedule(1, 0, 7u32).is_err());
    }

    #[test]
    fn schedule_rejects_unknown_receiver() {
        let mut pending = Vec::new();
        let mut output = OutputAdapter::new();
        let mut ctx = AgentContext::new(0, 10, 0, 2, Color::White, &mut pending, &mut output);
        assert!(ctx.schedule(9, 1, 7u32).is_err());
    }

    #[test]
    fn schedule_enqueues_a_correctly_timed_event() {
        let mut pending = Vec::new();
        let mut output = OutputAdapter::new();
        {
            let mut ctx = AgentContext::new(0, 10, 0, 2, Color::White, &mut pending, &mut output);
            ctx.schedule(1, 5, 99u32).unwrap();
        }
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].receive_time, 15);
        assert_eq!(pending[0].payload, 99);
    }

    #[test]
    fn write_buffers_into_the_context_output_adapter() {
        let mut pending = Vec::new();
        let mut output = OutputAdapter::new();
        {
            let mut ctx: AgentContext<u32> = AgentContext::new(0, 10, 0, 2, Color::White, &mut pending, &mut output);
            ctx.write(b"hello".to_vec());
        }
        assert_eq!(output.pending_len(), 1);
    }

    #[test]
    fn state_history_restores_newest_snapshot_at_or_before_target() {
        let mut h = StateHistory::new();
        h.record(0, vec![0]);
        h.record(5, vec![5]);
        h.record(10, vec![10]);
        assert_eq!(h.snapshot_at_or_before(7), Some([5].as_slice()));
        h.truncate_after(7);
        assert_eq!(h.len(), 2);
        assert_eq!(h.snapshot_at_or_before(100), Some([5].as_slice()));
    }

    #[test]
    fn fossil_collect_drops_everything_before_gvt() {
        let mut h = StateHistory::new();
        h.record(0, vec![0]);
        h.record(5, vec![5]);
        h.record(10, vec![10]);
        h.fossil_collect(5);
        assert_eq!(h.len(), 2);
        assert!(h.snapshot_at_or_before(1).is_none());
    }
}

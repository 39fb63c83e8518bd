//! Per-worker scheduler queue: a hierarchical timing wheel keyed by
//! receive_time, with an overflow heap for timestamps beyond the wheel's
//! horizon, and in-queue annihilation of positive/anti-message pairs.
//!
//! `clock.insert` falls back to `overflow` on `Err`, `clock.rollback(&mut
//! overflow, time)` is the kernel's own rewind primitive (real entries are
//! preserved; only the wheel's current position moves), and
//! `clock.increment(&mut overflow)` advances the wheel each worker step,
//! promoting overflow entries that now fit. The wheel's internal layout
//! (`wheels`, `current_idxs`, `time`) is hand-walked by
//! [`SchedulerQueue::remove_matching`] since mesocarp has no built-in
//! "remove matching" primitive.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use mesocarp::scheduling::htw::Clock;

use crate::error::{KernelError, Result};
use crate::event::Event;
use crate::time::{AgentId, VTime};

type Identity = (AgentId, AgentId, VTime, VTime);

fn identity<T>(e: &Event<T>) -> Identity {
    (e.sender, e.receiver, e.send_time, e.receive_time)
}

/// What happened when an event was handed to the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Queued normally.
    Inserted,
    /// Cancelled an already-queued counterpart; neither event is now live.
    Annihilated,
}

pub struct SchedulerQueue<T, const SLOTS: usize, const HEIGHT: usize> {
    clock: Clock<Event<T>, SLOTS, HEIGHT>,
    overflow: BinaryHeap<Reverse<Event<T>>>,
    /// Anti-messages or positives waiting for their not-yet-arrived
    /// counterpart, so the counterpart can be dropped the instant it shows
    /// up instead of being scheduled and later rolled back.
    awaiting_counterpart: HashMap<Identity, Event<T>>,
    /// Batches popped off the wheel at the current tick but not yet handed
    /// to a worker: the wheel holds at `clock.time` until every receiver
    /// due there has been dispatched one batch at a time ([`Self::pop_min_batch`]).
    ready: Vec<(AgentId, Vec<Event<T>>)>,
    /// Whether `clock.tick()` has already been called for the wheel's
    /// current position — guards against ticking twice before a matching
    /// [`Self::advance`], which would silently skip over whatever is due at
    /// the next position.
    ticked_current_position: bool,
}

impl<T, const SLOTS: usize, const HEIGHT: usize> SchedulerQueue<T, SLOTS, HEIGHT> {
    pub fn new() -> Result<Self> {
        Ok(Self {
            clock: Clock::new().map_err(|e| KernelError::Clock(format!("{e:?}")))?,
            overflow: BinaryHeap::new(),
            awaiting_counterpart: HashMap::new(),
            ready: Vec::new(),
            ticked_current_position: false,
        })
    }

    pub fn now(&self) -> VTime {
        self.clock.time
    }

    /// Schedules `event`, annihilating it against an already-queued
    /// counterpart (its anti-message or positive twin) if one is present.
    pub fn schedule(&mut self, event: Event<T>) -> ScheduleOutcome
    where
        T: Clone,
    {
        let key = identity(&event);
        if let Some(counterpart) = self.awaiting_counterpart.remove(&key) {
            debug_assert!(counterpart.anti != event.anti);
            if !self.remove_matching(&event) {
                // Counterpart was recorded but already dispatched/removed by
                // some other path; nothing further to cancel.
            }
            return ScheduleOutcome::Annihilated;
        }
        if self.remove_matching(&event) {
            return ScheduleOutcome::Annihilated;
        }
        self.awaiting_counterpart.insert(key, event.clone());
        self.insert_live(event);
        ScheduleOutcome::Inserted
    }

    fn insert_live(&mut self, event: Event<T>) {
        if let Err(overflowed) = self.clock.insert(event) {
            self.overflow.push(Reverse(overflowed));
        }
    }

    /// Removes a queued event whose identity matches `probe`'s but whose
    /// `anti` flag is the opposite, if one is currently sitting in the
    /// wheel or overflow heap (not just recorded in
    /// `awaiting_counterpart`, which only tracks events that have *not yet*
    /// been physically inserted this call).
    fn remove_matching(&mut self, probe: &Event<T>) -> bool
    where
        T: Clone,
    {
        let time = probe.receive_time;
        if time < self.clock.time {
            return self.remove_from_overflow(probe);
        }
        let diff = (time - self.clock.time) as usize;
        for (k, idx) in self.clock.current_idxs.iter().enumerate().take(HEIGHT) {
            let start = (SLOTS.pow(1 + k as u32) - SLOTS) / (SLOTS - 1);
            let end = (SLOTS.pow(2 + k as u32) - SLOTS) / (SLOTS - 1) - 1;
            let horizon = (SLOTS.pow(1 + HEIGHT as u32) - SLOTS) / (SLOTS - 1);
            if diff >= horizon {
                break;
            }
            if diff < start || diff > end {
                continue;
            }
            let offset = ((diff - start) / SLOTS.pow(k as u32) + idx) % SLOTS;
            let bucket = &mut self.clock.wheels[k][offset];
            if let Some(pos) = bucket.iter().position(|e| probe.annihilates(e)) {
                bucket.remove(pos);
                return true;
            }
            return false;
        }
        self.remove_from_overflow(probe)
    }

    fn remove_from_overflow(&mut self, probe: &Event<T>) -> bool {
        if let Some(pos) = self.overflow.iter().position(|Reverse(e)| probe.annihilates(e)) {
            let mut items: Vec<_> = std::mem::take(&mut self.overflow).into_vec();
            items.remove(pos);
            self.overflow = BinaryHeap::from(items);
            true
        } else {
            false
        }
    }

    /// Pops the single batch for the minimum receiver due at the current
    /// wheel position (`pop_batch_for_min_agent`, §4.3/§4.6 step 4): a
    /// worker dispatches exactly one receiver's group per loop iteration,
    /// re-checking drain and stragglers in between, rather than every due
    /// receiver at once. Ticking the wheel to the next due position is the
    /// caller's job (via [`Self::advance`]) once this returns `None`.
    pub fn pop_min_batch(&mut self) -> Result<Option<(AgentId, Vec<Event<T>>)>> {
        if !self.ticked_current_position {
            let due = self
                .clock
                .tick()
                .map_err(|e| KernelError::Clock(format!("{e:?}")))?;
            let mut grouped: HashMap<AgentId, Vec<Event<T>>> = HashMap::new();
            for event in due {
                let key = (event.sender, event.receiver, event.send_time, event.receive_time);
                self.awaiting_counterpart.remove(&key);
                grouped.entry(event.receiver).or_default().push(event);
            }
            let mut batches: Vec<_> = grouped.into_iter().collect();
            // Popped back-to-front below, so sort descending: the *last*
            // element (smallest receiver id) comes off first.
            batches.sort_by_key(|(receiver, _)| Reverse(*receiver));
            self.ready = batches;
            self.ticked_current_position = true;
        }
        Ok(self.ready.pop())
    }

    /// Advances the wheel one tick, promoting overflow entries that are now
    /// within the wheel's horizon. Only meaningful once every batch due at
    /// the current position has been drained via [`Self::pop_min_batch`]
    /// (enforced by pairing with `ticked_current_position` rather than left
    /// to the caller).
    pub fn advance(&mut self) {
        self.clock.increment(&mut self.overflow);
        self.ticked_current_position = false;
    }

    /// Rewinds the queue to `time`; real entries already scheduled are kept
    /// in place (mesocarp recomputes their wheel position relative to the
    /// restored clock time), so this never drops a still-pending event.
    /// Any batch already popped out of the wheel for the current tick but
    /// not yet dispatched is requeued first, so a rollback can never lose a
    /// batch that was merely waiting its turn.
    pub fn rollback(&mut self, time: VTime)
    where
        T: Clone,
    {
        for (_, batch) in self.ready.drain(..) {
            for event in batch {
                let key = identity(&event);
                self.awaiting_counterpart.insert(key, event.clone());
                self.insert_live(event);
            }
        }
        self.ticked_current_position = false;
        self.clock.rollback(&mut self.overflow, time);
    }
}

//! The event type exchanged between agents, its ordering, and its wire format.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytemuck::Pod;
use mesocarp::scheduling::Scheduleable;

use crate::time::{AgentId, VTime};

/// Color used by the GVT manager's vector-counter algorithm (Mattern).
///
/// Every event carries the color that was active on its sender when it was
/// sent; the GVT manager uses this to decide which counter to adjust when
/// the event is later consumed by its receiver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    White = 0,
    NonWhite = 1,
}

impl Color {
    pub fn toggle(self) -> Self {
        match self {
            Color::White => Color::NonWhite,
            Color::NonWhite => Color::White,
        }
    }

    pub fn idx(self) -> usize {
        self as usize
    }
}

/// A timestamped message sent from one agent to another.
///
/// `refcount` tracks how many places currently hold this event (the
/// scheduler queue, an agent's output history kept for anti-message
/// generation, or in flight on a transport): see [`crate::recycler`] for how
/// that count drives memory reclamation. `anti` marks this as the
/// cancelling counterpart of a previously sent positive event; an anti-event
/// and its positive twin carry identical `sender`/`receiver`/`send_time`/
/// `receive_time` and annihilate each other on contact (§4.3).
#[derive(Clone, Debug)]
pub struct Event<T> {
    pub sender: AgentId,
    pub receiver: AgentId,
    pub send_time: VTime,
    pub receive_time: VTime,
    pub color: Color,
    pub anti: bool,
    pub refcount: Arc<AtomicUsize>,
    pub payload: T,
}

impl<T> Event<T> {
    pub fn new(
        sender: AgentId,
        receiver: AgentId,
        send_time: VTime,
        receive_time: VTime,
        color: Color,
        payload: T,
    ) -> Self {
        Self {
            sender,
            receiver,
            send_time,
            receive_time,
            color,
            anti: false,
            refcount: Arc::new(AtomicUsize::new(1)),
            payload,
        }
    }

    /// Produce the anti-message counterpart of this (positive) event.
    ///
    /// Panics in debug builds if called on an event that is already an
    /// anti-message; the kernel never double-negates.
    pub fn negate(&self) -> Event<T>
    where
        T: Clone,
    {
        debug_assert!(!self.anti, "negated an already-negative event");
        Event {
            sender: self.sender,
            receiver: self.receiver,
            send_time: self.send_time,
            receive_time: self.receive_time,
            color: self.color,
            anti: true,
            refcount: Arc::new(AtomicUsize::new(1)),
            payload: self.payload.clone(),
        }
    }

    /// True if `self` and `other` are the positive/anti pair for the same
    /// logical send, regardless of which one is the anti-message.
    pub fn annihilates(&self, other: &Event<T>) -> bool {
        self.anti != other.anti
            && self.sender == other.sender
            && self.receiver == other.receiver
            && self.send_time == other.send_time
            && self.receive_time == other.receive_time
    }

    pub fn bump_ref(&self) {
        self.refcount.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Decrements the reference count, returning `true` if it reached zero
    /// (meaning the caller is now responsible for returning the payload
    /// buffer to the recycler).
    pub fn release_ref(&self) -> bool {
        self.refcount.fetch_sub(1, AtomicOrdering::AcqRel) == 1
    }
}

impl<T> PartialEq for Event<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl<T> Eq for Event<T> {}

impl<T> PartialOrd for Event<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deterministic total order: `(receive_time, sender, send_time, receiver)`,
/// ascending. The scheduler queue always pops the least element first.
impl<T> Ord for Event<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.receive_time
            .cmp(&other.receive_time)
            .then(self.sender.cmp(&other.sender))
            .then(self.send_time.cmp(&other.send_time))
            .then(self.receiver.cmp(&other.receiver))
    }
}

impl<T> Scheduleable for Event<T> {
    fn time(&self) -> u64 {
        self.receive_time
    }
    fn commit_time(&self) -> u64 {
        self.send_time
    }
}

/// Flat header matching the wire layout in the external interface section:
/// sender_id:u32, receiver_id:u32, send_time:f64, receive_time:f64, color:u8,
/// anti_message:u8, reference_count:i16 (always reset to 1 on the wire),
/// event_size:i32 (header plus payload, for a receiver that needs to frame
/// the next message before decoding this one), followed by the payload
/// bytes. Agent ids and times are carried as `u32`/`f64` on the wire (see
/// `original_source/include/DataTypes.h`'s `AgentID`/`Time` typedefs) even
/// though the in-process representations are `usize`/`u64` ticks.
const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 1 + 1 + 2 + 4;

impl<T: Pod> Event<T> {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + std::mem::size_of::<T>());
        buf.extend_from_slice(&(self.sender as u32).to_le_bytes());
        buf.extend_from_slice(&(self.receiver as u32).to_le_bytes());
        buf.extend_from_slice(&(self.send_time as f64).to_le_bytes());
        buf.extend_from_slice(&(self.receive_time as f64).to_le_bytes());
        buf.push(self.color.idx() as u8);
        buf.push(self.anti as u8);
        buf.extend_from_slice(&1i16.to_le_bytes());
        let event_size = (HEADER_LEN + std::mem::size_of::<T>()) as i32;
        buf.extend_from_slice(&event_size.to_le_bytes());
        buf.extend_from_slice(bytemuck::bytes_of(&self.payload));
        buf
    }

    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN + std::mem::size_of::<T>() {
            return None;
        }
        let mut off = 0;
        let sender = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
        let receiver = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
        let send_time = f64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as VTime;
        off += 8;
        let receive_time = f64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as VTime;
        off += 8;
        let color = if bytes[off] == 0 { Color::White } else { Color::NonWhite };
        off += 1;
        let anti = bytes[off] != 0;
        off += 1;
        // reference_count is always reset to 1 on arrival; the wire copy
        // carries no meaningful count of its own.
        off += 2;
        // event_size is implied by `bytes.len()` once decoded locally.
        off += 4;
        let payload: T = *bytemuck::from_bytes(&bytes[off..off + std::mem::size_of::<T>()]);
        Some(Event {
            sender,
            receiver,
            send_time,
            receive_time,
            color,
            anti,
            refcount: Arc::new(AtomicUsize::new(1)),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Payload(u64);

    #[test]
    fn orders_by_receive_time_then_sender() {
        let a = Event::new(0, 1, 0, 10, Color::White, Payload(1));
        let b = Event::new(1, 1, 0, 10, Color::White, Payload(2));
        let c = Event::new(0, 1, 0, 20, Color::White, Payload(3));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn negate_round_trips_through_annihilation() {
        let pos = Event::new(3, 4, 5, 9, Color::NonWhite, Payload(7));
        let anti = pos.negate();
        assert!(pos.annihilates(&anti));
        assert!(anti.annihilates(&pos));
        assert!(!pos.annihilates(&pos));
    }

    #[test]
    fn wire_round_trip_preserves_fields() {
        let e = Event::new(2, 9, 4, 12, Color::NonWhite, Payload(42));
        let bytes = e.to_wire();
        let back: Event<Payload> = Event::from_wire(&bytes).unwrap();
        assert_eq!(back.sender, e.sender);
        assert_eq!(back.receiver, e.receiver);
        assert_eq!(back.send_time, e.send_time);
        assert_eq!(back.receive_time, e.receive_time);
        assert_eq!(back.color, e.color);
        assert_eq!(back.anti, e.anti);
        assert_eq!(back.payload, e.payload);
    }
}

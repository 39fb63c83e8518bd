//! Global Virtual Time via a shared-memory adaptation of Mattern's
//! distributed snapshot algorithm.
//!
//! Ported from `original_source/muse/kernel/src/GVTManager.cpp`
//! (`vecCounters`, `tMin`, `activeColor`, the wait condition in
//! `checkWaitingCtrlMsg`): a round toggles the active color, every event
//! sent carries the color active at send time, and the round can only close
//! once every event sent in the *previous* color has been received — the
//! surviving in-flight count is exactly what guarantees GVT never passes a
//! message still travelling when the round began. See DESIGN.md for how the
//! per-rank vector counters collapse to a single shared pair of atomics in
//! this single-process, multi-worker setting.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crate::event::Color;
use crate::time::VTime;

pub struct GvtManager {
    gvt: AtomicU64,
    active_color: AtomicBool, // false = White, true = NonWhite
    in_flight: [AtomicI64; 2],
    t_min: AtomicU64,
    round_active: AtomicBool,
    round_color_was_white: AtomicBool,
}

impl GvtManager {
    pub fn new() -> Self {
        Self {
            gvt: AtomicU64::new(0),
            active_color: AtomicBool::new(false),
            in_flight: [AtomicI64::new(0), AtomicI64::new(0)],
            t_min: AtomicU64::new(u64::MAX),
            round_active: AtomicBool::new(false),
            round_color_was_white: AtomicBool::new(false),
        }
    }

    pub fn gvt(&self) -> VTime {
        self.gvt.load(Ordering::Acquire)
    }

    /// The color a worker should stamp on an event it is sending right now.
    pub fn send_color(&self) -> Color {
        if self.active_color.load(Ordering::Acquire) {
            Color::NonWhite
        } else {
            Color::White
        }
    }

    /// Called exactly once per outgoing event, at the moment it is handed
    /// to a transport (intra- or cross-node).
    pub fn on_send(&self, color: Color) {
        self.in_flight[color.idx()].fetch_add(1, Ordering::AcqRel);
    }

    /// Called exactly once per incoming event, at the moment a worker
    /// consumes it off a transport (whether or not it later annihilates).
    pub fn on_receive(&self, color: Color, send_time: VTime) {
        self.in_flight[color.idx()].fetch_sub(1, Ordering::AcqRel);
        if self.round_active.load(Ordering::Acquire) {
            let round_color_white = self.round_color_was_white.load(Ordering::Acquire);
            let is_round_color = matches!(
                (round_color_white, color),
                (true, Color::White) | (false, Color::NonWhite)
            );
            if is_round_color {
                self.t_min.fetch_min(send_time, Ordering::AcqRel);
            }
        }
    }

    /// Starts a new round if one is not already in progress: toggles the
    /// active color so every subsequent send uses it, and records the
    /// color being retired so [`Self::on_receive`] knows which in-flight
    /// messages still block this round's close.
    pub fn start_round(&self) -> bool {
        if self
            .round_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let was_white = !self.active_color.load(Ordering::Acquire);
        self.round_color_was_white.store(was_white, Ordering::Release);
        self.active_color.fetch_xor(true, Ordering::AcqRel);
        self.t_min.store(u64::MAX, Ordering::Release);
        true
    }

    /// Checks whether the round can close: true exactly when every event
    /// sent in the retiring color has now been received. If so, computes
    /// and commits the new GVT as `min(min(local LVTs), tMin)`, monotone
    /// with the previous value, and returns it.
    pub fn try_close_round(&self, worker_lvts: &[VTime]) -> Option<VTime> {
        if !self.round_active.load(Ordering::Acquire) {
            return None;
        }
        let retiring_idx = if self.round_color_was_white.load(Ordering::Acquire) {
            Color::White.idx()
        } else {
            Color::NonWhite.idx()
        };
        if self.in_flight[retiring_idx].load(Ordering::Acquire) > 0 {
            return None;
        }
        let min_lvt = worker_lvts.iter().copied().min().unwrap_or(0);
        let t_min = self.t_min.load(Ordering::Acquire);
        let candidate = min_lvt.min(t_min);
        let previous = self.gvt.fetch_max(candidate, Ordering::AcqRel);
        self.round_active.store(false, Ordering::Release);
        Some(candidate.max(previous))
    }
}

impl Default for GvtManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Which phase of Mattern's token-passing protocol a [`ControlToken`] is
/// carrying. A real multi-process deployment circulates all three: `Ctrl`
/// initiates a round, `Estimate` carries a candidate GVT around the ring of
/// ranks, `Ack` confirms every rank has adopted it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenKind {
    Ctrl = 0,
    Estimate = 1,
    Ack = 2,
}

impl TokenKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TokenKind::Ctrl),
            1 => Some(TokenKind::Estimate),
            2 => Some(TokenKind::Ack),
            _ => None,
        }
    }
}

/// Wire form of the control token a cross-node transport would circulate in
/// a true multi-process deployment (§6): carries the retiring color's
/// per-worker in-flight counters and tMin so a remote node's local
/// `GvtManager` instance can be kept consistent. Not used intra-process (the
/// shared `GvtManager` needs no token there), but both sides of a
/// cross-node link exchange it.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlToken {
    pub kind: TokenKind,
    pub dest_rank: i32,
    pub gvt_estimate: VTime,
    pub t_min: VTime,
    /// One in-flight counter per worker on the sending rank, in rank order
    /// — the vector Mattern's algorithm sums to decide whether the retiring
    /// color has fully drained.
    pub counters: Vec<i32>,
}

impl ControlToken {
    pub fn to_wire(&self) -> Vec<u8> {
        let num_workers = self.counters.len() as i32;
        let mut buf = Vec::with_capacity(1 + 4 + 8 + 8 + 4 + 4 * self.counters.len());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.dest_rank.to_le_bytes());
        buf.extend_from_slice(&(self.gvt_estimate as f64).to_le_bytes());
        buf.extend_from_slice(&(self.t_min as f64).to_le_bytes());
        buf.extend_from_slice(&num_workers.to_le_bytes());
        for c in &self.counters {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf
    }

    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 1 + 4 + 8 + 8 + 4 {
            return None;
        }
        let mut off = 0;
        let kind = TokenKind::from_u8(bytes[off])?;
        off += 1;
        let dest_rank = i32::from_le_bytes(bytes[off..off + 4].try_into().ok()?);
        off += 4;
        let gvt_estimate = f64::from_le_bytes(bytes[off..off + 8].try_into().ok()?) as VTime;
        off += 8;
        let t_min = f64::from_le_bytes(bytes[off..off + 8].try_into().ok()?) as VTime;
        off += 8;
        let num_workers = i32::from_le_bytes(bytes[off..off + 4].try_into().ok()?);
        off += 4;
        if num_workers < 0 {
            return None;
        }
        let num_workers = num_workers as usize;
        if bytes.len() < off + 4 * num_workers {
            return None;
        }
        let mut counters = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            counters.push(i32::from_le_bytes(bytes[off..off + 4].try_into().ok()?));
            off += 4;
        }
        Some(Self { kind, dest_rank, gvt_estimate, t_min, counters })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_worker_round_closes_immediately_with_no_in_flight() {
        let gvt = GvtManager::new();
        assert!(gvt.start_round());
        let closed = gvt.try_close_round(&[42]);
        assert_eq!(closed, Some(42));
        assert_eq!(gvt.gvt(), 42);
    }

    #[test]
    fn round_stays_open_while_retiring_color_in_flight() {
        let gvt = GvtManager::new();
        let color = gvt.send_color();
        gvt.on_send(color); // one event in flight, colored White
        assert!(gvt.start_round()); // retires White, new sends are NonWhite
        assert_eq!(gvt.try_close_round(&[100]), None);
        gvt.on_receive(color, 7);
        assert_eq!(gvt.try_close_round(&[100]), Some(7));
    }

    #[test]
    fn gvt_never_moves_backward() {
        let gvt = GvtManager::new();
        gvt.start_round();
        assert_eq!(gvt.try_close_round(&[50]), Some(50));
        gvt.start_round();
        // a worker momentarily reports a lower lvt than the committed gvt
        // (should not happen in a causally valid run, but gvt must still be monotone)
        assert_eq!(gvt.try_close_round(&[10]), Some(50));
        assert_eq!(gvt.gvt(), 50);
    }

    #[test]
    fn second_start_round_is_a_no_op_while_one_is_active() {
        let gvt = GvtManager::new();
        assert!(gvt.start_round());
        assert!(!gvt.start_round());
    }

    #[test]
    fn control_token_round_trips_through_the_wire() {
        let token = ControlToken {
            kind: TokenKind::Estimate,
            dest_rank: 3,
            gvt_estimate: 120,
            t_min: 45,
            counters: vec![1, -2, 0, 7],
        };
        let bytes = token.to_wire();
        let back = ControlToken::from_wire(&bytes).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn control_token_from_wire_rejects_truncated_counters() {
        let token = ControlToken {
            kind: TokenKind::Ctrl,
            dest_rank: 0,
            gvt_estimate: 1,
            t_min: 1,
            counters: vec![1, 2, 3],
        };
        let mut bytes = token.to_wire();
        bytes.truncate(bytes.len() - 4);
        assert!(ControlToken::from_wire(&bytes).is_none());
    }
}

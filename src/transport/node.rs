//! Cross-node transport: a byte-oriented send/recv contract, one endpoint
//! mutex per destination, used only when a run spans more than one
//! process/machine. A single-process run uses [`LoopbackTransport`], which
//! also stands in for the real thing in tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{KernelError, Result};

/// A single logical connection to one remote node. Implementations own
/// serialization and delivery; the kernel only ever hands over already
/// wire-encoded event bytes (see [`crate::event::Event::to_wire`]).
pub trait CrossNodeTransport: Send + Sync {
    fn send(&self, tag: usize, bytes: Vec<u8>) -> Result<()>;

    /// Drains up to `max` pending messages (or all of them if `max` is
    /// `None`), returning `(tag, bytes)` pairs in arrival order.
    fn recv_batch(&self, max: Option<usize>) -> Result<Vec<(usize, Vec<u8>)>>;
}

/// Single-process stand-in for a real network transport: every "send" is
/// appended straight to an in-memory inbox guarded by one mutex, matching
/// the "single mutex per endpoint" rule for cross-node transports.
#[derive(Default)]
pub struct LoopbackTransport {
    inbox: Mutex<VecDeque<(usize, Vec<u8>)>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CrossNodeTransport for LoopbackTransport {
    fn send(&self, tag: usize, bytes: Vec<u8>) -> Result<()> {
        self.inbox
            .lock()
            .map_err(|_| KernelError::TransportTransient("loopback inbox mutex poisoned".into()))?
            .push_back((tag, bytes));
        Ok(())
    }

    fn recv_batch(&self, max: Option<usize>) -> Result<Vec<(usize, Vec<u8>)>> {
        let mut inbox = self
            .inbox
            .lock()
            .map_err(|_| KernelError::TransportTransient("loopback inbox mutex poisoned".into()))?;
        let n = max.unwrap_or(inbox.len()).min(inbox.len());
        Ok(inbox.drain(..n).collect())
    }
}

//! Shared time and identifier aliases used across the kernel.

/// Index of a registered agent, stable for the lifetime of a run.
pub type AgentId = usize;

/// Logical/virtual time. Always an integer tick; applications map ticks to
/// physical units via their own `timestep` (see [`TimeInfo`]).
pub type VTime = u64;

/// Bounds a run: `terminal` is the last virtual time advanced past, and
/// `timestep` is the physical-time scale of one tick (purely informational
/// for the kernel; only the application interprets it).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimeInfo {
    pub terminal: VTime,
    pub timestep: f64,
}

//! Crate-wide error type.

use thiserror::Error;

/// Describes which invariant an agent violated, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelBugKind {
    /// An agent scheduled an event at or before its own local virtual time.
    ZeroOrNegativeDelay { lvt: u64, attempted: u64 },
    /// An agent scheduled an event behind the committed global virtual time.
    ScheduledBehindGvt { gvt: u64, attempted: u64 },
    /// A receiver id does not correspond to any registered agent.
    UnknownAgent { agent: usize },
}

impl std::fmt::Display for ModelBugKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelBugKind::ZeroOrNegativeDelay { lvt, attempted } => write!(
                f,
                "event scheduled at {attempted} is not strictly after local time {lvt}"
            ),
            ModelBugKind::ScheduledBehindGvt { gvt, attempted } => write!(
                f,
                "event scheduled at {attempted} is behind committed gvt {gvt}"
            ),
            ModelBugKind::UnknownAgent { agent } => write!(f, "no agent registered at index {agent}"),
        }
    }
}

/// Errors surfaced by the kernel.
///
/// [`KernelError::Config`] is raised only before any worker starts running.
/// [`KernelError::ModelBug`] is fatal: the worker that observes it stops and
/// the simulation manager unwinds every other worker thread.
/// [`KernelError::TransportTransient`] is logged and retried, never returned
/// to application code.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("model violated a kernel invariant: {0}")]
    ModelBug(ModelBugKind),

    #[error("transient transport failure: {0}")]
    TransportTransient(String),

    #[error("attempted to roll back past a point already fossil-collected (target {target}, gvt {gvt})")]
    RollbackBehindGvt { target: u64, gvt: u64 },

    #[error("scheduler clock error: {0}")]
    Clock(String),

    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),

    #[error("mismatched delivery address: event addressed to worker {expected}, received by {actual}")]
    MismatchedDelivery { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, KernelError>;

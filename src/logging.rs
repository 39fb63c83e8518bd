//! Thin wrappers over `tracing` so worker/GVT/manager code emits consistent
//! fields instead of ad hoc format strings.

/// Emits a span tagged with a worker's rank, for use as
/// `let _g = logging::worker_span(rank).entered();` at the top of the run loop.
pub fn worker_span(rank: usize) -> tracing::Span {
    tracing::info_span!("worker", rank)
}

/// Records a rollback: who rolled back, to what time, and from how far ahead.
pub fn log_rollback(rank: usize, from: u64, to: u64) {
    tracing::debug!(rank, from, to, "rollback");
}

/// Records a GVT advance.
pub fn log_gvt_advance(old: u64, new: u64) {
    tracing::info!(old, new, "gvt advanced");
}

/// Records a redistribution transfer between workers.
pub fn log_redistribution(from: usize, to: usize, bytes: usize, chunks: usize) {
    tracing::debug!(from, to, bytes, chunks, "numa redistribution");
}

//! Speculation-safe output: buffers what an agent writes while running
//! ahead of GVT, discards it on rollback, and only hands it to the real
//! sink once GVT has passed it and it can never be un-happened.
//!
//! Grounded in `original_source/include/{oSimStream.h,SharedOutBuffer.h}`:
//! per-agent buffering with a rollback-to-time operation, and a shared
//! variant that batches commits from every agent on a worker behind one
//! lock before an ordered collective write.

use crate::util::spinlock::SpinLock;
use crate::time::VTime;

/// Where committed output ultimately goes. Implemented by the application
/// (a file, a socket, an in-memory buffer for tests).
pub trait Sink: Send {
    fn commit(&mut self, time: VTime, data: &[u8]);
}

/// Per-agent buffered output.
pub struct OutputAdapter {
    pending: Vec<(VTime, Vec<u8>)>,
}

impl OutputAdapter {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn write(&mut self, time: VTime, data: Vec<u8>) {
        self.pending.push((time, data));
    }

    /// Discards everything written at or after a rollback target.
    pub fn rollback(&mut self, time: VTime) {
        self.pending.retain(|(t, _)| *t < time);
    }

    /// Commits and drops every entry strictly before `gvt`, since no future
    /// rollback can ever reach back that far again.
    pub fn garbage_collect(&mut self, gvt: VTime, sink: &mut dyn Sink) {
        let mut keep = Vec::new();
        self.pending.sort_by_key(|(t, _)| *t);
        for (t, data) in self.pending.drain(..) {
            if t < gvt {
                sink.commit(t, &data);
            } else {
                keep.push((t, data));
            }
        }
        self.pending = keep;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for OutputAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregates commits from every agent on a worker behind one lock so the
/// final write is one ordered, collective operation rather than N
/// independently-ordered ones — the "shared buffer" mode (§4.9).
pub struct SharedOutputAdapter {
    commits: SpinLock<Vec<(VTime, Vec<u8>)>>,
}

impl SharedOutputAdapter {
    pub fn new() -> Self {
        Self {
            commits: SpinLock::new(Vec::new()),
        }
    }

    pub fn record(&self, time: VTime, data: Vec<u8>) {
        self.commits.lock().push((time, data));
    }

    /// Flushes everything committed so far, in time order, along with the
    /// `<virtual_time, byte_offset>` index a rank-0 writer persists
    /// alongside the data (§6).
    pub fn flush(&self, sink: &mut dyn Sink) -> Vec<(VTime, usize)> {
        let mut commits = self.commits.lock();
        commits.sort_by_key(|(t, _)| *t);
        let mut index = Vec::with_capacity(commits.len());
        let mut offset = 0usize;
        for (t, data) in commits.drain(..) {
            index.push((t, offset));
            offset += data.len();
            sink.commit(t, &data);
        }
        index
    }
}

impl Default for SharedOutputAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        committed: Vec<(VTime, Vec<u8>)>,
    }

    impl Sink for RecordingSink {
        fn commit(&mut self, time: VTime, data: &[u8]) {
            self.committed.push((time, data.to_vec()));
        }
    }

    #[test]
    fn rollback_discards_speculative_writes() {
        let mut out = OutputAdapter::new();
        out.write(5, b"a".to_vec());
        out.write(10, b"b".to_vec());
        out.rollback(8);
        assert_eq!(out.pending_len(), 1);
    }

    #[test]
    fn garbage_collect_commits_only_entries_before_gvt() {
        let mut out = OutputAdapter::new();
        out.write(1, b"a".to_vec());
        out.write(5, b"b".to_vec());
        out.write(9, b"c".to_vec());
        let mut sink = RecordingSink { committed: Vec::new() };
        out.garbage_collect(6, &mut sink);
        assert_eq!(sink.committed.len(), 2);
        assert_eq!(out.pending_len(), 1);
    }

    #[test]
    fn shared_adapter_flush_is_time_ordered_with_index() {
        let shared = SharedOutputAdapter::new();
        shared.record(9, b"late".to_vec());
        shared.record(1, b"early".to_vec());
        let mut sink = RecordingSink { committed: Vec::new() };
        let index = shared.flush(&mut sink);
        assert_eq!(sink.committed[0].0, 1);
        assert_eq!(sink.committed[1].0, 9);
        assert_eq!(index[0], (1, 0));
        assert_eq!(index[1], (9, 5));
    }
}

//! Event-memory lifecycle: NUMA-hinted arenas, per-size free-stacks, deferred
//! deallocation, and the periodic cross-worker redistribution of recycled
//! buffers that keeps one worker's cold queue from starving while another's
//! overflows.
//!
//! Ported from `original_source/muse/kernel/src/NumaMemoryManager.cpp`, with
//! its raw `numa_alloc_onnode`/`char*` arena replaced by owned `Box<[u8]>`
//! chunks: NUMA placement is tracked as a logical `numa_hint` tag rather than
//! an OS-level affinity call, since nothing in this crate's dependency
//! surface binds real NUMA topology. The hint still drives the same
//! allocated-vs-recycled accounting the original uses to decide when to
//! redistribute (§4.8).

use std::collections::HashMap;

/// Bookkeeping for one NUMA hint: bytes currently out on loan as fresh
/// allocations, and bytes sitting idle in the free-stacks.
#[derive(Default, Clone, Copy, Debug)]
pub struct RecyclerStats {
    pub allocated_bytes: usize,
    pub recycled_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// A bundle of recycled buffers handed from one worker to another when the
/// sender's free-stacks are overflowing relative to its working set.
pub struct Redistribution {
    pub numa_hint: usize,
    pub chunks: Vec<(usize, Box<[u8]>)>,
}

/// Recycles fixed-size event payload buffers per NUMA hint, deferring actual
/// deallocation until fossil collection confirms no rollback can reach back
/// far enough to need the buffer.
pub struct EventRecycler {
    workers: usize,
    free: Vec<HashMap<usize, Vec<Box<[u8]>>>>,
    pending: Vec<Vec<(usize, Box<[u8]>)>>,
    stats: Vec<RecyclerStats>,
    dealloc_thresh: f64,
}

impl EventRecycler {
    pub fn new(workers: usize, numa_hints: usize, dealloc_thresh: f64) -> Self {
        Self {
            workers,
            free: (0..numa_hints).map(|_| HashMap::new()).collect(),
            pending: (0..numa_hints).map(|_| Vec::new()).collect(),
            stats: vec![RecyclerStats::default(); numa_hints],
            dealloc_thresh,
        }
    }

    /// Returns a buffer of exactly `size` bytes, reusing a recycled one from
    /// `numa_hint`'s free-stack if available, else allocating fresh.
    pub fn allocate(&mut self, numa_hint: usize, size: usize) -> Box<[u8]> {
        if let Some(buf) = self.free[numa_hint].get_mut(&size).and_then(Vec::pop) {
            self.stats[numa_hint].recycled_bytes -= size;
            self.stats[numa_hint].hits += 1;
            return buf;
        }
        self.stats[numa_hint].allocated_bytes += size;
        self.stats[numa_hint].misses += 1;
        vec![0u8; size].into_boxed_slice()
    }

    /// Queues a no-longer-referenced buffer for later return to the
    /// free-stack; called once an event's refcount (§4.1) reaches zero.
    /// Not returned to the free-stack immediately so that a late rollback
    /// within the same fossil-collection window still has a valid copy to
    /// inspect if a bug causes it to be read after release in debug builds.
    pub fn defer_release(&mut self, numa_hint: usize, size: usize, buf: Box<[u8]>) {
        self.pending[numa_hint].push((size, buf));
    }

    /// Walks a share of the pending-release list back onto the free-stack.
    /// The batch size adapts toward `dealloc_thresh` of the backlog so a
    /// burst of releases drains over a few scans rather than in one spike.
    pub fn scan_pending(&mut self, numa_hint: usize) {
        let backlog = self.pending[numa_hint].len();
        if backlog == 0 {
            return;
        }
        let batch = ((backlog as f64) * self.dealloc_thresh).ceil() as usize;
        let batch = batch.max(1).min(backlog);
        for (size, buf) in self.pending[numa_hint].drain(..batch) {
            self.stats[numa_hint].recycled_bytes += size;
            self.free[numa_hint].entry(size).or_default().push(buf);
        }
    }

    pub fn stats(&self, numa_hint: usize) -> RecyclerStats {
        self.stats[numa_hint]
    }

    /// Moves every pending and free buffer for `numa_hint` into this
    /// recycler's own books, used by the simulation manager's finalize
    /// sweep (§4.7) to collapse per-worker arenas into one at shutdown.
    pub fn absorb(&mut self, numa_hint: usize, other: &mut EventRecycler, other_hint: usize) {
        for (size, bufs) in other.free[other_hint].drain() {
            self.stats[numa_hint].recycled_bytes += size * bufs.len();
            self.free[numa_hint].entry(size).or_default().extend(bufs);
        }
        for (size, buf) in other.pending[other_hint].drain(..) {
            self.pending[numa_hint].push((size, buf));
        }
    }

    /// Direct port of `NumaMemoryManager::redistribute`: once recycled bytes
    /// exceed twice what is actually allocated, ship the excess out evenly
    /// across `peers` (round-robin by least-loaded so far), so a
    /// disproportionately idle worker's memory helps the others instead of
    /// sitting cold.
    pub fn maybe_redistribute(&mut self, numa_hint: usize, peers: &[usize]) -> Vec<(usize, Redistribution)> {
        if peers.is_empty() || self.workers <= 1 {
            return Vec::new();
        }
        let stats = self.stats[numa_hint];
        let allocated = stats.allocated_bytes.max(1);
        let recycled = stats.recycled_bytes;
        if recycled <= 2 * allocated {
            return Vec::new();
        }
        let excess = recycled - allocated;

        let mut peer_bytes = vec![0usize; peers.len()];
        let mut peer_chunks: Vec<Vec<(usize, Box<[u8]>)>> = peers.iter().map(|_| Vec::new()).collect();

        let sizes: Vec<usize> = self.free[numa_hint].keys().copied().collect();
        let mut moved = 0usize;
        'outer: for size in sizes {
            while moved < excess {
                let popped = self.free[numa_hint].get_mut(&size).and_then(Vec::pop);
                let Some(buf) = popped else { break };
                self.stats[numa_hint].recycled_bytes -= size;
                let (idx, _) = peer_bytes
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, bytes)| *bytes)
                    .expect("peers is non-empty");
                peer_bytes[idx] += size;
                peer_chunks[idx].push((size, buf));
                moved += size;
                if moved >= excess {
                    break 'outer;
                }
            }
        }

        peers
            .iter()
            .copied()
            .zip(peer_chunks)
            .filter(|(_, chunks)| !chunks.is_empty())
            .map(|(peer, chunks)| (peer, Redistribution { numa_hint, chunks }))
            .collect()
    }

    /// Receiver-side counterpart of `maybe_redistribute`: folds an incoming
    /// bundle straight into the local free-stacks.
    pub fn accept_redistribution(&mut self, msg: Redistribution) {
        for (size, buf) in msg.chunks {
            self.stats[msg.numa_hint].recycled_bytes += size;
            self.free[msg.numa_hint].entry(size).or_default().push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_matching_size_buffers() {
        let mut r = EventRecycler::new(2, 1, 0.5);
        let buf = r.allocate(0, 64);
        assert_eq!(r.stats(0).misses, 1);
        r.defer_release(0, 64, buf);
        r.scan_pending(0);
        assert_eq!(r.stats(0).recycled_bytes, 64);
        let _reused = r.allocate(0, 64);
        assert_eq!(r.stats(0).hits, 1);
        assert_eq!(r.stats(0).recycled_bytes, 0);
    }

    #[test]
    fn scan_pending_drains_toward_threshold_not_all_at_once() {
        let mut r = EventRecycler::new(2, 1, 0.5);
        for _ in 0..10 {
            r.defer_release(0, 32, vec![0u8; 32].into_boxed_slice());
        }
        r.scan_pending(0);
        // half the backlog (5) should have moved to the free-stack
        assert_eq!(r.stats(0).recycled_bytes, 5 * 32);
    }

    #[test]
    fn redistribution_with_zero_chunks_is_a_no_op() {
        let mut r = EventRecycler::new(2, 1, 0.5);
        let before = r.stats(0);
        r.accept_redistribution(Redistribution { numa_hint: 0, chunks: Vec::new() });
        assert_eq!(r.stats(0).recycled_bytes, before.recycled_bytes);
        assert!(r.maybe_redistribute(0, &[]).is_empty());
    }

    #[test]
    fn redistributes_only_once_recycled_exceeds_double_allocated() {
        let mut r = EventRecycler::new(3, 1, 1.0);
        let a = r.allocate(0, 16); // 16 allocated
        r.defer_release(0, 16, a);
        r.scan_pending(0);
        assert!(r.maybe_redistribute(0, &[1, 2]).is_empty());

        for _ in 0..10 {
            let b = r.allocate(0, 16);
            r.defer_release(0, 16, b);
        }
        r.scan_pending(0);
        let msgs = r.maybe_redistribute(0, &[1, 2]);
        assert!(!msgs.is_empty());
        let total_moved: usize = msgs.iter().map(|(_, m)| m.chunks.iter().map(|(s, _)| s).sum::<usize>()).sum();
        assert!(total_moved > 0);
    }
}

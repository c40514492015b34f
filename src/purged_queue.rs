use rayon::prelude::*;
use solana_sdk::hash::Hash;
use std::collections::VecDeque;

/// FIFO of hashes of values recently overridden in, or rejected by, the
/// crds table, with the local time each was recorded. Pull-request
/// construction consults it so peers stop offering payloads this node has
/// already moved past.
///
/// The queue is unbounded; it only shrinks when the caller invokes
/// [`trim`](Self::trim) with an age cutoff.
#[derive(Clone, Debug, Default)]
pub struct PurgedQueue {
    queue: VecDeque<(Hash, /*timestamp:*/ u64)>,
}

impl PurgedQueue {
    pub fn insert(&mut self, value_hash: Hash, now: u64) {
        self.queue.push_back((value_hash, now));
    }

    /// Drops entries recorded before the cutoff, scanning from the head
    /// and stopping at the first entry not older than the cutoff.
    /// Timestamps are appended in nondecreasing order in steady state, so
    /// the head scan suffices; an out-of-order straggler behind a newer
    /// entry survives, which is acceptable for an advisory queue.
    pub fn trim(&mut self, cutoff: u64) {
        let count = self
            .queue
            .iter()
            .take_while(|(_, timestamp)| *timestamp < cutoff)
            .count();
        self.queue.drain(..count);
    }

    /// All hashes currently in the queue, oldest first.
    pub fn values(&self) -> impl Iterator<Item = Hash> + '_ {
        self.queue.iter().map(|(hash, _)| *hash)
    }

    pub fn par_values(&self) -> impl IndexedParallelIterator<Item = Hash> + '_ {
        self.queue.par_iter().map(|(hash, _)| *hash)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

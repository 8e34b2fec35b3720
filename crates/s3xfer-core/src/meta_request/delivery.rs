//! Sequence-ordered body delivery.
//!
//! Parts finish in any order; the caller sees body chunks strictly by part
//! sequence. Chunks of the part currently being delivered pass straight
//! through, later parts are held until every predecessor finished.

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub(crate) struct DeliveryQueue {
    next_seq: u32,
    held: BTreeMap<u32, Vec<(u64, Bytes)>>,
    finished: BTreeSet<u32>,
    held_bytes: u64,
}

impl DeliveryQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Part whose chunks are currently delivered.
    pub(crate) fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Bytes held back waiting for a predecessor.
    pub(crate) fn held_bytes(&self) -> u64 {
        self.held_bytes
    }

    /// Whether part `seq` may start without exceeding `window` parts ahead
    /// of the delivery position.
    pub(crate) fn within_window(&self, seq: u32, window: usize) -> bool {
        seq.saturating_sub(self.next_seq) < window.max(1) as u32
    }

    /// Accept a chunk. Returns it back if it is deliverable now.
    pub(crate) fn push(&mut self, seq: u32, offset: u64, data: Bytes) -> Option<(u64, Bytes)> {
        if seq == self.next_seq {
            return Some((offset, data));
        }
        self.held_bytes += data.len() as u64;
        self.held.entry(seq).or_default().push((offset, data));
        None
    }

    /// Mark part `seq` finished; returns the chunks that became deliverable.
    pub(crate) fn finish(&mut self, seq: u32) -> Vec<(u64, Bytes)> {
        let mut ready = Vec::new();
        self.finished.insert(seq);
        while self.finished.remove(&self.next_seq) {
            self.next_seq += 1;
            if let Some(chunks) = self.held.remove(&self.next_seq) {
                self.held_bytes -= chunks.iter().map(|(_, d)| d.len() as u64).sum::<u64>();
                ready.extend(chunks);
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn in_order_passes_through() {
        let mut q = DeliveryQueue::new();
        assert_eq!(q.push(0, 0, chunk("ab")), Some((0, chunk("ab"))));
        assert!(q.finish(0).is_empty());
        assert_eq!(q.next_seq(), 1);
        assert_eq!(q.push(1, 2, chunk("cd")), Some((2, chunk("cd"))));
    }

    #[test]
    fn out_of_order_parts_are_held_until_predecessors_finish() {
        let mut q = DeliveryQueue::new();
        assert!(q.push(2, 4, chunk("ef")).is_none());
        assert!(q.finish(2).is_empty());
        assert!(q.push(1, 2, chunk("cd")).is_none());
        assert_eq!(q.held_bytes(), 4);
        assert_eq!(q.push(0, 0, chunk("a")), Some((0, chunk("a"))));
        assert!(q.finish(1).is_empty());
        assert_eq!(q.push(0, 1, chunk("b")), Some((1, chunk("b"))));

        let ready = q.finish(0);
        let offsets: Vec<u64> = ready.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![2, 4]);
        assert_eq!(q.next_seq(), 3);
        assert_eq!(q.held_bytes(), 0);
    }

    #[test]
    fn window_counts_from_delivery_position() {
        let mut q = DeliveryQueue::new();
        assert!(q.within_window(0, 2));
        assert!(q.within_window(1, 2));
        assert!(!q.within_window(2, 2));
        q.finish(0);
        assert!(q.within_window(2, 2));
        assert!(q.within_window(1, 0));
    }
}

//! Pending queue for requests admitted past the concurrency limit.
//! Drain order is priority class first (high > normal > low), FIFO within
//! a class via a monotonic admission sequence.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use toolcore_protocol::Priority;

#[derive(Debug)]
struct QueueEntry {
    task_id: u64,
    priority: Priority,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the earlier admission.
        self.priority
            .level()
            .cmp(&other.priority.level())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn push(&mut self, task_id: u64, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            task_id,
            priority,
            seq,
        });
    }

    pub fn pop(&mut self) -> Option<u64> {
        self.heap.pop().map(|entry| entry.task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

use harvest_protocol::{MessageHeader, PriorityTuple};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tracing::warn;

/// How often (in successful dequeues) the queues get an aging pass.
const AGING_INTERVAL: u64 = 100;

/// One queued message plus its header and a monotonic insertion sequence,
/// the latter breaking ties between two entries with an identical priority
/// tuple (FIFO within a priority class).
struct Entry<M> {
    key: PriorityTuple,
    seq: u64,
    header: MessageHeader,
    message: M,
}

impl<M> PartialEq for Entry<M> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}
impl<M> Eq for Entry<M> {}
impl<M> PartialOrd for Entry<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<M> Ord for Entry<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.key, self.seq).cmp(&(other.key, other.seq))
    }
}

/// Two-tier priority queue: system messages drain ahead of process messages
/// whenever both are non-empty. Each tier is a binary heap ordered by
/// `(depth, priority, -timestamp)`, lowest first.
///
/// Ported from `MasterPriorityQueue`: no singleton here — one instance is
/// constructed in `main` and shared behind an `Arc`.
pub struct PriorityQueue<M> {
    system: Mutex<BinaryHeap<Reverse<Entry<M>>>>,
    process: Mutex<BinaryHeap<Reverse<Entry<M>>>>,
    seq: AtomicU64,
    dequeue_count: AtomicU64,
    max_depth: Option<u32>,
}

impl<M> PriorityQueue<M> {
    pub fn new(max_depth: Option<u32>) -> Self {
        PriorityQueue {
            system: Mutex::new(BinaryHeap::new()),
            process: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            dequeue_count: AtomicU64::new(0),
            max_depth,
        }
    }

    /// Enqueue `message` under `header`. Silently drops (with a warning) any
    /// message whose depth exceeds `max_depth`, per spec.md §4.A.
    pub fn enqueue(&self, header: MessageHeader, message: M) {
        if let Some(max_depth) = self.max_depth {
            if header.depth > max_depth {
                warn!(
                    message_type = %header.message_type,
                    message_id = %header.message_id,
                    depth = header.depth,
                    "depth max reached, dropping message"
                );
                return;
            }
        }

        let entry = Entry {
            key: header.priority_tuple(),
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            header,
            message,
        };

        let heap = if entry.header.system_message {
            &self.system
        } else {
            &self.process
        };
        heap.lock().unwrap().push(Reverse(entry));
    }

    /// Pop the highest-priority message, preferring the system queue over
    /// the process queue whenever the system queue is non-empty (ported
    /// from `receive`'s try-system-then-process fallback).
    pub fn dequeue(&self) -> Option<(MessageHeader, M)> {
        if self.is_empty() {
            return None;
        }

        // Aging must land on the entries still sitting in the heaps before
        // the one about to be returned is popped out of them, so the 100th
        // dequeue itself observes the aged priority.
        let count = self.dequeue_count.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        if count % AGING_INTERVAL == 0 {
            self.age();
        }

        let popped = {
            let mut system = self.system.lock().unwrap();
            match system.pop() {
                Some(Reverse(entry)) => Some(entry),
                None => {
                    drop(system);
                    self.process.lock().unwrap().pop().map(|Reverse(e)| e)
                }
            }
        };

        let entry = popped?;
        Some((entry.header, entry.message))
    }

    /// Decrement the priority of every queued entry by one and rebuild both
    /// heaps, system queue first then process queue — a fixed lock order to
    /// avoid deadlocking against a concurrent enqueue/dequeue.
    fn age(&self) {
        Self::age_heap(&self.system);
        Self::age_heap(&self.process);
    }

    fn age_heap(heap: &Mutex<BinaryHeap<Reverse<Entry<M>>>>) {
        let mut guard = heap.lock().unwrap();
        let mut entries: Vec<Entry<M>> = std::mem::take(&mut *guard).into_iter().map(|Reverse(e)| e).collect();
        for entry in &mut entries {
            entry.header.priority -= 1;
            entry.key = entry.header.priority_tuple();
        }
        *guard = entries.into_iter().map(Reverse).collect();
    }

    pub fn is_empty(&self) -> bool {
        self.system.lock().unwrap().is_empty() && self.process.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.system.lock().unwrap().len() + self.process.lock().unwrap().len()
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::record::Record;

/// A group of reads moved through the queue as a unit.
pub type Batch = Vec<Record>;

/// Bounded FIFO of read batches between the producer and the workers.
///
/// Positions are monotonic; the slot index is taken modulo capacity only
/// inside the guarded deque, so residency is always `write_pos - read_pos`
/// and never wraps. The producer is the only caller of `enqueue`; any
/// number of workers may call `dequeue`.
pub struct BatchQueue {
    slots: Mutex<VecDeque<Batch>>,
    not_full: Condvar,
    not_empty: Condvar,
    write_pos: AtomicU64,
    read_pos: AtomicU64,
    produce_finished: AtomicBool,
    capacity: usize,
}

impl BatchQueue {
    pub fn new(capacity: usize) -> Self {
        BatchQueue {
            slots: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            write_pos: AtomicU64::new(0),
            read_pos: AtomicU64::new(0),
            produce_finished: AtomicBool::new(false),
            capacity,
        }
    }

    /// Install a batch, blocking while the queue holds `capacity` batches.
    pub fn enqueue(&self, batch: Batch) {
        let mut slots = self.slots.lock().unwrap();
        while slots.len() >= self.capacity {
            slots = self.not_full.wait(slots).unwrap();
        }
        slots.push_back(batch);
        self.write_pos.fetch_add(1, Ordering::Release);
        self.not_empty.notify_one();
    }

    /// Take the oldest batch. Returns `None` only once the producer has
    /// finished and every enqueued batch has been handed out.
    pub fn dequeue(&self) -> Option<Batch> {
        let mut slots = self.slots.lock().unwrap();
        loop {
            if let Some(batch) = slots.pop_front() {
                self.read_pos.fetch_add(1, Ordering::Release);
                self.not_full.notify_one();
                return Some(batch);
            }
            if self.produce_finished.load(Ordering::Acquire) {
                return None;
            }
            slots = self.not_empty.wait(slots).unwrap();
        }
    }

    /// Signal that no further batches will be enqueued and wake waiters.
    pub fn mark_produce_finished(&self) {
        let _slots = self.slots.lock().unwrap();
        self.produce_finished.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    pub fn produce_finished(&self) -> bool {
        self.produce_finished.load(Ordering::Acquire)
    }

    /// Batches enqueued but not yet handed to a worker. Lock-free, used by
    /// the producer for backpressure polling.
    pub fn residency(&self) -> u64 {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        w.saturating_sub(r)
    }

    /// Total batches enqueued so far.
    pub fn enqueued(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn batch_of(n: usize) -> Batch {
        (0..n)
            .map(|i| Record::new(format!("r{}", i), b"ACGT".to_vec(), b"IIII".to_vec()))
            .collect()
    }

    #[test]
    fn test_fifo_order_and_counts() {
        let q = BatchQueue::new(4);
        q.enqueue(batch_of(1));
        q.enqueue(batch_of(2));
        q.mark_produce_finished();
        assert_eq!(q.enqueued(), 2);
        assert_eq!(q.dequeue().unwrap().len(), 1);
        assert_eq!(q.dequeue().unwrap().len(), 2);
        assert!(q.dequeue().is_none());
        assert_eq!(q.residency(), 0);
    }

    #[test]
    fn test_empty_finished_returns_none() {
        let q = BatchQueue::new(4);
        q.mark_produce_finished();
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_enqueue_blocks_at_capacity() {
        let q = Arc::new(BatchQueue::new(2));
        q.enqueue(batch_of(1));
        q.enqueue(batch_of(1));
        let q2 = q.clone();
        let handle = std::thread::spawn(move || {
            // blocks until the main thread dequeues
            q2.enqueue(batch_of(1));
            q2.mark_produce_finished();
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(q.residency(), 2);
        let mut seen = 0;
        while q.dequeue().is_some() {
            seen += 1;
        }
        handle.join().unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_every_batch_consumed_exactly_once() {
        for workers in [1usize, 2, 8] {
            let q = Arc::new(BatchQueue::new(16));
            let consumed = Arc::new(AtomicU64::new(0));
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let q = q.clone();
                    let consumed = consumed.clone();
                    std::thread::spawn(move || {
                        while let Some(batch) = q.dequeue() {
                            consumed.fetch_add(batch.len() as u64, Ordering::Relaxed);
                        }
                    })
                })
                .collect();
            let total_batches = 100;
            for _ in 0..total_batches {
                q.enqueue(batch_of(3));
            }
            q.mark_produce_finished();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(q.enqueued(), total_batches);
            assert_eq!(consumed.load(Ordering::Relaxed), total_batches * 3);
        }
    }
}

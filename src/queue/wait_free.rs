//! Bounded MPMC ring with shared buffer ownership and no locks.
//!
//! Each slot carries a sequence number. A producer may write slot `pos %
//! capacity` only when its sequence equals `pos`; a consumer may read it only
//! when the sequence equals `pos + 1`. Claiming a position is a single CAS on
//! the tail (producers) or head (consumers) cursor. Because sequences grow
//! monotonically a recycled slot can never be mistaken for a fresh one, which
//! rules out ABA on the cursors.
//!
//! Buffers travel as `Arc<Buffer>`: the producer may keep its own handle, and
//! the payload is freed when the last handle drops, whichever side that is.

use crate::queue::buffer::{Buffer, Message, SharedMessage};
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<SharedMessage>>,
}

/// Bounded lock-free multi-producer/multi-consumer queue of shared buffers.
pub struct WaitFreeQueue {
    slots: Box<[Slot]>,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// Slots are handed out exclusively through the sequence protocol; the payload
// type itself is Send + Sync.
unsafe impl Send for WaitFreeQueue {}
unsafe impl Sync for WaitFreeQueue {}

impl WaitFreeQueue {
    /// Create a queue holding at most `capacity` messages (sentinels count).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue without blocking. On a full queue the message is handed back.
    pub fn try_enqueue(&self, msg: SharedMessage) -> Result<(), SharedMessage> {
        let cap = self.slots.len();
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % cap];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(msg) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The slot still holds the message from one lap ago.
                return Err(msg);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Enqueue a shared buffer without blocking.
    #[inline]
    pub fn try_enqueue_buffer(&self, buffer: Arc<Buffer>) -> Result<(), SharedMessage> {
        self.try_enqueue(Message::Buffer(buffer))
    }

    /// Enqueue the termination sentinel without blocking.
    #[inline]
    pub fn try_finish(&self) -> bool {
        self.try_enqueue(Message::Finished).is_ok()
    }

    /// Dequeue without blocking. `None` means empty at this instant.
    pub fn try_dequeue(&self) -> Option<SharedMessage> {
        let cap = self.slots.len();
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % cap];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let msg = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq.store(pos.wrapping_add(cap), Ordering::Release);
                        return Some(msg);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Enqueue, spinning then yielding for up to `timeout` while full.
    pub fn enqueue_timeout(
        &self,
        msg: SharedMessage,
        timeout: Duration,
    ) -> Result<(), SharedMessage> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        let mut msg = msg;
        loop {
            match self.try_enqueue(msg) {
                Ok(()) => return Ok(()),
                Err(rejected) if Instant::now() >= deadline => return Err(rejected),
                Err(rejected) => msg = rejected,
            }
            backoff.snooze();
        }
    }

    /// Dequeue, spinning then yielding for up to `timeout` while empty.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<SharedMessage> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if let Some(msg) = self.try_dequeue() {
                return Some(msg);
            }
            if Instant::now() >= deadline {
                return None;
            }
            backoff.snooze();
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Messages currently queued (a snapshot under concurrency).
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.slots.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }
}

impl Drop for WaitFreeQueue {
    fn drop(&mut self) {
        // Release the Arc handles still parked in the ring.
        while self.try_dequeue().is_some() {}
    }
}

impl std::fmt::Debug for WaitFreeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitFreeQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn tagged(tag: u8) -> Arc<Buffer> {
        Arc::new(Buffer::from_bytes(16, &[tag]))
    }

    fn tag_of(msg: SharedMessage) -> u8 {
        msg.into_buffer().expect("expected a buffer").as_slice()[0]
    }

    #[test]
    fn test_fifo_round_trip() {
        let queue = WaitFreeQueue::new(3);
        for tag in 1..=3 {
            queue.try_enqueue_buffer(tagged(tag)).unwrap();
        }
        assert!(queue.is_full());
        let tags: Vec<u8> = (0..3).map(|_| tag_of(queue.try_dequeue().unwrap())).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sentinel_after_data() {
        let queue = WaitFreeQueue::new(4);
        queue.try_enqueue_buffer(tagged(9)).unwrap();
        assert!(queue.try_finish());

        assert_eq!(tag_of(queue.try_dequeue().unwrap()), 9);
        assert!(queue.try_dequeue().unwrap().is_finished());
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_timed_ops_give_up_at_deadline() {
        let queue = WaitFreeQueue::new(1);
        assert!(queue.dequeue_timeout(Duration::from_millis(5)).is_none());

        queue.try_enqueue_buffer(tagged(1)).unwrap();
        let rejected = queue
            .enqueue_timeout(Message::Buffer(tagged(2)), Duration::from_millis(5))
            .unwrap_err();
        assert_eq!(tag_of(rejected), 2);
        assert_eq!(tag_of(queue.dequeue_timeout(Duration::from_millis(5)).unwrap()), 1);
    }

    #[test]
    fn test_full_queue_hands_buffer_back() {
        let queue = WaitFreeQueue::new(1);
        queue.try_enqueue_buffer(tagged(1)).unwrap();
        let rejected = queue.try_enqueue_buffer(tagged(2)).unwrap_err();
        assert_eq!(tag_of(rejected), 2);
        assert_eq!(tag_of(queue.try_dequeue().unwrap()), 1);
    }

    #[test]
    fn test_wraps_around_many_laps() {
        let queue = WaitFreeQueue::new(2);
        for round in 0..100u8 {
            queue.try_enqueue_buffer(tagged(round)).unwrap();
            assert_eq!(tag_of(queue.try_dequeue().unwrap()), round);
        }
    }

    #[test]
    fn test_shared_ownership_is_released() {
        let buffer = tagged(5);
        let queue = WaitFreeQueue::new(4);
        queue.try_enqueue_buffer(Arc::clone(&buffer)).unwrap();
        queue.try_enqueue_buffer(Arc::clone(&buffer)).unwrap();
        assert_eq!(Arc::strong_count(&buffer), 3);

        let first = queue.try_dequeue().unwrap();
        drop(first);
        assert_eq!(Arc::strong_count(&buffer), 2);

        // The second handle is released when the queue is dropped.
        drop(queue);
        assert_eq!(Arc::strong_count(&buffer), 1);
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2000;

        let queue = Arc::new(WaitFreeQueue::new(64));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut msg = Message::Buffer(tagged((p * 31 + i) as u8));
                        while let Err(back) = queue.try_enqueue(msg) {
                            msg = back;
                            thread::yield_now();
                        }
                    }
                    while !queue.try_finish() {
                        thread::yield_now();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut received = 0usize;
                    loop {
                        match queue.try_dequeue() {
                            Some(Message::Buffer(_)) => received += 1,
                            Some(Message::Finished) => return received,
                            None => thread::yield_now(),
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn prop_fifo_order(tags in proptest::collection::vec(any::<u8>(), 1..64)) {
            let queue = WaitFreeQueue::new(tags.len());
            for &tag in &tags {
                prop_assert!(queue.try_enqueue_buffer(tagged(tag)).is_ok());
            }
            for &tag in &tags {
                prop_assert_eq!(tag_of(queue.try_dequeue().unwrap()), tag);
            }
            prop_assert!(queue.try_dequeue().is_none());
        }
    }
}

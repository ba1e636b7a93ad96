//! Bounded MPMC queue with exclusive buffer ownership.
//!
//! Built on a bounded crossbeam channel: the queue keeps both halves, so any
//! number of producers and consumers can share one `ConcurrentQueue` (or
//! clones of it). Enqueue moves the `Box<Buffer>` in, dequeue moves it out;
//! no other party can observe the buffer while it is in transit.

use crate::queue::buffer::{Buffer, Message, OwnedMessage};
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::time::Duration;

/// Bounded multi-producer/multi-consumer queue of exclusively owned buffers.
#[derive(Clone)]
pub struct ConcurrentQueue {
    tx: Sender<OwnedMessage>,
    rx: Receiver<OwnedMessage>,
    capacity: usize,
}

impl ConcurrentQueue {
    /// Create a queue holding at most `capacity` messages (sentinels count).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue without blocking.
    ///
    /// On a full queue the message is handed back untouched so the caller
    /// keeps ownership of the buffer.
    pub fn try_enqueue(&self, msg: OwnedMessage) -> Result<(), OwnedMessage> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => Err(msg),
            // Unreachable while `self.rx` is alive.
            Err(TrySendError::Disconnected(msg)) => Err(msg),
        }
    }

    /// Enqueue a buffer without blocking.
    #[inline]
    pub fn try_enqueue_buffer(&self, buffer: Box<Buffer>) -> Result<(), OwnedMessage> {
        self.try_enqueue(Message::Buffer(buffer))
    }

    /// Enqueue the termination sentinel without blocking.
    #[inline]
    pub fn try_finish(&self) -> bool {
        self.try_enqueue(Message::Finished).is_ok()
    }

    /// Dequeue without blocking. `None` means empty at this instant.
    pub fn try_dequeue(&self) -> Option<OwnedMessage> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Enqueue, blocking up to `timeout` for a free slot.
    pub fn enqueue_timeout(
        &self,
        msg: OwnedMessage,
        timeout: Duration,
    ) -> Result<(), OwnedMessage> {
        match self.tx.send_timeout(msg, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(msg)) | Err(SendTimeoutError::Disconnected(msg)) => {
                Err(msg)
            }
        }
    }

    /// Dequeue, blocking up to `timeout` for a message.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<OwnedMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages currently queued (a snapshot under concurrency).
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }
}

impl std::fmt::Debug for ConcurrentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn tagged(tag: u8) -> Box<Buffer> {
        Box::new(Buffer::from_bytes(16, &[tag]))
    }

    fn tag_of(msg: OwnedMessage) -> u8 {
        msg.into_buffer().expect("expected a buffer").as_slice()[0]
    }

    #[test]
    fn test_fifo_round_trip() {
        let queue = ConcurrentQueue::new(4);
        for tag in 1..=4 {
            queue.try_enqueue_buffer(tagged(tag)).unwrap();
        }
        let tags: Vec<u8> = (0..4).map(|_| tag_of(queue.try_dequeue().unwrap())).collect();
        assert_eq!(tags, vec![1, 2, 3, 4]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_sentinel_after_data() {
        let queue = ConcurrentQueue::new(4);
        queue.try_enqueue_buffer(tagged(1)).unwrap();
        queue.try_enqueue_buffer(tagged(2)).unwrap();
        assert!(queue.try_finish());

        assert_eq!(tag_of(queue.try_dequeue().unwrap()), 1);
        assert_eq!(tag_of(queue.try_dequeue().unwrap()), 2);
        assert!(queue.try_dequeue().unwrap().is_finished());
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_full_queue_hands_buffer_back() {
        let queue = ConcurrentQueue::new(2);
        queue.try_enqueue_buffer(tagged(1)).unwrap();
        queue.try_enqueue_buffer(tagged(2)).unwrap();
        assert!(queue.is_full());

        let rejected = queue.try_enqueue_buffer(tagged(3)).unwrap_err();
        assert_eq!(tag_of(rejected), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_timeouts_do_not_hang() {
        let queue = ConcurrentQueue::new(1);
        assert!(queue.dequeue_timeout(Duration::from_millis(5)).is_none());

        queue.try_enqueue_buffer(tagged(1)).unwrap();
        let rejected = queue
            .enqueue_timeout(Message::Finished, Duration::from_millis(5))
            .unwrap_err();
        assert!(rejected.is_finished());
    }

    #[test]
    fn test_consumer_thread_stops_on_sentinel() {
        let queue = ConcurrentQueue::new(8);
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    match queue.try_dequeue() {
                        Some(Message::Buffer(b)) => seen.push(b.as_slice()[0]),
                        Some(Message::Finished) => break,
                        None => thread::yield_now(),
                    }
                }
                seen
            })
        };

        for tag in 0..3 {
            queue.try_enqueue_buffer(tagged(tag)).unwrap();
        }
        assert!(queue.try_finish());

        assert_eq!(consumer.join().unwrap(), vec![0, 1, 2]);
    }

    proptest! {
        #[test]
        fn prop_fifo_order(tags in proptest::collection::vec(any::<u8>(), 1..64)) {
            let queue = ConcurrentQueue::new(tags.len());
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

//! Integration tests for the buffer queues under concurrency
//!
//! These tests validate the contract shared by both queues:
//! - FIFO per producer across threads
//! - Sentinel delivery
//! - Bounded retry through the poller

use colexec::config::PollSettings;
use colexec::queue::{poll_until, Buffer, ConcurrentQueue, Message, WaitFreeQueue};
use std::sync::Arc;
use std::thread;

const PRODUCERS: u8 = 3;
const PER_PRODUCER: u32 = 500;

fn tagged(producer: u8, seq: u32) -> Buffer {
    let mut buf = Buffer::new(8);
    buf.write(&[producer]);
    buf.write(&seq.to_le_bytes());
    buf
}

fn untag(buf: &Buffer) -> (u8, u32) {
    let bytes = buf.as_slice();
    (bytes[0], u32::from_le_bytes(bytes[1..5].try_into().unwrap()))
}

fn settings() -> PollSettings {
    PollSettings {
        park_interval_us: 10,
        timeout_ms: 10_000,
    }
}

fn check_per_producer_order(received: &[(u8, u32)]) {
    let mut next = vec![0u32; PRODUCERS as usize];
    for &(producer, seq) in received {
        assert_eq!(seq, next[producer as usize], "producer {producer} out of order");
        next[producer as usize] += 1;
    }
    assert!(next.iter().all(|&n| n == PER_PRODUCER));
}

#[test]
fn test_concurrent_queue_mpsc_order() {
    let queue = ConcurrentQueue::new(16);
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let mut pending = Some(Message::Buffer(Box::new(tagged(p, seq))));
                    poll_until(&settings(), "queue slot", || {
                        let m = pending.take()?;
                        match queue.try_enqueue(m) {
                            Ok(()) => Some(()),
                            Err(back) => {
                                pending = Some(back);
                                None
                            }
                        }
                    })
                    .unwrap();
                }
                poll_until(&settings(), "sentinel slot", || queue.try_finish().then_some(())).unwrap();
            })
        })
        .collect();

    let mut received = Vec::new();
    let mut finished = 0;
    while finished < PRODUCERS {
        match poll_until(&settings(), "message", || queue.try_dequeue()).unwrap() {
            Message::Buffer(b) => received.push(untag(&b)),
            Message::Finished => finished += 1,
        }
    }
    for p in producers {
        p.join().unwrap();
    }

    check_per_producer_order(&received);
    assert!(queue.is_empty());
}

#[test]
fn test_wait_free_queue_mpsc_order() {
    let queue = Arc::new(WaitFreeQueue::new(16));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let buffer = Arc::new(tagged(p, seq));
                    poll_until(&settings(), "queue slot", || {
                        queue.try_enqueue_buffer(Arc::clone(&buffer)).ok()
                    })
                    .unwrap();
                }
                poll_until(&settings(), "sentinel slot", || queue.try_finish().then_some(())).unwrap();
            })
        })
        .collect();

    let mut received = Vec::new();
    let mut finished = 0;
    while finished < PRODUCERS {
        match poll_until(&settings(), "message", || queue.try_dequeue()).unwrap() {
            Message::Buffer(b) => received.push(untag(&b)),
            Message::Finished => finished += 1,
        }
    }
    for p in producers {
        p.join().unwrap();
    }

    check_per_producer_order(&received);
    assert!(queue.is_empty());
}

#[test]
fn test_nothing_after_sentinel() {
    let exclusive = ConcurrentQueue::new(8);
    let shared = WaitFreeQueue::new(8);
    for seq in 0..5 {
        exclusive.try_enqueue_buffer(Box::new(tagged(0, seq))).unwrap();
        shared.try_enqueue_buffer(Arc::new(tagged(0, seq))).unwrap();
    }
    assert!(exclusive.try_finish());
    assert!(shared.try_finish());

    for seq in 0..5 {
        assert_eq!(untag(&exclusive.try_dequeue().unwrap().into_buffer().unwrap()), (0, seq));
        assert_eq!(untag(&shared.try_dequeue().unwrap().into_buffer().unwrap()), (0, seq));
    }
    assert!(exclusive.try_dequeue().unwrap().is_finished());
    assert!(shared.try_dequeue().unwrap().is_finished());
    assert!(exclusive.try_dequeue().is_none());
    assert!(shared.try_dequeue().is_none());
}

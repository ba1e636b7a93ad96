//! Buffers and the two queues that move them between stages.
//!
//! # Queue Variants
//!
//! | Queue | Payload | Ownership | Synchronization |
//! |-------|---------|-----------|-----------------|
//! | [`ConcurrentQueue`] | `Box<Buffer>` | exclusive, moved in and out | bounded crossbeam channel |
//! | [`WaitFreeQueue`] | `Arc<Buffer>` | shared, freed on last drop | sequence-numbered ring, CAS only |
//!
//! Both are bounded, MPMC and FIFO, and both carry [`Message::Finished`] as
//! the end-of-stream sentinel. The two types stay separate so callers pick
//! the ownership model explicitly.
//!
//! Enqueue on a full queue and dequeue on an empty queue fail immediately;
//! loops that must wait go through [`Poller`].

pub mod buffer;
pub mod concurrent;
pub mod poll;
pub mod wait_free;

pub use buffer::{Buffer, Message, OwnedMessage, SharedMessage, DEFAULT_BUFFER_SIZE};
pub use concurrent::ConcurrentQueue;
pub use poll::{poll_until, Poller};
pub use wait_free::WaitFreeQueue;

//! Exchanges: the queues that carry a child tier's output to its parent.
//!
//! A child task's sink writes into the exchange through an [`ExchangeWriter`]
//! and posts one termination sentinel when it is done. The parent's exchange
//! source reads through an [`ExchangeReader`], which counts sentinels and
//! reports end-of-input once every producer has finished.
//!
//! A parent starts once all of its children have started, and drains the
//! exchange while they are still producing. The queue is bounded: a full
//! exchange hands the buffer back to the writer ([`ExchangeWriter::try_send`])
//! and an empty one reports [`Pull::Pending`] to the reader. Neither is an
//! error; a pipeline task yields its slice and retries on the next one.

use crate::config::PollSettings;
use crate::error::Result;
use crate::pipeline::stage::ScanReader;
use crate::queue::{Buffer, ConcurrentQueue, Message, Poller, WaitFreeQueue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Queue flavour backing an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMode {
    /// `ConcurrentQueue`: buffers move as `Box<Buffer>`.
    #[default]
    Exclusive,
    /// `WaitFreeQueue`: buffers move as `Arc<Buffer>`.
    Shared,
}

impl fmt::Display for ExchangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeMode::Exclusive => write!(f, "exclusive"),
            ExchangeMode::Shared => write!(f, "shared"),
        }
    }
}

/// Slots of an exchange with `producers` children, `per_child` in-flight
/// buffers each plus one sentinel per child.
pub fn exchange_capacity(producers: usize, per_child: usize) -> usize {
    producers.saturating_mul(per_child.saturating_add(1))
}

/// Handle to one exchange queue. Clones share the same queue.
#[derive(Clone)]
pub enum Exchange {
    Exclusive(ConcurrentQueue),
    Shared(Arc<WaitFreeQueue>),
}

impl Exchange {
    pub fn new(mode: ExchangeMode, capacity: usize) -> Self {
        match mode {
            ExchangeMode::Exclusive => Exchange::Exclusive(ConcurrentQueue::new(capacity)),
            ExchangeMode::Shared => Exchange::Shared(Arc::new(WaitFreeQueue::new(capacity))),
        }
    }

    pub fn mode(&self) -> ExchangeMode {
        match self {
            Exchange::Exclusive(_) => ExchangeMode::Exclusive,
            Exchange::Shared(_) => ExchangeMode::Shared,
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            Exchange::Exclusive(q) => q.capacity(),
            Exchange::Shared(q) => q.capacity(),
        }
    }

    /// Messages currently queued, sentinels included.
    pub fn len(&self) -> usize {
        match self {
            Exchange::Exclusive(q) => q.len(),
            Exchange::Shared(q) => q.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writer for one producing child.
    pub fn writer(&self) -> ExchangeWriter {
        ExchangeWriter {
            exchange: self.clone(),
            sent: 0,
            bytes: 0,
            finished: false,
        }
    }

    /// Reader that ends after `producers` sentinels.
    pub fn reader(&self, producers: usize, poll: PollSettings) -> ExchangeReader {
        ExchangeReader {
            exchange: self.clone(),
            remaining_producers: producers,
            poll,
            received: 0,
        }
    }

    /// Hand `buffer` back when the queue is full.
    fn try_send(&self, buffer: Box<Buffer>) -> std::result::Result<(), Box<Buffer>> {
        let rejected = match self {
            Exchange::Exclusive(q) => q.try_enqueue_buffer(buffer).err(),
            Exchange::Shared(q) => q
                .try_enqueue_buffer(Arc::from(buffer))
                .err()
                .map(|msg| msg.map(unshare)),
        };
        match rejected {
            None => Ok(()),
            Some(Message::Buffer(buffer)) => Err(buffer),
            Some(Message::Finished) => unreachable!("only buffers are sent through try_send"),
        }
    }

    fn try_finish(&self) -> bool {
        match self {
            Exchange::Exclusive(q) => q.try_finish(),
            Exchange::Shared(q) => q.try_finish(),
        }
    }

    fn try_receive(&self) -> Option<Message<Box<Buffer>>> {
        match self {
            Exchange::Exclusive(q) => q.try_dequeue(),
            Exchange::Shared(q) => q.try_dequeue().map(|msg| msg.map(unshare)),
        }
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("mode", &self.mode())
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Take the buffer out of its `Arc`, copying only if another handle is alive.
fn unshare(shared: Arc<Buffer>) -> Box<Buffer> {
    match Arc::try_unwrap(shared) {
        Ok(buffer) => Box::new(buffer),
        Err(shared) => Box::new(Buffer::clone(&shared)),
    }
}

/// Outcome of one non-blocking read from an exchange.
#[derive(Debug)]
pub enum Pull {
    Buffer(Box<Buffer>),
    /// Nothing queued right now; some producer has not finished yet.
    Pending,
    /// Every producer posted its sentinel and the queue is drained.
    Exhausted,
}

/// Producer side of an exchange, owned by one child task's sink.
#[derive(Debug)]
pub struct ExchangeWriter {
    exchange: Exchange,
    sent: u64,
    bytes: u64,
    finished: bool,
}

impl ExchangeWriter {
    /// Forward one buffer without blocking. A full exchange hands it back.
    pub fn try_send(&mut self, buffer: Box<Buffer>) -> std::result::Result<(), Box<Buffer>> {
        let len = buffer.len() as u64;
        self.exchange.try_send(buffer)?;
        self.sent += 1;
        self.bytes += len;
        Ok(())
    }

    /// Forward one buffer, retrying while the exchange is full.
    ///
    /// Fails with [`ExecError::Timeout`](crate::ExecError::Timeout) when the
    /// poll deadline passes first.
    pub fn send(&mut self, buffer: Box<Buffer>, poll: &PollSettings) -> Result<()> {
        let mut poller = Poller::new(poll);
        let mut buffer = buffer;
        loop {
            match self.try_send(buffer) {
                Ok(()) => return Ok(()),
                Err(rejected) => buffer = rejected,
            }
            poller.wait("exchange capacity")?;
        }
    }

    /// Post this producer's termination sentinel without blocking.
    ///
    /// Returns `false` while the exchange is full. Idempotent once posted.
    pub fn try_finish(&mut self) -> bool {
        if !self.finished {
            self.finished = self.exchange.try_finish();
        }
        self.finished
    }

    /// Post the sentinel, retrying while the exchange is full.
    pub fn finish(&mut self, poll: &PollSettings) -> Result<()> {
        let mut poller = Poller::new(poll);
        while !self.try_finish() {
            poller.wait("exchange capacity for the sentinel")?;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Consumer side of an exchange, used as the parent task's source.
pub struct ExchangeReader {
    exchange: Exchange,
    remaining_producers: usize,
    poll: PollSettings,
    received: u64,
}

impl ExchangeReader {
    /// Producers whose sentinel has not arrived yet.
    pub fn remaining_producers(&self) -> usize {
        self.remaining_producers
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Read without blocking, consuming any sentinels on the way.
    pub fn try_next(&mut self) -> Pull {
        while self.remaining_producers > 0 {
            match self.exchange.try_receive() {
                Some(Message::Buffer(buffer)) => {
                    self.received += 1;
                    return Pull::Buffer(buffer);
                }
                Some(Message::Finished) => self.remaining_producers -= 1,
                None => return Pull::Pending,
            }
        }
        Pull::Exhausted
    }
}

impl ScanReader for ExchangeReader {
    /// Blocking read: polls until a buffer arrives, every producer finished,
    /// or the poll deadline passes.
    fn next_buffer(&mut self) -> Result<Option<Box<Buffer>>> {
        let mut poller = Poller::new(&self.poll);
        loop {
            match self.try_next() {
                Pull::Buffer(buffer) => return Ok(Some(buffer)),
                Pull::Exhausted => return Ok(None),
                Pull::Pending => poller.wait("exchange input")?,
            }
        }
    }
}

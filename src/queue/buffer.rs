//! Fixed-capacity data buffers and the queue message that carries them.
//!
//! A `Buffer` is allocated once by a producer stage and then only moves:
//! through a `ConcurrentQueue` as `Box<Buffer>` (exclusive) or through a
//! `WaitFreeQueue` as `Arc<Buffer>` (shared). The payload is never copied on
//! the way.

/// Default buffer capacity in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Opaque fixed-capacity payload moved between pipeline stages.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Allocate a buffer and fill it with `bytes`, truncating at capacity.
    pub fn from_bytes(capacity: usize, bytes: &[u8]) -> Self {
        let mut buf = Self::new(capacity);
        buf.write(bytes);
        buf
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Bytes still available for writing.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    /// Append bytes. Returns how many were written (less than `bytes.len()`
    /// when the buffer fills up).
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        n
    }

    /// Reset the fill length for reuse. Contents are not zeroed.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The written bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The written bytes, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}

/// Item carried by both buffer queues.
///
/// `Finished` is the termination sentinel: the producer will not enqueue
/// anything else. A consumer that receives it stops polling and forwards its
/// own sentinel downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<B> {
    Buffer(B),
    Finished,
}

impl<B> Message<B> {
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self, Message::Finished)
    }

    /// The carried buffer, or `None` for the sentinel.
    #[inline]
    pub fn into_buffer(self) -> Option<B> {
        match self {
            Message::Buffer(b) => Some(b),
            Message::Finished => None,
        }
    }

    /// Convert the carried buffer, keeping the sentinel as is.
    pub fn map<C>(self, f: impl FnOnce(B) -> C) -> Message<C> {
        match self {
            Message::Buffer(b) => Message::Buffer(f(b)),
            Message::Finished => Message::Finished,
        }
    }
}

impl<B> From<Option<B>> for Message<B> {
    /// `None` maps to the sentinel, mirroring a null buffer.
    fn from(value: Option<B>) -> Self {
        match value {
            Some(b) => Message::Buffer(b),
            None => Message::Finished,
        }
    }
}

/// Message carrying an exclusively owned buffer.
pub type OwnedMessage = Message<Box<Buffer>>;

/// Message carrying a shared buffer.
pub type SharedMessage = Message<std::sync::Arc<Buffer>>;

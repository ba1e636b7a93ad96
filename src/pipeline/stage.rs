//! Source, operator and sink descriptors.
//!
//! Two-layer design, as for the rest of the pipeline:
//! - **Built-in kinds** (`SourceType`, `OperatorKind`, `SinkKind`) are closed
//!   enums matched on the hot path.
//! - **Pluggable logic** enters through [`ScanReader`] (produce buffers) and
//!   transform closures (rewrite a buffer in place).
//!
//! Descriptors live on the fragment and are cheap to clone: every task
//! instance gets its own reader from the source's factory, while operator
//! closures are shared.

use crate::error::Result;
use crate::pipeline::id::Partition;
use crate::queue::Buffer;
use std::fmt;
use std::sync::Arc;

// ── Sources ──

/// Where a source reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// External data, read through a per-partition [`ScanReader`].
    Scan,
    /// The combined output of this fragment's child tasks.
    Exchange,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Scan => write!(f, "scan"),
            SourceType::Exchange => write!(f, "exchange"),
        }
    }
}

/// Pull-based producer of buffers for one task instance.
#[cfg_attr(test, mockall::automock)]
pub trait ScanReader: Send {
    /// Next buffer, or `None` once the input is exhausted.
    fn next_buffer(&mut self) -> Result<Option<Box<Buffer>>>;
}

/// Creates the reader for one partition of a scan.
pub type ScanFactory = Arc<dyn Fn(Partition) -> Result<Box<dyn ScanReader>> + Send + Sync>;

/// Wrap a closure as a [`ScanFactory`].
pub fn scan_factory<F>(f: F) -> ScanFactory
where
    F: Fn(Partition) -> Result<Box<dyn ScanReader>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The first stage of a fragment's pipeline.
#[derive(Clone)]
pub struct Source {
    name: String,
    source_type: SourceType,
    factory: Option<ScanFactory>,
}

impl Source {
    /// A scan source whose readers come from `factory`.
    pub fn scan(name: impl Into<String>, factory: ScanFactory) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::Scan,
            factory: Some(factory),
        }
    }

    /// A scan source built from a plain closure.
    pub fn scan_with<F, R>(name: impl Into<String>, make_reader: F) -> Self
    where
        F: Fn(Partition) -> R + Send + Sync + 'static,
        R: ScanReader + 'static,
    {
        Self::scan(
            name,
            scan_factory(move |partition| Ok(Box::new(make_reader(partition)))),
        )
    }

    /// An exchange source. Bound to its child tasks at build time.
    pub fn exchange(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::Exchange,
            factory: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    /// Open the reader for `partition`. Only scan sources carry a factory.
    pub(crate) fn open_scan(&self, partition: Partition) -> Option<Result<Box<dyn ScanReader>>> {
        self.factory.as_ref().map(|factory| factory(partition))
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("source_type", &self.source_type)
            .finish()
    }
}

/// Built-in scan that emits a fixed number of buffers per partition.
///
/// Each buffer starts with the partition index and a sequence number (both
/// little-endian `u32`), which is enough to check routing and ordering.
pub struct SyntheticScan {
    partition: Partition,
    buffer_size: usize,
    remaining: usize,
    next_seq: u32,
}

impl SyntheticScan {
    /// Header bytes written into every buffer.
    pub const HEADER_LEN: usize = 8;

    pub fn new(partition: Partition, buffers: usize, buffer_size: usize) -> Self {
        Self {
            partition,
            buffer_size: buffer_size.max(Self::HEADER_LEN),
            remaining: buffers,
            next_seq: 0,
        }
    }

    /// Factory producing `buffers_per_partition` buffers for every partition.
    pub fn factory(buffers_per_partition: usize, buffer_size: usize) -> ScanFactory {
        scan_factory(move |partition| {
            Ok(Box::new(SyntheticScan::new(
                partition,
                buffers_per_partition,
                buffer_size,
            )))
        })
    }

    /// Decode `(partition index, sequence)` from a buffer this scan produced.
    pub fn decode(buffer: &Buffer) -> Option<(u32, u32)> {
        let bytes = buffer.as_slice();
        if bytes.len() < Self::HEADER_LEN {
            return None;
        }
        let partition = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let seq = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        Some((partition, seq))
    }
}

impl ScanReader for SyntheticScan {
    fn next_buffer(&mut self) -> Result<Option<Box<Buffer>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let mut buffer = Box::new(Buffer::new(self.buffer_size));
        buffer.write(&self.partition.index.to_le_bytes());
        buffer.write(&self.next_seq.to_le_bytes());
        self.next_seq += 1;
        Ok(Some(buffer))
    }
}

// ── Operators ──

/// In-place buffer transformation shared by every task instance.
pub type TransformFn = Arc<dyn Fn(&mut Buffer, Partition) -> Result<()> + Send + Sync>;

/// What an operator does to each buffer.
#[derive(Clone)]
pub enum OperatorKind {
    /// Forward the buffer untouched.
    PassThrough,
    /// Rewrite the buffer in place.
    Transform(TransformFn),
}

/// A middle stage of a fragment's pipeline.
#[derive(Clone)]
pub struct Operator {
    name: String,
    kind: OperatorKind,
}

impl Operator {
    pub fn pass_through(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OperatorKind::PassThrough,
        }
    }

    pub fn transform<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Buffer, Partition) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: OperatorKind::Transform(Arc::new(f)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    #[inline]
    pub(crate) fn apply(&self, buffer: &mut Buffer, partition: Partition) -> Result<()> {
        match &self.kind {
            OperatorKind::PassThrough => Ok(()),
            OperatorKind::Transform(f) => f(buffer, partition),
        }
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            OperatorKind::PassThrough => "pass_through",
            OperatorKind::Transform(_) => "transform",
        };
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

// ── Sinks ──

/// What a sink does with buffers when it is the end of the task tree.
///
/// A sink whose task feeds a parent exchange forwards instead, whatever its
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// Keep every buffer as the task result.
    Materialize,
    /// Count buffers and bytes, drop the payload.
    Discard,
}

/// The last stage of a fragment's pipeline.
#[derive(Debug, Clone)]
pub struct Sink {
    name: String,
    kind: SinkKind,
}

impl Sink {
    pub fn new(name: impl Into<String>, kind: SinkKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn materialize(name: impl Into<String>) -> Self {
        Self::new(name, SinkKind::Materialize)
    }

    pub fn discard(name: impl Into<String>) -> Self {
        Self::new(name, SinkKind::Discard)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;

    #[test]
    fn test_synthetic_scan_emits_tagged_buffers() {
        let mut scan = SyntheticScan::new(Partition::new(2, 4), 3, 64);
        let mut seen = Vec::new();
        while let Some(buffer) = scan.next_buffer().unwrap() {
            assert_eq!(buffer.capacity(), 64);
            seen.push(SyntheticScan::decode(&buffer).unwrap());
        }
        assert_eq!(seen, vec![(2, 0), (2, 1), (2, 2)]);
    }

    #[test]
    fn test_synthetic_scan_minimum_buffer_size() {
        let mut scan = SyntheticScan::new(Partition::SINGLE, 1, 1);
        let buffer = scan.next_buffer().unwrap().unwrap();
        assert_eq!(buffer.capacity(), SyntheticScan::HEADER_LEN);
    }

    #[test]
    fn test_source_factory_per_partition() {
        let source = Source::scan("scan", SyntheticScan::factory(2, 32));
        assert_eq!(source.source_type(), SourceType::Scan);

        let mut reader = source.open_scan(Partition::new(1, 2)).unwrap().unwrap();
        let first = reader.next_buffer().unwrap().unwrap();
        assert_eq!(SyntheticScan::decode(&first), Some((1, 0)));
    }

    #[test]
    fn test_exchange_source_has_no_factory() {
        let source = Source::exchange("exchange");
        assert_eq!(source.source_type(), SourceType::Exchange);
        assert!(source.open_scan(Partition::SINGLE).is_none());
    }

    #[test]
    fn test_operator_apply() {
        let mut buffer = Buffer::from_bytes(8, b"abc");
        Operator::pass_through("noop")
            .apply(&mut buffer, Partition::SINGLE)
            .unwrap();
        assert_eq!(buffer.as_slice(), b"abc");

        let upper = Operator::transform("upper", |buf: &mut Buffer, _| {
            buf.as_mut_slice().make_ascii_uppercase();
            Ok(())
        });
        upper.apply(&mut buffer, Partition::SINGLE).unwrap();
        assert_eq!(buffer.as_slice(), b"ABC");
    }

    #[test]
    fn test_operator_error_is_returned() {
        let failing = Operator::transform("boom", |_: &mut Buffer, _| {
            Err(ExecError::Config("bad operator".to_string()))
        });
        let mut buffer = Buffer::new(4);
        assert!(failing.apply(&mut buffer, Partition::SINGLE).is_err());
    }

    #[test]
    fn test_mock_scan_reader() {
        let mut reader = MockScanReader::new();
        let mut calls = 0;
        reader.expect_next_buffer().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(Some(Box::new(Buffer::from_bytes(4, b"x"))))
            } else {
                Ok(None)
            }
        });

        assert!(reader.next_buffer().unwrap().is_some());
        assert!(reader.next_buffer().unwrap().is_none());
    }
}

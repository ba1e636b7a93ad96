//! Scripted scan readers for driving failure paths

use colexec::pipeline::{scan_factory, Partition, ScanFactory, ScanReader, SyntheticScan};
use colexec::{Buffer, ExecError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Emits `ok_buffers` buffers, then fails
pub struct FailingScan {
    inner: SyntheticScan,
    ok_buffers: usize,
    message: String,
}

impl FailingScan {
    pub fn new(partition: Partition, ok_buffers: usize, message: &str) -> Self {
        Self {
            inner: SyntheticScan::new(partition, ok_buffers, 64),
            ok_buffers,
            message: message.to_string(),
        }
    }
}

impl ScanReader for FailingScan {
    fn next_buffer(&mut self) -> Result<Option<Box<Buffer>>> {
        if self.ok_buffers == 0 {
            return Err(ExecError::Config(self.message.clone()));
        }
        self.ok_buffers -= 1;
        self.inner.next_buffer()
    }
}

/// Synthetic scan whose partition `failing` errors out after `ok_buffers`
pub fn scan_failing_on(failing: usize, buffers: usize, ok_buffers: usize) -> ScanFactory {
    scan_factory(move |partition| {
        if partition.index() == failing {
            Ok(Box::new(FailingScan::new(partition, ok_buffers, "injected read failure"))
                as Box<dyn ScanReader>)
        } else {
            Ok(Box::new(SyntheticScan::new(partition, buffers, 64)) as Box<dyn ScanReader>)
        }
    })
}

/// Synthetic scan that counts how many readers were opened
pub fn counting_scan(buffers: usize, opened: Arc<AtomicUsize>) -> ScanFactory {
    scan_factory(move |partition| {
        opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticScan::new(partition, buffers, 64)) as Box<dyn ScanReader>)
    })
}

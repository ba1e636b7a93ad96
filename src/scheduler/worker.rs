//! Worker thread loop.
//!
//! Each worker owns the receiving end of one bounded task queue. It pins
//! itself to its CPU, reports readiness to `Scheduler::init`, then executes
//! task slices until every sender is dropped. A slice that yields leaves the
//! task `Running`; the executor submits it again in a later round.

use crate::error::{ExecError, Result};
use crate::pipeline::{Task, TaskProgress};
use crate::scheduler::affinity;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-worker counters, updated by the worker and read by `Scheduler::stats`.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub(crate) executed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) abandoned: AtomicU64,
}

/// Everything a worker thread needs, moved into the thread at spawn.
pub(crate) struct Worker {
    pub(crate) index: usize,
    pub(crate) cpu: usize,
    pub(crate) pin: bool,
    pub(crate) strict_affinity: bool,
    pub(crate) tasks: Receiver<Task>,
    pub(crate) abandon: Arc<AtomicBool>,
    pub(crate) counters: Arc<WorkerCounters>,
}

impl Worker {
    /// Thread body. `ready` receives exactly one message.
    pub(crate) fn run(self, ready: Sender<Result<()>>) {
        if let Err(e) = self.pin() {
            if self.strict_affinity {
                let _ = ready.send(Err(e));
                return;
            }
            tracing::warn!(worker = self.index, cpu = self.cpu, error = %e, "running unpinned");
        }

        tracing::info!(worker = self.index, cpu = self.cpu, "worker started");
        let _ = ready.send(Ok(()));
        drop(ready);

        while let Ok(task) = self.tasks.recv() {
            if self.abandon.load(Ordering::Acquire) {
                task.abandon("scheduler shut down before the task ran");
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.execute(&task);
        }

        tracing::info!(
            worker = self.index,
            cpu = self.cpu,
            executed = self.counters.executed.load(Ordering::Relaxed),
            "worker stopped"
        );
    }

    fn pin(&self) -> Result<()> {
        if !self.pin {
            return Ok(());
        }
        affinity::pin_current_thread(self.cpu)
    }

    fn execute(&self, task: &Task) {
        match task.execute() {
            Ok(progress) => {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                if let TaskProgress::Yielded(reason) = progress {
                    tracing::trace!(worker = self.index, task = %task.id(), ?reason, "task yielded");
                }
            }
            Err(ExecError::TaskFailed(failure)) => {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker = self.index, %failure, "task failed on worker");
            }
            Err(e @ ExecError::InvalidTaskState { .. }) => {
                // Already terminal, or another worker is driving it and will
                // record the outcome.
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker = self.index, task = %task.id(), error = %e, "task rejected by worker");
            }
            Err(e) => {
                // Dispatched before its children started, or failed to
                // initialize. Fail it so waiters are released.
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker = self.index, task = %task.id(), error = %e, "task not run");
                task.abandon(e.to_string());
            }
        }
    }
}

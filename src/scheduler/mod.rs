//! Worker pool with one pinned thread and one task queue per CPU.
//!
//! # Architecture
//!
//! ```text
//! dispatch_task(q, task) ──► queue[q % n] ──► worker n (pinned to cpu_ids[n])
//!                                                │
//!                                                └─► task.execute() (one slice)
//! ```
//!
//! - [`Scheduler`] - Handle owning the queues and worker threads
//! - [`SchedulerStats`] - Per-worker counters snapshot
//! - [`eligible_cpus`] - CPU ids left after applying a mask
//!
//! There is no work stealing: a task runs on the worker it was dispatched
//! to. Placement policy belongs to the caller (see
//! [`Placement`](crate::pipeline::Placement)).
//!
//! # Example
//!
//! ```ignore
//! use colexec::config::SchedulerConfig;
//! use colexec::scheduler::{eligible_cpus, Scheduler};
//!
//! let config = SchedulerConfig::default();
//! let scheduler = Scheduler::init(eligible_cpus(&config.cpu_mask), &config)?;
//! scheduler.dispatch_task(0, task.clone())?;
//! task.wait();
//! scheduler.uninit();
//! ```

pub mod affinity;
mod worker;

pub use affinity::{available_cpus, current_cpu, eligible_cpus, pin_current_thread};

use crate::config::{SchedulerConfig, ShutdownPolicy};
use crate::error::{ExecError, Result};
use crate::pipeline::{Task, TaskProgress};
use crossbeam_channel::{bounded, Sender};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use worker::{Worker, WorkerCounters};

/// Counters of one worker at the time of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub cpu: usize,
    /// Task slices the worker ran (successfully or not)
    pub executed: u64,
    /// Tasks that ended failed on this worker
    pub failed: u64,
    /// Tasks turned away because another worker was driving them or they
    /// were already terminal
    pub rejected: u64,
    /// Tasks dropped unrun at shutdown
    pub abandoned: u64,
    /// Tasks waiting in the worker's queue
    pub queued: usize,
}

/// Snapshot of every worker's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub workers: Vec<WorkerStats>,
}

impl SchedulerStats {
    pub fn total_executed(&self) -> u64 {
        self.workers.iter().map(|w| w.executed).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }

    pub fn total_rejected(&self) -> u64 {
        self.workers.iter().map(|w| w.rejected).sum()
    }

    pub fn total_abandoned(&self) -> u64 {
        self.workers.iter().map(|w| w.abandoned).sum()
    }
}

/// Handle to a running worker pool.
///
/// Dropping the handle shuts the pool down as [`uninit`](Self::uninit) does.
pub struct Scheduler {
    senders: RwLock<Option<Vec<Sender<Task>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cpu_ids: Vec<usize>,
    counters: Vec<Arc<WorkerCounters>>,
    abandon: Arc<AtomicBool>,
    shutdown: ShutdownPolicy,
}

impl Scheduler {
    /// Start one worker per distinct CPU id in `cpus`.
    ///
    /// Returns once every worker has pinned itself (or, without
    /// `strict_affinity`, given up on pinning) and is ready for tasks.
    pub fn init(cpus: impl IntoIterator<Item = usize>, config: &SchedulerConfig) -> Result<Self> {
        let cpu_ids: Vec<usize> = cpus.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if cpu_ids.is_empty() {
            return Err(ExecError::Config(
                "scheduler needs at least one CPU".to_string(),
            ));
        }
        if config.worker_queue_capacity == 0 {
            return Err(ExecError::Config(
                "worker_queue_capacity must be > 0".to_string(),
            ));
        }

        let abandon = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<()>>(cpu_ids.len());
        let mut senders = Vec::with_capacity(cpu_ids.len());
        let mut handles = Vec::with_capacity(cpu_ids.len());
        let mut counters = Vec::with_capacity(cpu_ids.len());

        for (index, &cpu) in cpu_ids.iter().enumerate() {
            let (tx, rx) = bounded(config.worker_queue_capacity);
            let worker_counters = Arc::new(WorkerCounters::default());
            let worker = Worker {
                index,
                cpu,
                pin: config.pin_threads,
                strict_affinity: config.strict_affinity,
                tasks: rx,
                abandon: Arc::clone(&abandon),
                counters: Arc::clone(&worker_counters),
            };

            let ready = ready_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, cpu))
                .spawn(move || worker.run(ready));

            match spawned {
                Ok(handle) => {
                    senders.push(tx);
                    handles.push(handle);
                    counters.push(worker_counters);
                }
                Err(e) => {
                    teardown(senders, handles);
                    return Err(ExecError::Io(e).with_context(format!(
                        "Failed to spawn worker for cpu {}",
                        cpu
                    )));
                }
            }
        }
        drop(ready_tx);

        let mut first_error = None;
        for _ in 0..cpu_ids.len() {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => break,
            }
        }
        if let Some(e) = first_error {
            tracing::error!(error = %e, "worker failed to start, tearing down scheduler");
            teardown(senders, handles);
            return Err(e);
        }

        tracing::info!(
            workers = cpu_ids.len(),
            cpus = ?cpu_ids,
            pinned = config.pin_threads,
            shutdown = %config.shutdown,
            "scheduler initialized"
        );

        Ok(Self {
            senders: RwLock::new(Some(senders)),
            handles: Mutex::new(handles),
            cpu_ids,
            counters,
            abandon,
            shutdown: config.shutdown,
        })
    }

    /// Stop accepting tasks and join every worker. Idempotent.
    ///
    /// Queued tasks are run ([`ShutdownPolicy::Drain`]) or failed without
    /// running ([`ShutdownPolicy::Abandon`]).
    pub fn uninit(&self) {
        if self.shutdown == ShutdownPolicy::Abandon {
            self.abandon.store(true, Ordering::Release);
        }

        let senders = self
            .senders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if senders.is_none() {
            return;
        }
        drop(senders);

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }

        let stats = self.stats();
        tracing::info!(
            executed = stats.total_executed(),
            failed = stats.total_failed(),
            rejected = stats.total_rejected(),
            abandoned = stats.total_abandoned(),
            "scheduler stopped"
        );
    }

    /// Queue `task` on worker `queue_id % worker_count()`.
    ///
    /// Blocks while that worker's queue is full. Fails with
    /// [`ExecError::SchedulerStopped`] after [`uninit`](Self::uninit).
    pub fn dispatch_task(&self, queue_id: usize, task: Task) -> Result<()> {
        let guard = self.senders.read().unwrap_or_else(|e| e.into_inner());
        let Some(senders) = guard.as_ref() else {
            tracing::error!(task = %task.id(), "dispatch on a stopped scheduler");
            return Err(ExecError::SchedulerStopped);
        };

        let worker = queue_id % senders.len();
        senders[worker].send(task).map_err(|e| {
            tracing::error!(task = %e.0.id(), worker, "worker queue disconnected");
            ExecError::SchedulerStopped
        })
    }

    /// Execute one slice of `task` on the calling thread, bypassing the
    /// worker queues.
    pub fn run_task(task: &Task) -> Result<TaskProgress> {
        task.execute()
    }

    pub fn is_running(&self) -> bool {
        self.senders
            .read()
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    pub fn worker_count(&self) -> usize {
        self.cpu_ids.len()
    }

    /// CPU id of each worker, by worker index.
    pub fn cpu_ids(&self) -> &[usize] {
        &self.cpu_ids
    }

    pub fn stats(&self) -> SchedulerStats {
        let guard = self.senders.read().unwrap_or_else(|e| e.into_inner());
        let workers = self
            .cpu_ids
            .iter()
            .zip(&self.counters)
            .enumerate()
            .map(|(index, (&cpu, counters))| WorkerStats {
                cpu,
                executed: counters.executed.load(Ordering::Relaxed),
                failed: counters.failed.load(Ordering::Relaxed),
                rejected: counters.rejected.load(Ordering::Relaxed),
                abandoned: counters.abandoned.load(Ordering::Relaxed),
                queued: guard.as_ref().map_or(0, |s| s[index].len()),
            })
            .collect();
        SchedulerStats { workers }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.uninit();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cpu_ids", &self.cpu_ids)
            .field("running", &self.is_running())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

fn teardown(senders: Vec<Sender<Task>>, handles: Vec<JoinHandle<()>>) {
    drop(senders);
    for handle in handles {
        let _ = handle.join();
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Tunables for the scheduler, exchanges and poll loops
//!
//! These are the sections of [`EngineConfig`](super::EngineConfig). Every
//! field has a serde default so partial config files are accepted.
//!
//! # Main Types
//!
//! - [`SchedulerConfig`] - Worker pool shape, CPU mask, shutdown behavior
//! - [`ExchangeConfig`] - Sizing and mode of child→parent exchanges
//! - [`PollSettings`] - Backoff used by every non-blocking retry loop

use crate::pipeline::ExchangeMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default capacity of each worker's runnable-task queue
pub const DEFAULT_WORKER_QUEUE_CAPACITY: usize = 4096;

/// Default exchange slots reserved per child task
pub const DEFAULT_EXCHANGE_CAPACITY_PER_CHILD: usize = 1024;

/// Default park interval once spinning is exhausted, in microseconds
pub const DEFAULT_PARK_INTERVAL_US: u64 = 50;

/// Default give-up time for poll loops, in milliseconds
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 30_000;

/// What `uninit` does with tasks still sitting in worker queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run every queued task before the worker exits
    #[default]
    Drain,
    /// Fail queued tasks without running them
    Abandon,
}

impl std::fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPolicy::Drain => write!(f, "drain"),
            ShutdownPolicy::Abandon => write!(f, "abandon"),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// CPU ids excluded from the worker pool (e.g. reserved for interrupts)
    #[serde(default)]
    pub cpu_mask: Vec<usize>,

    /// Capacity of each worker's runnable queue
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,

    /// Pin each worker thread to its CPU
    #[serde(default = "default_true")]
    pub pin_threads: bool,

    /// Fail `init` when a worker cannot be pinned instead of running unpinned
    #[serde(default)]
    pub strict_affinity: bool,

    /// Behavior of `uninit` for queued tasks
    #[serde(default)]
    pub shutdown: ShutdownPolicy,

    /// Prefix for worker thread names
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_worker_queue_capacity() -> usize {
    DEFAULT_WORKER_QUEUE_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_thread_name_prefix() -> String {
    "colexec-worker".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cpu_mask: Vec::new(),
            worker_queue_capacity: DEFAULT_WORKER_QUEUE_CAPACITY,
            pin_threads: true,
            strict_affinity: false,
            shutdown: ShutdownPolicy::Drain,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

/// Exchange sizing and default mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Queue slots per child task feeding an exchange
    #[serde(default = "default_exchange_capacity_per_child")]
    pub capacity_per_child: usize,

    /// Mode used by fragments that do not set one explicitly
    #[serde(default)]
    pub default_mode: ExchangeMode,
}

fn default_exchange_capacity_per_child() -> usize {
    DEFAULT_EXCHANGE_CAPACITY_PER_CHILD
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            capacity_per_child: DEFAULT_EXCHANGE_CAPACITY_PER_CHILD,
            default_mode: ExchangeMode::default(),
        }
    }
}

/// Backoff for non-blocking retry loops: spin, then yield, then park
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Sleep between polls once spinning and yielding are exhausted
    #[serde(default = "default_park_interval_us")]
    pub park_interval_us: u64,

    /// Give up after this long (0 = wait forever)
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_park_interval_us() -> u64 {
    DEFAULT_PARK_INTERVAL_US
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT_MS
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            park_interval_us: DEFAULT_PARK_INTERVAL_US,
            timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

impl PollSettings {
    pub fn park_interval(&self) -> Duration {
        Duration::from_micros(self.park_interval_us.max(1))
    }

    /// `None` when the loop may wait forever
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Settings with an explicit timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }
}

//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use colexec::config::{PollSettings, SchedulerConfig};
use std::time::Duration;

/// Upper bound for any single wait in integration tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Scheduler config that never pins (CI containers often restrict affinity)
pub fn unpinned_config() -> SchedulerConfig {
    SchedulerConfig {
        pin_threads: false,
        ..SchedulerConfig::default()
    }
}

/// Poll settings that give up quickly
pub fn fast_poll() -> PollSettings {
    PollSettings {
        park_interval_us: 10,
        timeout_ms: 500,
    }
}

/// CPU ids for a pool of `n` workers (ids need not exist when unpinned)
pub fn cpu_ids(n: usize) -> Vec<usize> {
    (0..n).collect()
}

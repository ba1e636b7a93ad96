//! Bounded backoff for non-blocking retry loops.
//!
//! `try_enqueue` / `try_dequeue` never block. Callers that must eventually
//! succeed retry through a [`Poller`]: a few rounds of spinning, then
//! `yield_now`, then short parks, and an optional deadline. Cooperative
//! callers use [`Poller::snooze`] and yield their slice once it gives up.

use crate::config::PollSettings;
use crate::error::{ExecError, Result};
use crossbeam_utils::Backoff;
use std::time::{Duration, Instant};

/// Retry pacing for one poll loop.
pub struct Poller {
    backoff: Backoff,
    park_interval: Duration,
    deadline: Option<Instant>,
    attempts: u64,
}

impl Poller {
    pub fn new(settings: &PollSettings) -> Self {
        Self {
            backoff: Backoff::new(),
            park_interval: settings.park_interval(),
            deadline: settings.timeout().map(|t| Instant::now() + t),
            attempts: 0,
        }
    }

    /// Pause before the next attempt.
    ///
    /// Fails with [`ExecError::Timeout`] once the deadline has passed; `what`
    /// names the awaited condition in the error.
    pub fn wait(&mut self, what: &str) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ExecError::Timeout(format!(
                    "gave up waiting for {} after {} attempts",
                    what, self.attempts
                )));
            }
        }

        self.attempts += 1;
        if self.backoff.is_completed() {
            std::thread::park_timeout(self.park_interval);
        } else {
            self.backoff.snooze();
        }
        Ok(())
    }

    /// One spin or yield step without parking.
    ///
    /// Returns `false` once the backoff is exhausted: the caller should give
    /// its thread back instead of waiting longer.
    pub fn snooze(&mut self) -> bool {
        if self.backoff.is_completed() {
            return false;
        }
        self.attempts += 1;
        self.backoff.snooze();
        true
    }

    /// Start spinning again after progress was made.
    pub fn reset(&mut self) {
        self.backoff.reset();
    }

    /// Number of times `wait` paused.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

/// Retry `attempt` until it yields a value or the poll deadline passes.
pub fn poll_until<T>(
    settings: &PollSettings,
    what: &str,
    mut attempt: impl FnMut() -> Option<T>,
) -> Result<T> {
    let mut poller = Poller::new(settings);
    loop {
        if let Some(value) = attempt() {
            return Ok(value);
        }
        poller.wait(what)?;
    }
}

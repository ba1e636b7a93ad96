//! Error handling for the execution core
//!
//! This module defines the crate-wide error type and a Result alias used by
//! fragment compilation, task execution, queues and the scheduler.

use crate::pipeline::id::{FragmentId, TaskId};
use thiserror::Error;

/// A task failure as observed by the task itself and everything above it.
///
/// `origin` is the task whose stage actually failed; `task` is the task that
/// carries the failure (equal to `origin` for the failing task, an ancestor
/// once the failure has propagated upward).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: TaskId,
    pub origin: TaskId,
    pub message: String,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.task == self.origin {
            write!(f, "task {} failed: {}", self.task, self.message)
        } else {
            write!(
                f,
                "task {} failed because child {} failed: {}",
                self.task, self.origin, self.message
            )
        }
    }
}

/// Main error type for execution-core operations
#[derive(Error, Debug)]
pub enum ExecError {
    /// A fragment tree that cannot be compiled into tasks
    #[error("Invalid fragment {fragment}: {reason}")]
    InvalidFragment { fragment: FragmentId, reason: String },

    /// A source, operator or sink raised an error while running
    #[error("Stage '{stage}' of task {task} failed: {message}")]
    Stage {
        task: TaskId,
        stage: String,
        message: String,
    },

    /// A task (or one of its descendants) ended in the failed state
    #[error("{0}")]
    TaskFailed(TaskFailure),

    /// Lifecycle call made in the wrong state (double init, run before init)
    #[error("Task {task} is {actual}, expected {expected}")]
    InvalidTaskState {
        task: TaskId,
        expected: &'static str,
        actual: &'static str,
    },

    /// Run requested before every child started
    #[error("Task {task} is not runnable: {pending} child task(s) not started")]
    TaskNotReady { task: TaskId, pending: usize },

    /// A bounded wait expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Dispatch or run attempted on a scheduler that is not running
    #[error("Scheduler is not running")]
    SchedulerStopped,

    /// Worker thread could not be pinned to its CPU
    #[error("Failed to pin worker to cpu {cpu}: {message}")]
    Affinity { cpu: usize, message: String },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ExecError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn invalid_fragment(fragment: FragmentId, reason: impl Into<String>) -> Self {
        ExecError::InvalidFragment {
            fragment,
            reason: reason.into(),
        }
    }
}

/// Result type alias for execution-core operations
pub type Result<T> = std::result::Result<T, ExecError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

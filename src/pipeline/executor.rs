//! Task tree executor: drives one or more task trees in rounds of slices.
//!
//! Each round:
//! 1. Drop terminal tasks; fail every task that has a failed child, without
//!    running it.
//! 2. Collect every remaining task whose children have all started (the
//!    frontier). Leaves are ready from the start, and a parent joins the
//!    frontier while its children are still producing.
//! 3. Run one slice of each frontier task (inline, or dispatched to the
//!    scheduler's workers), children before parents.
//! 4. Wait until every slice of the round ended.
//!
//! Rounds repeat until every root is terminal. A slice yields when the
//! exchange it feeds is full or the one it reads is empty, so a bounded
//! exchange throttles its producers instead of failing them.

use crate::error::{ExecError, Result};
use crate::pipeline::task::{Task, TaskOutput, TaskState};
use crate::scheduler::Scheduler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Round-robin choice of worker queue for dispatched tasks.
#[derive(Debug, Default)]
pub struct Placement {
    next: AtomicUsize,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the rotation at `queue_id`.
    pub fn starting_at(queue_id: usize) -> Self {
        Self {
            next: AtomicUsize::new(queue_id),
        }
    }

    /// Next queue id; the scheduler maps it onto a worker.
    #[inline]
    pub fn next(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Initialize every still-uninitialized task of the tree.
///
/// A task that fails to initialize is marked failed and its ancestors fail
/// when the executor reaches them; the first such error is returned.
pub fn init_tree(root: &Task) -> Result<()> {
    let mut first_error = None;
    for task in root.breadth_first() {
        if task.state() != TaskState::Uninitialized {
            continue;
        }
        if let Err(e) = task.init() {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Run the whole tree on the calling thread and return the root's output.
pub fn execute_inline(root: &Task) -> Result<TaskOutput> {
    drive(std::slice::from_ref(root), "inline", |task| {
        // Stage failures are recorded on the task and picked up by the next
        // round; anything else would leave the task waiting forever.
        match Scheduler::run_task(task) {
            Ok(_) | Err(ExecError::TaskFailed(_)) => {}
            Err(e) => task.abandon(e.to_string()),
        }
        Ok(())
    })?;
    root.get_result()
}

/// Run the tree on the scheduler's workers and return the root's output.
pub fn execute_dispatched(
    scheduler: &Scheduler,
    root: &Task,
    placement: &Placement,
) -> Result<TaskOutput> {
    drive(std::slice::from_ref(root), "dispatched", |task| {
        scheduler.dispatch_task(placement.next(), task.clone())
    })?;
    root.get_result()
}

/// Run every tree of `roots` on the scheduler's workers at once.
///
/// Returns each root's result in order. The outer error is reserved for the
/// run itself going wrong (dispatch refused, nothing runnable).
pub fn execute_all_dispatched(
    scheduler: &Scheduler,
    roots: &[Task],
    placement: &Placement,
) -> Result<Vec<Result<TaskOutput>>> {
    drive(roots, "dispatched", |task| {
        scheduler.dispatch_task(placement.next(), task.clone())
    })?;
    Ok(roots.iter().map(Task::get_result).collect())
}

fn drive(roots: &[Task], mode: &str, mut submit: impl FnMut(&Task) -> Result<()>) -> Result<()> {
    let started = Instant::now();
    // Init errors are recorded on the failing task; the rounds below
    // propagate them to the root.
    for root in roots {
        let _ = init_tree(root);
    }

    // Deepest tasks first, so children run ahead of their parents.
    let mut pending: Vec<Task> = roots.iter().flat_map(Task::breadth_first).collect();
    pending.reverse();
    let mut rounds = 0usize;
    let mut slices = 0usize;

    while !roots.iter().all(|r| r.state().is_terminal()) {
        rounds += 1;
        let mut frontier = Vec::new();
        let mut failed_now = 0usize;

        pending.retain(|task| {
            if task.state().is_terminal() {
                return false;
            }
            if let Some(failure) = task.failed_child() {
                task.fail_from_child(&failure);
                failed_now += 1;
                return !task.state().is_terminal();
            }
            if task.unstarted_children() == 0 {
                frontier.push(task.clone());
            }
            true
        });

        if frontier.is_empty() && failed_now == 0 {
            abandon_all(&pending, "executor found nothing runnable");
            return Err(ExecError::InvalidTaskState {
                task: roots[0].id(),
                expected: "a runnable task in the tree",
                actual: roots[0].state().as_str(),
            });
        }

        tracing::trace!(round = rounds, ready = frontier.len(), failed = failed_now, "executor round");

        let mut submitted = Vec::with_capacity(frontier.len());
        let mut refused = None;
        for (i, task) in frontier.iter().enumerate() {
            let seen = task.slices();
            if let Err(e) = submit(task) {
                for unsent in &frontier[i..] {
                    unsent.abandon(e.to_string());
                }
                refused = Some(e);
                break;
            }
            submitted.push((task, seen));
        }
        for (task, seen) in &submitted {
            task.wait_slice(*seen);
        }
        slices += submitted.len();

        if let Some(e) = refused {
            abandon_all(&pending, e.to_string());
            return Err(e);
        }
    }

    // Producers left behind by a root that failed while they were running.
    abandon_all(&pending, "root finished before this task");

    tracing::debug!(
        roots = roots.len(),
        mode,
        rounds,
        slices,
        elapsed_us = started.elapsed().as_micros() as u64,
        "task trees finished"
    );
    Ok(())
}

fn abandon_all(tasks: &[Task], reason: impl Into<String>) {
    let reason = reason.into();
    for task in tasks {
        task.abandon(reason.as_str());
    }
}

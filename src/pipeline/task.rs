//! Runnable task instances and their lifecycle.
//!
//! A [`Task`] is one instance of a fragment's pipeline, bound to a partition.
//! Tasks form a tree mirroring the fragment tree: a task owns its children,
//! and may start once every child has started.
//!
//! # Lifecycle
//!
//! ```text
//!                                   (slice yields)
//!                                  ┌─────────────┐
//!                                  ▼             │
//! Uninitialized --init--> Initialized --run--> Running --> Completed
//!        |                     |                   |
//!        +---------------------+-------------------+-----> Failed
//! ```
//!
//! `run` drives one slice: it pulls buffers until the source is exhausted,
//! or until the exchange it reads is empty or the exchange it feeds is full.
//! In the last two cases the task yields ([`TaskProgress::Yielded`]), stays
//! `Running` and keeps its runtime state for the next slice. At most one
//! thread drives a task at a time.
//!
//! `Completed` and `Failed` are terminal. A task whose child failed is failed
//! without running again (see [`Task::fail_from_child`]).
//!
//! `Task` is a cheap handle (`Arc` inside): the tree owns the task, dispatch
//! queues and waiters hold clones.

use crate::config::PollSettings;
use crate::error::{ExecError, Result, TaskFailure};
use crate::pipeline::exchange::{Exchange, ExchangeReader, ExchangeWriter, Pull};
use crate::pipeline::id::{Partition, TaskId};
use crate::pipeline::stage::{Operator, ScanReader, Sink, SinkKind, Source, SourceType};
use crate::queue::{Buffer, Poller};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Uninitialized,
    Initialized,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Uninitialized => "uninitialized",
            TaskState::Initialized => "initialized",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    /// `Completed` or `Failed`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Past `Initialized`: the task ran at least one slice or failed.
    #[inline]
    pub fn has_started(self) -> bool {
        matches!(
            self,
            TaskState::Running | TaskState::Completed | TaskState::Failed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a slice ended before the task completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YieldReason {
    /// The exchange this task feeds stayed full.
    OutputFull,
    /// The exchange this task reads stayed empty.
    InputEmpty,
}

/// Outcome of one [`Task::run`] slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskProgress {
    Completed,
    Yielded(YieldReason),
}

impl TaskProgress {
    #[inline]
    pub fn is_completed(self) -> bool {
        self == TaskProgress::Completed
    }
}

/// Discriminator for task variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Pipeline,
}

/// What a completed task produced.
#[derive(Debug)]
pub enum TaskOutput {
    /// Every buffer the sink received, in arrival order.
    Buffers(Vec<Box<Buffer>>),
    /// Buffers forwarded to the parent's exchange.
    Forwarded { buffers: u64, bytes: u64 },
    /// Buffers counted and dropped.
    Discarded { buffers: u64, bytes: u64 },
}

impl TaskOutput {
    /// Number of buffers that reached the sink.
    pub fn buffer_count(&self) -> u64 {
        match self {
            TaskOutput::Buffers(buffers) => buffers.len() as u64,
            TaskOutput::Forwarded { buffers, .. } | TaskOutput::Discarded { buffers, .. } => {
                *buffers
            }
        }
    }

    /// Payload bytes that reached the sink.
    pub fn byte_count(&self) -> u64 {
        match self {
            TaskOutput::Buffers(buffers) => buffers.iter().map(|b| b.len() as u64).sum(),
            TaskOutput::Forwarded { bytes, .. } | TaskOutput::Discarded { bytes, .. } => *bytes,
        }
    }

    /// The materialized buffers; empty for forwarded or discarded output.
    pub fn into_buffers(self) -> Vec<Box<Buffer>> {
        match self {
            TaskOutput::Buffers(buffers) => buffers,
            TaskOutput::Forwarded { .. } | TaskOutput::Discarded { .. } => Vec::new(),
        }
    }
}

/// Stages shared by every task instance of one fragment.
#[derive(Debug)]
pub(crate) struct PipelineTemplate {
    pub(crate) source: Source,
    pub(crate) operators: Vec<Operator>,
    pub(crate) sink: Sink,
}

/// Input side of a task whose source is an exchange.
#[derive(Debug, Clone)]
pub(crate) struct ExchangeInput {
    pub(crate) exchange: Exchange,
    pub(crate) producers: usize,
}

/// Handle to a node of the task tree.
#[derive(Clone)]
pub enum Task {
    Pipeline(Arc<PipelineTask>),
}

impl Task {
    pub fn id(&self) -> TaskId {
        match self {
            Task::Pipeline(t) => t.id,
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Task::Pipeline(_) => TaskType::Pipeline,
        }
    }

    pub fn partition(&self) -> Partition {
        match self {
            Task::Pipeline(t) => t.partition,
        }
    }

    pub fn state(&self) -> TaskState {
        match self {
            Task::Pipeline(t) => t.state(),
        }
    }

    pub fn children(&self) -> &[Task] {
        match self {
            Task::Pipeline(t) => &t.children,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }

    /// The failure recorded on a failed task.
    pub fn failure(&self) -> Option<TaskFailure> {
        match self {
            Task::Pipeline(t) => t.lock().failure.clone(),
        }
    }

    /// Open the source and prepare the sink. Valid once, from `Uninitialized`.
    pub fn init(&self) -> Result<()> {
        match self {
            Task::Pipeline(t) => t.init(),
        }
    }

    /// Drive one slice of the pipeline on the calling thread.
    ///
    /// Requires `Initialized` (or `Running` and idle) and every child started.
    pub fn run(&self) -> Result<TaskProgress> {
        match self {
            Task::Pipeline(t) => t.run_slice(false),
        }
    }

    /// `init` (when still uninitialized) followed by one `run` slice.
    ///
    /// Both steps happen under the task lock, so two threads executing the
    /// same task never both drive it.
    pub fn execute(&self) -> Result<TaskProgress> {
        match self {
            Task::Pipeline(t) => t.run_slice(true),
        }
    }

    /// Slices finished so far, including the one that completed or failed.
    pub fn slices(&self) -> u64 {
        match self {
            Task::Pipeline(t) => t.lock().slices,
        }
    }

    /// Block until a slice newer than `seen` ended or the task is terminal.
    pub(crate) fn wait_slice(&self, seen: u64) {
        match self {
            Task::Pipeline(t) => t.wait_slice(seen),
        }
    }

    /// Block until the task is terminal, then take its output.
    ///
    /// The output can be taken once; a failed task returns its failure.
    pub fn get_result(&self) -> Result<TaskOutput> {
        match self {
            Task::Pipeline(t) => t.take_result(None),
        }
    }

    /// Like [`get_result`](Self::get_result) with an upper bound on the wait.
    pub fn get_result_timeout(&self, timeout: Duration) -> Result<TaskOutput> {
        match self {
            Task::Pipeline(t) => t.take_result(Some(timeout)),
        }
    }

    /// Block until the task is terminal and return that state.
    pub fn wait(&self) -> TaskState {
        match self {
            Task::Pipeline(t) => t.wait_terminal(None),
        }
    }

    /// Block until the task is terminal or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> TaskState {
        match self {
            Task::Pipeline(t) => t.wait_terminal(Some(timeout)),
        }
    }

    /// Fail this task because a child failed.
    ///
    /// No-op on a terminal task or one a thread is currently driving.
    pub fn fail_from_child(&self, child: &TaskFailure) {
        match self {
            Task::Pipeline(t) => t.fail(child.origin, child.message.clone()),
        }
    }

    /// Fail this task without running it (scheduler shut down, dispatch refused).
    pub fn abandon(&self, reason: impl Into<String>) {
        match self {
            Task::Pipeline(t) => t.fail(t.id, reason.into()),
        }
    }

    /// The first failure among the direct children, if any.
    pub fn failed_child(&self) -> Option<TaskFailure> {
        self.children().iter().find_map(|c| c.failure())
    }

    /// Children that have not started yet.
    pub fn unstarted_children(&self) -> usize {
        self.children()
            .iter()
            .filter(|c| !c.state().has_started())
            .count()
    }

    /// Every task of the tree, root first, breadth-first.
    pub fn breadth_first(&self) -> Vec<Task> {
        let mut order = Vec::new();
        let mut queue = VecDeque::from([self.clone()]);
        while let Some(task) = queue.pop_front() {
            queue.extend(task.children().iter().cloned());
            order.push(task);
        }
        order
    }

    /// Leaf tasks of the tree in breadth-first order.
    pub fn leaves(&self) -> Vec<Task> {
        self.breadth_first()
            .into_iter()
            .filter(Task::is_leaf)
            .collect()
    }

    /// Number of tasks in the tree.
    pub fn tree_size(&self) -> usize {
        1 + self.children().iter().map(Task::tree_size).sum::<usize>()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Pipeline(t) => t.fmt(f),
        }
    }
}

// ── Pipeline task ──

enum SourceState {
    Scan(Box<dyn ScanReader>),
    Exchange(ExchangeReader),
}

impl SourceState {
    fn pull(&mut self) -> Result<Pull> {
        match self {
            SourceState::Scan(reader) => Ok(match reader.next_buffer()? {
                Some(buffer) => Pull::Buffer(buffer),
                None => Pull::Exhausted,
            }),
            SourceState::Exchange(reader) => Ok(reader.try_next()),
        }
    }
}

enum SinkState {
    Materialize(Vec<Box<Buffer>>),
    Discard { buffers: u64, bytes: u64 },
    Forward(ExchangeWriter),
}

impl SinkState {
    /// Accept `buffer`, or hand it back when the downstream exchange is full.
    fn offer(&mut self, buffer: Box<Buffer>) -> Option<Box<Buffer>> {
        match self {
            SinkState::Materialize(out) => out.push(buffer),
            SinkState::Discard { buffers, bytes } => {
                *buffers += 1;
                *bytes += buffer.len() as u64;
            }
            SinkState::Forward(writer) => return writer.try_send(buffer).err(),
        }
        None
    }

    /// Post the downstream sentinel. `false` while the exchange is full.
    fn try_finish(&mut self) -> bool {
        match self {
            SinkState::Forward(writer) => writer.try_finish(),
            SinkState::Materialize(_) | SinkState::Discard { .. } => true,
        }
    }

    fn into_output(self) -> TaskOutput {
        match self {
            SinkState::Materialize(out) => TaskOutput::Buffers(out),
            SinkState::Discard { buffers, bytes } => TaskOutput::Discarded { buffers, bytes },
            SinkState::Forward(writer) => TaskOutput::Forwarded {
                buffers: writer.sent(),
                bytes: writer.bytes(),
            },
        }
    }
}

struct Runtime {
    source: SourceState,
    sink: SinkState,
    /// Processed buffer the sink could not take yet.
    stalled: Option<Box<Buffer>>,
    exhausted: bool,
}

struct TaskInner {
    state: TaskState,
    runtime: Option<Runtime>,
    output: Option<TaskOutput>,
    failure: Option<TaskFailure>,
    /// A thread is driving a slice right now.
    active: bool,
    slices: u64,
    started_at: Option<Instant>,
}

/// A fragment pipeline bound to one partition.
pub struct PipelineTask {
    id: TaskId,
    partition: Partition,
    template: Arc<PipelineTemplate>,
    input: Option<ExchangeInput>,
    output: Option<Exchange>,
    poll: PollSettings,
    children: Vec<Task>,
    inner: Mutex<TaskInner>,
    done: Condvar,
}

impl PipelineTask {
    pub(crate) fn new(
        id: TaskId,
        partition: Partition,
        template: Arc<PipelineTemplate>,
        input: Option<ExchangeInput>,
        output: Option<Exchange>,
        poll: PollSettings,
        children: Vec<Task>,
    ) -> Self {
        Self {
            id,
            partition,
            template,
            input,
            output,
            poll,
            children,
            inner: Mutex::new(TaskInner {
                state: TaskState::Uninitialized,
                runtime: None,
                output: None,
                failure: None,
                active: false,
                slices: 0,
                started_at: None,
            }),
            done: Condvar::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether this task forwards into a parent exchange.
    pub fn forwards(&self) -> bool {
        self.output.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> TaskState {
        self.lock().state
    }

    fn stage_error(&self, stage: &str, err: ExecError) -> ExecError {
        ExecError::Stage {
            task: self.id,
            stage: stage.to_string(),
            message: err.to_string(),
        }
    }

    fn open(&self) -> Result<Runtime> {
        let source_name = self.template.source.name();
        let source = match self.template.source.source_type() {
            SourceType::Scan => match self.template.source.open_scan(self.partition) {
                Some(reader) => {
                    SourceState::Scan(reader.map_err(|e| self.stage_error(source_name, e))?)
                }
                None => {
                    return Err(ExecError::Stage {
                        task: self.id,
                        stage: source_name.to_string(),
                        message: "scan source has no reader factory".to_string(),
                    })
                }
            },
            SourceType::Exchange => match &self.input {
                Some(input) => SourceState::Exchange(
                    input.exchange.reader(input.producers, self.poll.clone()),
                ),
                None => {
                    return Err(ExecError::Stage {
                        task: self.id,
                        stage: source_name.to_string(),
                        message: "exchange source is not bound to an exchange".to_string(),
                    })
                }
            },
        };

        let sink = match &self.output {
            Some(exchange) => SinkState::Forward(exchange.writer()),
            None => match self.template.sink.kind() {
                SinkKind::Materialize => SinkState::Materialize(Vec::new()),
                SinkKind::Discard => SinkState::Discard {
                    buffers: 0,
                    bytes: 0,
                },
            },
        };

        Ok(Runtime {
            source,
            sink,
            stalled: None,
            exhausted: false,
        })
    }

    /// Open the runtime of an uninitialized task. The caller holds the lock
    /// and must notify waiters after releasing it when this fails.
    fn init_locked(&self, inner: &mut TaskInner) -> Result<()> {
        match self.open() {
            Ok(runtime) => {
                inner.runtime = Some(runtime);
                inner.state = TaskState::Initialized;
                tracing::trace!(task = %self.id, "task initialized");
                Ok(())
            }
            Err(e) => {
                let failure = TaskFailure {
                    task: self.id,
                    origin: self.id,
                    message: e.to_string(),
                };
                Self::mark_failed(inner, failure);
                tracing::warn!(task = %self.id, error = %e, "task failed to initialize");
                Err(e)
            }
        }
    }

    fn init(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != TaskState::Uninitialized {
            return Err(ExecError::InvalidTaskState {
                task: self.id,
                expected: TaskState::Uninitialized.as_str(),
                actual: inner.state.as_str(),
            });
        }
        let result = self.init_locked(&mut inner);
        drop(inner);
        if result.is_err() {
            self.done.notify_all();
        }
        result
    }

    /// Claim the task for one slice and take its runtime out of the lock.
    fn claim(&self, init_if_needed: bool) -> Result<Runtime> {
        let mut inner = self.lock();
        if init_if_needed && inner.state == TaskState::Uninitialized {
            if let Err(e) = self.init_locked(&mut inner) {
                drop(inner);
                self.done.notify_all();
                return Err(e);
            }
        }

        let idle = matches!(inner.state, TaskState::Initialized | TaskState::Running);
        if !idle || inner.active {
            return Err(ExecError::InvalidTaskState {
                task: self.id,
                expected: "initialized or yielded",
                actual: if inner.active {
                    "running on another thread"
                } else {
                    inner.state.as_str()
                },
            });
        }
        let Some(runtime) = inner.runtime.take() else {
            return Err(ExecError::InvalidTaskState {
                task: self.id,
                expected: "initialized with a runtime",
                actual: inner.state.as_str(),
            });
        };

        if inner.state == TaskState::Initialized {
            inner.state = TaskState::Running;
            inner.started_at = Some(Instant::now());
            tracing::debug!(task = %self.id, "task running");
        }
        inner.active = true;
        Ok(runtime)
    }

    fn run_slice(&self, init_if_needed: bool) -> Result<TaskProgress> {
        if let Some(failure) = self.children.iter().find_map(|c| c.failure()) {
            self.fail(failure.origin, failure.message.clone());
            return Err(ExecError::TaskFailed(self.failure_or(failure)));
        }
        let pending = self
            .children
            .iter()
            .filter(|c| !c.state().has_started())
            .count();
        if pending > 0 {
            return Err(ExecError::TaskNotReady {
                task: self.id,
                pending,
            });
        }

        let mut runtime = self.claim(init_if_needed)?;
        let outcome = self.drive(&mut runtime);

        let mut inner = self.lock();
        inner.active = false;
        inner.slices += 1;
        let result = match outcome {
            Ok(TaskProgress::Completed) => {
                let output = runtime.sink.into_output();
                let buffers = output.buffer_count();
                inner.output = Some(output);
                inner.state = TaskState::Completed;
                tracing::debug!(
                    task = %self.id,
                    buffers,
                    slices = inner.slices,
                    elapsed_us = inner
                        .started_at
                        .map_or(0, |t| t.elapsed().as_micros() as u64),
                    "task completed"
                );
                Ok(TaskProgress::Completed)
            }
            Ok(TaskProgress::Yielded(reason)) => {
                inner.runtime = Some(runtime);
                tracing::trace!(task = %self.id, ?reason, "task yielded");
                Ok(TaskProgress::Yielded(reason))
            }
            Err(e) => {
                let failure = TaskFailure {
                    task: self.id,
                    origin: self.id,
                    message: e.to_string(),
                };
                Self::mark_failed(&mut inner, failure.clone());
                tracing::warn!(task = %self.id, error = %e, "task failed");
                Err(ExecError::TaskFailed(failure))
            }
        };
        drop(inner);
        self.done.notify_all();
        result
    }

    /// Pull buffers through the operators into the sink until the source is
    /// exhausted or the slice has to yield.
    fn drive(&self, rt: &mut Runtime) -> Result<TaskProgress> {
        let template = &self.template;
        let mut poller = Poller::new(&self.poll);

        loop {
            if let Some(buffer) = rt.stalled.take() {
                if let Some(rejected) = rt.sink.offer(buffer) {
                    rt.stalled = Some(rejected);
                    if !poller.snooze() {
                        return Ok(TaskProgress::Yielded(YieldReason::OutputFull));
                    }
                    continue;
                }
                poller.reset();
            }

            if rt.exhausted {
                if rt.sink.try_finish() {
                    return Ok(TaskProgress::Completed);
                }
                if !poller.snooze() {
                    return Ok(TaskProgress::Yielded(YieldReason::OutputFull));
                }
                continue;
            }

            match rt
                .source
                .pull()
                .map_err(|e| self.stage_error(template.source.name(), e))?
            {
                Pull::Buffer(mut buffer) => {
                    for op in &template.operators {
                        op.apply(&mut buffer, self.partition)
                            .map_err(|e| self.stage_error(op.name(), e))?;
                    }
                    rt.stalled = Some(buffer);
                    poller.reset();
                }
                Pull::Pending => {
                    if !poller.snooze() {
                        return Ok(TaskProgress::Yielded(YieldReason::InputEmpty));
                    }
                }
                Pull::Exhausted => rt.exhausted = true,
            }
        }
    }

    fn mark_failed(inner: &mut TaskInner, failure: TaskFailure) {
        inner.runtime = None;
        inner.output = None;
        inner.failure = Some(failure);
        inner.state = TaskState::Failed;
        inner.active = false;
    }

    fn fail(&self, origin: TaskId, message: String) {
        {
            let mut inner = self.lock();
            // The driving thread records the outcome of its own slice.
            if inner.state.is_terminal() || inner.active {
                return;
            }
            let failure = TaskFailure {
                task: self.id,
                origin,
                message,
            };
            tracing::debug!(task = %self.id, origin = %origin, "task failed without running");
            Self::mark_failed(&mut inner, failure);
        }
        self.done.notify_all();
    }

    fn failure_or(&self, fallback: TaskFailure) -> TaskFailure {
        self.lock().failure.clone().unwrap_or(fallback)
    }

    fn wait_slice(&self, seen: u64) {
        let inner = self.lock();
        let _inner = self
            .done
            .wait_while(inner, |i| !i.state.is_terminal() && i.slices == seen)
            .unwrap_or_else(|e| e.into_inner());
    }

    fn wait_terminal(&self, timeout: Option<Duration>) -> TaskState {
        let inner = self.lock();
        let inner = match timeout {
            None => self
                .done
                .wait_while(inner, |i| !i.state.is_terminal())
                .unwrap_or_else(|e| e.into_inner()),
            Some(timeout) => {
                self.done
                    .wait_timeout_while(inner, timeout, |i| !i.state.is_terminal())
                    .unwrap_or_else(|e| e.into_inner())
                    .0
            }
        };
        inner.state
    }

    fn take_result(&self, timeout: Option<Duration>) -> Result<TaskOutput> {
        let inner = self.lock();
        let mut inner = match timeout {
            None => self
                .done
                .wait_while(inner, |i| !i.state.is_terminal())
                .unwrap_or_else(|e| e.into_inner()),
            Some(timeout) => {
                let (inner, _) = self
                    .done
                    .wait_timeout_while(inner, timeout, |i| !i.state.is_terminal())
                    .unwrap_or_else(|e| e.into_inner());
                if !inner.state.is_terminal() {
                    return Err(ExecError::Timeout(format!(
                        "task {} still {} after {:?}",
                        self.id, inner.state, timeout
                    )));
                }
                inner
            }
        };

        match inner.state {
            TaskState::Completed => inner.output.take().ok_or(ExecError::InvalidTaskState {
                task: self.id,
                expected: "completed with an unread result",
                actual: "completed, result already taken",
            }),
            _ => {
                let failure = inner.failure.clone().unwrap_or_else(|| TaskFailure {
                    task: self.id,
                    origin: self.id,
                    message: "failed without a recorded cause".to_string(),
                });
                Err(ExecError::TaskFailed(failure))
            }
        }
    }
}

impl fmt::Debug for PipelineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("source", &self.template.source.name())
            .field("sink", &self.template.sink.name())
            .field("forwards", &self.forwards())
            .field("children", &self.children.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Fragments and their compilation into task trees.
//!
//! A [`Fragment`] is a pipeline template: one source, zero or more operators,
//! one sink, and optionally a child fragment whose output it reads through an
//! exchange source. `build_tasks` turns a fragment tree into the root tasks
//! that execute it:
//!
//! | Fragment | Child | Result |
//! |----------|-------|--------|
//! | Parallel | none | `N` leaf tasks, one per partition |
//! | Serial | none | 1 leaf task |
//! | Serial | Parallel | 1 task over `N` child tasks sharing one exchange |
//! | Serial | Serial | 1 task over 1 child task |
//! | Parallel | Parallel | `N` tasks, each over 1 child task with its own exchange |
//! | Parallel | Serial | rejected |

use crate::config::{PollSettings, DEFAULT_EXCHANGE_CAPACITY_PER_CHILD};
use crate::error::{ExecError, Result};
use crate::pipeline::exchange::{exchange_capacity, Exchange, ExchangeMode};
use crate::pipeline::id::{FragmentId, Partition, TaskId};
use crate::pipeline::stage::{Operator, Sink, Source, SourceType};
use crate::pipeline::task::{ExchangeInput, PipelineTask, PipelineTemplate, Task};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How many task instances a fragment compiles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// One task per partition.
    Parallel,
    /// Exactly one task.
    Serial,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKind::Parallel => write!(f, "parallel"),
            FragmentKind::Serial => write!(f, "serial"),
        }
    }
}

/// Knobs applied while compiling a fragment tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Exchange slots per child task; a full exchange makes its producers yield
    pub exchange_capacity_per_child: usize,
    /// Mode for fragments that do not choose one
    pub default_exchange_mode: ExchangeMode,
    /// Backoff used before a task yields on a full or empty exchange
    pub poll: PollSettings,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            exchange_capacity_per_child: DEFAULT_EXCHANGE_CAPACITY_PER_CHILD,
            default_exchange_mode: ExchangeMode::default(),
            poll: PollSettings::default(),
        }
    }
}

/// A pipeline template, compiled into one or more tasks.
#[derive(Debug, Clone)]
pub struct Fragment {
    id: FragmentId,
    kind: FragmentKind,
    source: Option<Source>,
    operators: Vec<Operator>,
    sink: Option<Sink>,
    child: Option<Box<Fragment>>,
    exchange_mode: Option<ExchangeMode>,
}

impl Fragment {
    pub fn new(id: FragmentId, kind: FragmentKind) -> Self {
        Self {
            id,
            kind,
            source: None,
            operators: Vec::new(),
            sink: None,
            child: None,
            exchange_mode: None,
        }
    }

    pub fn parallel(id: FragmentId) -> Self {
        Self::new(id, FragmentKind::Parallel)
    }

    pub fn serial(id: FragmentId) -> Self {
        Self::new(id, FragmentKind::Serial)
    }

    // ── Mutating setters ──

    /// Set the source, replacing any previous one.
    pub fn add_source(&mut self, source: Source) -> &mut Self {
        self.source = Some(source);
        self
    }

    /// Append an operator; operators run in insertion order.
    pub fn add_operator(&mut self, operator: Operator) -> &mut Self {
        self.operators.push(operator);
        self
    }

    /// Set the sink, replacing any previous one.
    pub fn add_sink(&mut self, sink: Sink) -> &mut Self {
        self.sink = Some(sink);
        self
    }

    /// Attach the fragment whose output this one reads.
    pub fn set_child(&mut self, child: Fragment) -> &mut Self {
        self.child = Some(Box::new(child));
        self
    }

    /// Queue flavour for the exchange between this fragment and its child.
    pub fn set_exchange_mode(&mut self, mode: ExchangeMode) -> &mut Self {
        self.exchange_mode = Some(mode);
        self
    }

    // ── Consuming builders ──

    pub fn with_source(mut self, source: Source) -> Self {
        self.add_source(source);
        self
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.add_operator(operator);
        self
    }

    pub fn with_sink(mut self, sink: Sink) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn with_child(mut self, child: Fragment) -> Self {
        self.set_child(child);
        self
    }

    pub fn with_exchange_mode(mut self, mode: ExchangeMode) -> Self {
        self.set_exchange_mode(mode);
        self
    }

    // ── Accessors ──

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn sink(&self) -> Option<&Sink> {
        self.sink.as_ref()
    }

    pub fn child(&self) -> Option<&Fragment> {
        self.child.as_deref()
    }

    pub fn exchange_mode(&self) -> Option<ExchangeMode> {
        self.exchange_mode
    }

    /// Number of fragments in this tree.
    pub fn depth(&self) -> usize {
        1 + self.child.as_ref().map_or(0, |c| c.depth())
    }

    /// Task instances this fragment compiles into.
    pub fn instance_count(&self, parallelism: usize) -> usize {
        match self.kind {
            FragmentKind::Parallel => parallelism,
            FragmentKind::Serial => 1,
        }
    }

    // ── Compilation ──

    /// Check the whole fragment tree without building anything.
    pub fn validate(&self) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ExecError::invalid_fragment(self.id, "missing source"))?;
        if self.sink.is_none() {
            return Err(ExecError::invalid_fragment(self.id, "missing sink"));
        }

        match (&self.child, source.source_type()) {
            (None, SourceType::Exchange) => {
                return Err(ExecError::invalid_fragment(
                    self.id,
                    "exchange source requires a child fragment",
                ))
            }
            (Some(_), SourceType::Scan) => {
                return Err(ExecError::invalid_fragment(
                    self.id,
                    "a fragment with a child must read it through an exchange source",
                ))
            }
            _ => {}
        }

        if let Some(child) = &self.child {
            if self.kind == FragmentKind::Parallel && child.kind == FragmentKind::Serial {
                return Err(ExecError::invalid_fragment(
                    self.id,
                    format!(
                        "parallel fragment cannot consume serial child {}",
                        child.id
                    ),
                ));
            }
            child.validate()?;
        }
        Ok(())
    }

    /// Compile with default [`BuildOptions`].
    pub fn build_task(&self, parallelism: usize) -> Result<Vec<Task>> {
        self.build_tasks(parallelism, &BuildOptions::default())
    }

    /// Compile the fragment tree into its root tasks.
    ///
    /// Returns `parallelism` roots for a parallel fragment and one for a
    /// serial fragment. Child tasks hang below their parent; nothing is
    /// initialized yet.
    pub fn build_tasks(&self, parallelism: usize, options: &BuildOptions) -> Result<Vec<Task>> {
        if parallelism == 0 {
            return Err(ExecError::invalid_fragment(
                self.id,
                "parallelism must be at least 1",
            ));
        }
        if u32::try_from(parallelism).is_err() {
            return Err(ExecError::invalid_fragment(
                self.id,
                format!("parallelism {} exceeds the partition id range", parallelism),
            ));
        }
        if options.exchange_capacity_per_child == 0 {
            return Err(ExecError::invalid_fragment(
                self.id,
                "exchange capacity per child must be at least 1",
            ));
        }
        self.validate()?;

        let roots = self.build_level(parallelism, None, options)?;
        tracing::debug!(
            fragment = %self.id,
            kind = %self.kind,
            parallelism,
            roots = roots.len(),
            tasks = roots.iter().map(Task::tree_size).sum::<usize>(),
            "built task tree"
        );
        Ok(roots)
    }

    /// Build this level's tasks. `outputs[i]`, when given, is the exchange
    /// instance `i` forwards into.
    fn build_level(
        &self,
        parallelism: usize,
        outputs: Option<Vec<Exchange>>,
        options: &BuildOptions,
    ) -> Result<Vec<Task>> {
        let (Some(source), Some(sink)) = (&self.source, &self.sink) else {
            return Err(ExecError::invalid_fragment(self.id, "missing source or sink"));
        };
        let template = Arc::new(PipelineTemplate {
            source: source.clone(),
            operators: self.operators.clone(),
            sink: sink.clone(),
        });

        let count = self.instance_count(parallelism);
        let mut outputs = outputs.map(|o| o.into_iter());

        // Per-instance inputs and children.
        let mut wiring: Vec<(Option<ExchangeInput>, Vec<Task>)> = match &self.child {
            None => (0..count).map(|_| (None, Vec::new())).collect(),
            Some(child) => self.build_children(child, parallelism, count, options)?,
        };

        let partitions = u32::try_from(count).map_err(|_| {
            ExecError::invalid_fragment(
                self.id,
                format!("{} instances exceed the partition id range", count),
            )
        })?;
        let mut tasks = Vec::with_capacity(count);
        for (index, (input, children)) in (0..partitions).zip(wiring.drain(..)) {
            let output = outputs.as_mut().and_then(|o| o.next());
            let partition = Partition::new(index, partitions);
            let task = PipelineTask::new(
                TaskId::new(self.id, index),
                partition,
                Arc::clone(&template),
                input,
                output,
                options.poll.clone(),
                children,
            );
            tasks.push(Task::Pipeline(Arc::new(task)));
        }
        Ok(tasks)
    }

    fn build_children(
        &self,
        child: &Fragment,
        parallelism: usize,
        count: usize,
        options: &BuildOptions,
    ) -> Result<Vec<(Option<ExchangeInput>, Vec<Task>)>> {
        let mode = self.exchange_mode.unwrap_or(options.default_exchange_mode);
        let per_child = options.exchange_capacity_per_child;
        let child_count = child.instance_count(parallelism);

        match self.kind {
            // Fan-in: every child instance feeds the single parent exchange.
            FragmentKind::Serial => {
                let exchange = Exchange::new(mode, exchange_capacity(child_count, per_child));
                let child_tasks = child.build_level(
                    parallelism,
                    Some(vec![exchange.clone(); child_count]),
                    options,
                )?;
                let input = ExchangeInput {
                    exchange,
                    producers: child_tasks.len(),
                };
                Ok(vec![(Some(input), child_tasks)])
            }
            // One-to-one: parent instance i reads child instance i.
            FragmentKind::Parallel => {
                if child_count != count {
                    return Err(ExecError::invalid_fragment(
                        self.id,
                        format!(
                            "parallel fragment needs {} child instances, child {} has {}",
                            count, child.id, child_count
                        ),
                    ));
                }
                let exchanges: Vec<Exchange> = (0..count)
                    .map(|_| Exchange::new(mode, exchange_capacity(1, per_child)))
                    .collect();
                let child_tasks = child.build_level(parallelism, Some(exchanges.clone()), options)?;
                Ok(exchanges
                    .into_iter()
                    .zip(child_tasks)
                    .map(|(exchange, child_task)| {
                        let input = ExchangeInput {
                            exchange,
                            producers: 1,
                        };
                        (Some(input), vec![child_task])
                    })
                    .collect())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

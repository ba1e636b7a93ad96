//! Fragment-based execution pipeline.
//!
//! A physical plan arrives as a tree of [`Fragment`]s. Compiling it yields a
//! tree of [`Task`]s: every fragment becomes one task per partition
//! (parallel) or a single task (serial), and a parent reads its children's
//! output through an exchange.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────────────────────┐
//!                   │ Serial F0: Exchange → Sink   │   root task
//!                   └──────────────▲───────────────┘
//!                                  │ exchange (N producers)
//!        ┌──────────────┬──────────┴───┬──────────────┐
//!   [F1#0 Scan→Sink] [F1#1 Scan→Sink]  …  [F1#N-1 Scan→Sink]   leaf tasks
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on the hot path**: `Task`, `OperatorKind` and `SinkKind`
//!   are closed enums; only scan readers and transforms are trait objects.
//! - **Cooperative slices**: a task runs until its input exchange is empty or
//!   its output exchange is full, then yields its worker. A parent starts
//!   once its children started and drains them while they produce.
//! - **Failure is terminal and travels up**: a failed child fails its parent
//!   without running it.
//! - **Move, don't copy**: buffers travel as `Box<Buffer>` or `Arc<Buffer>`.

pub mod exchange;
pub mod executor;
pub mod fragment;
pub mod id;
pub mod stage;
pub mod task;

pub use exchange::{
    exchange_capacity, Exchange, ExchangeMode, ExchangeReader, ExchangeWriter, Pull,
};
pub use executor::{
    execute_all_dispatched, execute_dispatched, execute_inline, init_tree, Placement,
};
pub use fragment::{BuildOptions, Fragment, FragmentKind};
pub use id::{FragmentId, Partition, TaskId};
pub use stage::{
    scan_factory, Operator, OperatorKind, ScanFactory, ScanReader, Sink, SinkKind, Source, SourceType,
    SyntheticScan, TransformFn,
};
pub use task::{PipelineTask, Task, TaskOutput, TaskProgress, TaskState, TaskType, YieldReason};

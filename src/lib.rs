//! # colexec: Task Execution Core for a Columnar Query Engine
//!
//! Compiles physical-plan fragments into trees of tasks and runs them on a
//! fixed pool of CPU-pinned worker threads. Data moves between stages in
//! fixed-size buffers through bounded queues.
//!
//! ## Architecture
//!
//! - **Pipeline**: fragments, tasks, stages, exchanges and the tree executor
//! - **Scheduler**: one pinned worker thread and one task queue per CPU
//! - **Queue**: buffers plus the exclusive (`Box`) and shared (`Arc`) queues
//! - **Config**: `EngineConfig` loaded from TOML or JSON
//!
//! ## Example
//!
//! ```ignore
//! use colexec::{
//!     config::EngineConfig,
//!     pipeline::{execute_dispatched, Fragment, FragmentId, Placement, Sink, Source, SyntheticScan},
//!     scheduler::{eligible_cpus, Scheduler},
//! };
//!
//! let config = EngineConfig::load_or_default("colexec.toml");
//! let scheduler = Scheduler::init(eligible_cpus(&config.scheduler.cpu_mask), &config.scheduler)?;
//!
//! let plan = Fragment::serial(FragmentId(0))
//!     .with_source(Source::exchange("gather"))
//!     .with_sink(Sink::materialize("result"))
//!     .with_child(
//!         Fragment::parallel(FragmentId(1))
//!             .with_source(Source::scan("scan", SyntheticScan::factory(64, config.buffer_size)))
//!             .with_sink(Sink::discard("forward")),
//!     );
//!
//! let parallelism = config.effective_parallelism(scheduler.worker_count());
//! let root = plan.build_tasks(parallelism, &config.build_options())?.remove(0);
//! let output = execute_dispatched(&scheduler, &root, &Placement::new())?;
//! scheduler.uninit();
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod scheduler;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{ExecError, Result, ResultExt, TaskFailure};
pub use pipeline::{Fragment, FragmentId, FragmentKind, Task, TaskOutput, TaskProgress, TaskState};
pub use queue::{Buffer, ConcurrentQueue, Message, WaitFreeQueue};
pub use scheduler::Scheduler;

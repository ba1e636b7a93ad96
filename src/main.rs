//! colexec demo driver
//!
//! Starts the worker pool over the eligible CPUs, then runs two plans through
//! the dispatched path and logs their timings:
//! - a scan-only parallel fragment (one leaf task per worker)
//! - a serial gather over the same scan, joined through an exchange
//!
//! Usage: `colexec [config.toml|config.json] [buffers-per-partition]`

use anyhow::Context;
use colexec::{
    config::EngineConfig,
    pipeline::{
        execute_all_dispatched, execute_dispatched, ExchangeMode, Fragment, FragmentId, Operator,
        Placement, Sink, Source, SyntheticScan,
    },
    scheduler::{eligible_cpus, Scheduler},
};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_BUFFERS_PER_PARTITION: usize = 256;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,colexec=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => EngineConfig::default(),
    };
    let buffers_per_partition = match args.next() {
        Some(n) => n
            .parse::<usize>()
            .with_context(|| format!("Invalid buffer count {:?}", n))?,
        None => DEFAULT_BUFFERS_PER_PARTITION,
    };

    let cpus = eligible_cpus(&config.scheduler.cpu_mask);
    tracing::info!(cpus = ?cpus, "Starting colexec");
    let scheduler =
        Scheduler::init(cpus, &config.scheduler).context("Failed to start scheduler")?;

    let parallelism = config.effective_parallelism(scheduler.worker_count());
    let options = config.build_options();

    let scan = || {
        Fragment::parallel(FragmentId(1))
            .with_source(Source::scan(
                "synthetic_scan",
                SyntheticScan::factory(buffers_per_partition, config.buffer_size),
            ))
            .with_operator(Operator::pass_through("project"))
    };

    // ── Scan only ──
    let placement = Placement::new();
    let scan_only = scan().with_sink(Sink::discard("discard"));
    let roots = scan_only
        .build_tasks(parallelism, &options)
        .context("Failed to build scan plan")?;

    let started = Instant::now();
    let results = execute_all_dispatched(&scheduler, &roots, &placement)
        .context("Failed to run scan plan")?;
    let mut buffers = 0u64;
    let mut bytes = 0u64;
    for (root, result) in roots.iter().zip(results) {
        let output = result.with_context(|| format!("Scan task {} failed", root.id()))?;
        buffers += output.buffer_count();
        bytes += output.byte_count();
    }
    tracing::info!(
        tasks = roots.len(),
        buffers,
        bytes,
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "scan-only plan finished"
    );

    // ── Scan + exchange ──
    for mode in [ExchangeMode::Exclusive, ExchangeMode::Shared] {
        let gather = Fragment::serial(FragmentId(0))
            .with_source(Source::exchange("gather"))
            .with_sink(Sink::discard("discard"))
            .with_child(scan().with_sink(Sink::discard("forward")))
            .with_exchange_mode(mode);
        let root = gather
            .build_tasks(parallelism, &options)
            .context("Failed to build exchange plan")?
            .remove(0);

        let started = Instant::now();
        let output = execute_dispatched(&scheduler, &root, &placement)
            .with_context(|| format!("Exchange plan ({}) failed", mode))?;
        tracing::info!(
            mode = %mode,
            tasks = root.tree_size(),
            buffers = output.buffer_count(),
            root_slices = root.slices(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "exchange plan finished"
        );
    }

    let stats = scheduler.stats();
    for (index, worker) in stats.workers.iter().enumerate() {
        tracing::debug!(
            worker = index,
            cpu = worker.cpu,
            executed = worker.executed,
            failed = worker.failed,
            rejected = worker.rejected,
            "worker stats"
        );
    }

    tracing::info!("Shutting down...");
    scheduler.uninit();
    Ok(())
}

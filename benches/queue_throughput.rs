//! Benchmarks for buffer queues and plan execution
//!
//! Run with: cargo bench

use colexec::config::SchedulerConfig;
use colexec::pipeline::{
    execute_dispatched, execute_inline, BuildOptions, ExchangeMode, Fragment, FragmentId,
    Placement, Sink, Source, SyntheticScan,
};
use colexec::queue::{Buffer, ConcurrentQueue, Message, WaitFreeQueue, DEFAULT_BUFFER_SIZE};
use colexec::scheduler::Scheduler;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

const MESSAGES: usize = 10_000;

fn bench_queue_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_round_trip");
    group.throughput(Throughput::Elements(1));

    let exclusive = ConcurrentQueue::new(1024);
    group.bench_function("concurrent", |b| {
        b.iter(|| {
            let _ = exclusive.try_enqueue_buffer(Box::new(Buffer::new(64)));
            black_box(exclusive.try_dequeue())
        });
    });

    let shared = WaitFreeQueue::new(1024);
    let payload = Arc::new(Buffer::new(64));
    group.bench_function("wait_free", |b| {
        b.iter(|| {
            let _ = shared.try_enqueue_buffer(Arc::clone(&payload));
            black_box(shared.try_dequeue())
        });
    });

    group.finish();
}

fn bench_queue_producers(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_producers");
    group.throughput(Throughput::Elements(MESSAGES as u64));

    for producers in [1usize, 2, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("concurrent", producers),
            producers,
            |b, &producers| {
                b.iter(|| {
                    let queue = ConcurrentQueue::new(256);
                    let handles: Vec<_> = (0..producers)
                        .map(|_| {
                            let queue = queue.clone();
                            thread::spawn(move || {
                                for _ in 0..MESSAGES / producers {
                                    let mut msg = Message::Buffer(Box::new(Buffer::new(16)));
                                    while let Err(back) = queue.try_enqueue(msg) {
                                        msg = back;
                                        thread::yield_now();
                                    }
                                }
                            })
                        })
                        .collect();
                    let mut received = 0;
                    while received < (MESSAGES / producers) * producers {
                        if queue.try_dequeue().is_some() {
                            received += 1;
                        }
                    }
                    for h in handles {
                        let _ = h.join();
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("wait_free", producers),
            producers,
            |b, &producers| {
                b.iter(|| {
                    let queue = Arc::new(WaitFreeQueue::new(256));
                    let handles: Vec<_> = (0..producers)
                        .map(|_| {
                            let queue = Arc::clone(&queue);
                            thread::spawn(move || {
                                for _ in 0..MESSAGES / producers {
                                    let mut msg = Message::Buffer(Arc::new(Buffer::new(16)));
                                    while let Err(back) = queue.try_enqueue(msg) {
                                        msg = back;
                                        thread::yield_now();
                                    }
                                }
                            })
                        })
                        .collect();
                    let mut received = 0;
                    while received < (MESSAGES / producers) * producers {
                        if queue.try_dequeue().is_some() {
                            received += 1;
                        }
                    }
                    for h in handles {
                        let _ = h.join();
                    }
                });
            },
        );
    }

    group.finish();
}

fn gather_plan(mode: ExchangeMode, buffers: usize) -> Fragment {
    Fragment::serial(FragmentId(0))
        .with_source(Source::exchange("gather"))
        .with_sink(Sink::discard("discard"))
        .with_exchange_mode(mode)
        .with_child(
            Fragment::parallel(FragmentId(1))
                .with_source(Source::scan(
                    "scan",
                    SyntheticScan::factory(buffers, DEFAULT_BUFFER_SIZE),
                ))
                .with_sink(Sink::discard("forward")),
        )
}

fn bench_plan_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_execution");
    let buffers = 128;
    let parallelism = 4;
    // Smaller than a child's output, so producers are throttled by the gather.
    let options = BuildOptions {
        exchange_capacity_per_child: 16,
        ..BuildOptions::default()
    };
    group.throughput(Throughput::Elements((buffers * parallelism) as u64));

    let config = SchedulerConfig {
        pin_threads: false,
        ..SchedulerConfig::default()
    };
    let scheduler = match Scheduler::init(0..parallelism, &config) {
        Ok(s) => s,
        Err(e) => panic!("scheduler init failed: {e}"),
    };
    let placement = Placement::new();

    for mode in [ExchangeMode::Exclusive, ExchangeMode::Shared] {
        let plan = gather_plan(mode, buffers);

        group.bench_function(BenchmarkId::new("inline", mode), |b| {
            b.iter(|| {
                let root = plan.build_tasks(parallelism, &options).unwrap().remove(0);
                black_box(execute_inline(&root).unwrap())
            });
        });

        group.bench_function(BenchmarkId::new("dispatched", mode), |b| {
            b.iter(|| {
                let root = plan.build_tasks(parallelism, &options).unwrap().remove(0);
                black_box(execute_dispatched(&scheduler, &root, &placement).unwrap())
            });
        });
    }

    group.finish();
    scheduler.uninit();
}

criterion_group!(
    benches,
    bench_queue_round_trip,
    bench_queue_producers,
    bench_plan_execution
);
criterion_main!(benches);

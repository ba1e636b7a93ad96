//! Integration tests for fragment → task compilation
//!
//! These tests validate the task trees produced for each fragment shape:
//! - Leaf fragments (parallel and serial)
//! - Exchange fan-in and one-to-one pairing
//! - Construction errors

mod common;

use colexec::pipeline::{
    BuildOptions, ExchangeMode, Fragment, FragmentId, FragmentKind, Partition, Sink, Source,
    SyntheticScan, TaskId,
};
use colexec::{ExecError, TaskState};
use common::builders::PlanBuilder;
use common::mock_helpers::counting_scan;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_parallel_scan_yields_n_leaves() {
    for n in [1, 2, 7, 16] {
        let tasks = PlanBuilder::new().build().build_task(n).unwrap();
        assert_eq!(tasks.len(), n);
        for (i, task) in tasks.iter().enumerate() {
            assert!(task.is_leaf());
            assert_eq!(task.id(), TaskId::new(FragmentId(1), i as u32));
            assert_eq!(task.partition(), Partition::new(i as u32, n as u32));
        }
    }
}

#[test]
fn test_gather_yields_one_root_with_n_children() {
    let tasks = PlanBuilder::new()
        .gather(ExchangeMode::Exclusive)
        .build()
        .build_task(5)
        .unwrap();
    assert_eq!(tasks.len(), 1);

    let root = &tasks[0];
    assert_eq!(root.id(), TaskId::new(FragmentId(0), 0));
    assert_eq!(root.children().len(), 5);
    assert_eq!(root.leaves().len(), 5);
    assert!(root
        .breadth_first()
        .iter()
        .all(|t| t.state() == TaskState::Uninitialized));
}

#[test]
fn test_build_does_not_open_readers() {
    let opened = Arc::new(AtomicUsize::new(0));
    let tasks = PlanBuilder::new()
        .scan(counting_scan(2, Arc::clone(&opened)))
        .build()
        .build_task(3)
        .unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 0);

    for task in &tasks {
        task.init().unwrap();
    }
    assert_eq!(opened.load(Ordering::SeqCst), 3);
}

#[test]
fn test_parallel_pairs_with_parallel_child() {
    let plan = Fragment::parallel(FragmentId(0))
        .with_source(Source::exchange("repartition"))
        .with_sink(Sink::materialize("collect"))
        .with_child(
            Fragment::parallel(FragmentId(1))
                .with_source(Source::scan("scan", SyntheticScan::factory(2, 32)))
                .with_sink(Sink::discard("forward")),
        );

    let tasks = plan.build_task(3).unwrap();
    assert_eq!(tasks.len(), 3);
    for (i, task) in tasks.iter().enumerate() {
        let children = task.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id(), TaskId::new(FragmentId(1), i as u32));
    }
}

#[test]
fn test_serial_chain() {
    let plan = Fragment::serial(FragmentId(0))
        .with_source(Source::exchange("outer"))
        .with_sink(Sink::materialize("collect"))
        .with_child(
            Fragment::serial(FragmentId(1))
                .with_source(Source::exchange("inner"))
                .with_sink(Sink::discard("forward"))
                .with_child(PlanBuilder::new().build().with_sink(Sink::discard("forward"))),
        );

    let tasks = plan.build_task(4).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].children().len(), 1);
    assert_eq!(tasks[0].children()[0].children().len(), 4);
    assert_eq!(tasks[0].tree_size(), 6);
}

#[test]
fn test_construction_errors() {
    let cases: Vec<(Fragment, usize, &str)> = vec![
        (
            Fragment::new(FragmentId(1), FragmentKind::Parallel).with_sink(Sink::discard("s")),
            2,
            "missing source",
        ),
        (
            Fragment::serial(FragmentId(1))
                .with_source(Source::scan("scan", SyntheticScan::factory(1, 8))),
            1,
            "missing sink",
        ),
        (PlanBuilder::new().build(), 0, "parallelism"),
        (
            Fragment::serial(FragmentId(1))
                .with_source(Source::exchange("x"))
                .with_sink(Sink::discard("s")),
            1,
            "requires a child",
        ),
        (
            Fragment::parallel(FragmentId(0))
                .with_source(Source::exchange("x"))
                .with_sink(Sink::discard("s"))
                .with_child(
                    Fragment::serial(FragmentId(1))
                        .with_source(Source::scan("scan", SyntheticScan::factory(1, 8)))
                        .with_sink(Sink::discard("s")),
                ),
            2,
            "serial child",
        ),
    ];

    for (fragment, parallelism, expected) in cases {
        match fragment.build_task(parallelism) {
            Err(ExecError::InvalidFragment { reason, .. }) => {
                assert!(reason.contains(expected), "{reason:?} should mention {expected:?}")
            }
            other => panic!("expected InvalidFragment({expected}), got {:?}", other.map(|t| t.len())),
        }
    }
}

#[test]
fn test_build_options_from_config() {
    let mut config = colexec::EngineConfig::default();
    config.exchange.capacity_per_child = 1;
    config.exchange.default_mode = ExchangeMode::Shared;

    let options: BuildOptions = config.build_options();
    assert_eq!(options.exchange_capacity_per_child, 1);
    assert_eq!(options.default_exchange_mode, ExchangeMode::Shared);

    let tasks = PlanBuilder::new()
        .gather(ExchangeMode::Exclusive)
        .build()
        .build_tasks(2, &options)
        .unwrap();
    assert_eq!(tasks[0].children().len(), 2);
}

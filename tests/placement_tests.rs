//! Placement behavior of the flat and scoped families, driven through the
//! scheduler with a recording transport.

mod test_harness;

use std::collections::HashSet;

use exclusive_dispatch::config::{PolicyKind, SchedulerConfig};
use exclusive_dispatch::scheduler::{Placement, PlacementStrategy};
use test_harness::{grid_items, ids, Harness};

// =============================================================================
// Flat family
// =============================================================================

#[test]
fn test_flat_exclusive_scenario() {
    let mut harness = Harness::new(SchedulerConfig::new(2, PolicyKind::Load), &["c"]);
    harness.start(&ids(&["a", "b", "c", "d", "e"]));

    // Worker 1 asked for two and got the exclusive item alone; worker 2 got
    // the first two ordinary items.
    assert_eq!(
        harness.transport().dispatches(),
        vec![(1, vec![2]), (2, vec![0, 1])]
    );
    assert_eq!(harness.scheduler.pending_len(), 2);
    harness.assert_partition();

    harness.complete_next(1, 0.01);
    assert_eq!(harness.transport().dispatched_to(1), vec![2, 3, 4]);
    assert_eq!(harness.scheduler.pending_len(), 0);
    assert_eq!(harness.transport().shutdowns(), vec![1, 2]);

    harness.drain();
    harness.assert_partition();
    assert!(harness.scheduler.is_drained());
    assert_eq!(harness.scheduler.completed(), 5);
}

#[test]
fn test_flat_round_robin_with_few_items() {
    let mut harness = Harness::new(SchedulerConfig::new(2, PolicyKind::Load), &["b"]);
    harness.start(&ids(&["a", "b", "c"]));

    assert_eq!(
        harness.transport().dispatches(),
        vec![(1, vec![1]), (2, vec![0]), (1, vec![2])]
    );
    assert_eq!(harness.transport().shutdowns(), vec![1, 2]);
}

#[test]
fn test_flat_every_exclusive_item_dispatched_alone() {
    let items = grid_items(4, 3, 5);
    let exclusive = [
        "pkg/test_f0.py::TestC0::test_4",
        "pkg/test_f1.py::TestC2::test_0",
        "pkg/test_f3.py::TestC1::test_2",
    ];
    let mut harness = Harness::new(SchedulerConfig::new(4, PolicyKind::Load), &exclusive);
    harness.start(&items);
    harness.drain();
    harness.assert_partition();

    let exclusive_indices: HashSet<usize> = harness.exclusive_indices().into_iter().collect();
    assert_eq!(exclusive_indices.len(), 3);

    let mut seen = 0;
    for (_, batch) in harness.transport().dispatches() {
        if batch.iter().any(|i| exclusive_indices.contains(i)) {
            assert_eq!(batch.len(), 1, "exclusive item shared a batch: {:?}", batch);
            seen += 1;
        }
    }
    assert_eq!(seen, 3);
    assert_eq!(harness.scheduler.completed(), items.len());
}

#[test]
fn test_flat_max_chunk_caps_batches() {
    let items = grid_items(5, 4, 5);
    let mut harness = Harness::new(
        SchedulerConfig::new(2, PolicyKind::Load).with_max_chunk(3),
        &[],
    );
    harness.start(&items);
    harness.drain();
    harness.assert_partition();

    for (_, batch) in harness.transport().dispatches() {
        assert!(batch.len() <= 3, "batch too large: {}", batch.len());
    }
}

#[test]
fn test_flat_slow_items_delay_refill() {
    let items = grid_items(10, 4, 5);
    let mut harness = Harness::new(
        SchedulerConfig::new(2, PolicyKind::Load).with_max_chunk(4),
        &[],
    );
    harness.start(&items);
    assert_eq!(harness.assigned(1), vec![0, 1, 2, 3]);
    let before = harness.transport().dispatches().len();

    // Slow item with three still queued: the worker keeps going.
    harness.complete_next(1, 0.5);
    assert_eq!(harness.transport().dispatches().len(), before);

    // Fast item: topped up by one chunk.
    harness.complete_next(1, 0.01);
    assert_eq!(harness.transport().dispatches().len(), before + 1);
    assert_eq!(harness.assigned(1), vec![2, 3, 8, 9, 10, 11]);
}

#[test]
fn test_flat_zero_request_is_noop() {
    let mut harness = Harness::new(SchedulerConfig::new(2, PolicyKind::Load), &["b"]);
    harness.start(&ids(&["a", "b", "c", "d", "e", "f"]));

    let Placement::Flat(mut flat) = Placement::from_config(
        harness.scheduler.config(),
        harness.scheduler.exclusive().clone(),
    ) else {
        panic!("load policy must build the flat family");
    };
    flat.load(harness.scheduler.collection().unwrap().clone());

    assert!(flat.place(0).is_empty());
    assert_eq!(flat.pending_len(), 6);
    assert_eq!(flat.unscheduled_exclusive(), 1);
}

#[test]
fn test_flat_refill_after_drain_sends_nothing() {
    let mut harness = Harness::new(SchedulerConfig::new(2, PolicyKind::Load), &[]);
    harness.start(&ids(&["a", "b"]));
    let calls = harness.transport().calls().len();

    harness.drain();
    assert_eq!(harness.transport().calls().len(), calls);
    assert!(harness.scheduler.is_drained());
}

// =============================================================================
// Scoped family
// =============================================================================

fn scoped_items() -> Vec<String> {
    ids(&[
        "t/a.py::TestA::t1",
        "t/a.py::TestA::t2",
        "t/a.py::TestB::t1",
        "t/b.py::TestC::t1",
        "t/b.py::TestC::t2",
    ])
}

#[test]
fn test_loadscope_groups_classes_by_file() {
    let mut harness = Harness::new(
        SchedulerConfig::new(2, PolicyKind::LoadScope),
        &["t/a.py::TestA::t2"],
    );
    harness.start(&scoped_items());

    assert_eq!(
        harness.transport().dispatches(),
        vec![(1, vec![1]), (2, vec![0, 2]), (1, vec![3, 4])]
    );
    assert_eq!(harness.transport().shutdowns(), vec![2, 1]);
    harness.assert_partition();

    harness.drain();
    assert!(harness.scheduler.is_drained());
}

#[test]
fn test_loadfile_groups_by_file() {
    let mut harness = Harness::new(
        SchedulerConfig::new(2, PolicyKind::LoadFile),
        &["a.py::t2"],
    );
    harness.start(&ids(&["a.py::t1", "a.py::t2", "b.py::t1"]));

    assert_eq!(
        harness.transport().dispatches(),
        vec![(1, vec![1]), (2, vec![0]), (1, vec![2])]
    );
    assert_eq!(harness.transport().shutdowns(), vec![2, 1]);
}

#[test]
fn test_scoped_shuts_down_extra_workers() {
    let mut harness = Harness::new(SchedulerConfig::new(3, PolicyKind::LoadScope), &[]);
    harness.start(&ids(&["m.py::A::t1", "n.py::B::t1"]));

    assert_eq!(
        harness.transport().dispatches(),
        vec![(1, vec![0]), (2, vec![1])]
    );
    assert_eq!(harness.transport().shutdowns(), vec![3, 1, 2]);
}

#[test]
fn test_scoped_prefetch_limit() {
    let items = grid_items(3, 2, 3);
    let mut harness = Harness::new(SchedulerConfig::new(1, PolicyKind::LoadFile), &[]);
    harness.start(&items);

    // One file of six items; more than two outstanding blocks a refill.
    assert_eq!(harness.transport().dispatches().len(), 1);
    for _ in 0..3 {
        harness.complete_next(1, 0.01);
    }
    assert_eq!(harness.transport().dispatches().len(), 1);

    harness.complete_next(1, 0.01);
    assert_eq!(harness.transport().dispatches().len(), 2);
    assert_eq!(harness.assigned(1), vec![4, 5, 6, 7, 8, 9, 10, 11]);
}

#[test]
fn test_dedicated_nodes_never_mix() {
    let mut harness = Harness::new(
        SchedulerConfig::new(2, PolicyKind::LoadScope).with_dedicated_nodes(true),
        &["t/a.py::TestA::t2"],
    );
    harness.start(&scoped_items());

    assert_eq!(
        harness.transport().dispatches(),
        vec![(1, vec![1]), (2, vec![0, 2]), (2, vec![3, 4])]
    );

    harness.complete_next(2, 0.01);
    assert_eq!(harness.transport().dispatched_to(2), vec![0, 2, 3, 4]);
    assert_eq!(harness.transport().dispatched_to(1), vec![1]);

    harness.drain();
    harness.assert_partition();
    for worker in harness.scheduler.workers() {
        assert!(!(worker.received_exclusive && worker.received_shared));
    }
}

#[test]
fn test_dedicated_nodes_grid() {
    let items = grid_items(3, 2, 3);
    let exclusive = [
        "pkg/test_f0.py::TestC0::test_1",
        "pkg/test_f2.py::TestC1::test_2",
    ];
    let mut harness = Harness::new(
        SchedulerConfig::new(4, PolicyKind::LoadScope).with_dedicated_nodes(true),
        &exclusive,
    );
    harness.start(&items);
    harness.drain();
    harness.assert_partition();
    assert!(harness.scheduler.is_drained());

    let exclusive_indices: HashSet<usize> = harness.exclusive_indices().into_iter().collect();
    for (_, batch) in harness.transport().dispatches() {
        if batch.iter().any(|i| exclusive_indices.contains(i)) {
            assert_eq!(batch.len(), 1);
        }
    }
    for worker in harness.scheduler.workers() {
        assert!(!(worker.received_exclusive && worker.received_shared));
    }
}

//! Test harness for driving the scheduler by hand.
//!
//! Wraps a scheduler over a [`RecordingTransport`] and remembers which
//! indices the test completed, so every step can check that each collected
//! item sits in exactly one place.

#![allow(dead_code)]

use std::collections::HashMap;

use exclusive_dispatch::config::SchedulerConfig;
use exclusive_dispatch::scheduler::{
    ExclusiveSet, Placement, PlacementStrategy, Scheduler, WorkerId,
};
use exclusive_dispatch::transport::RecordingTransport;

pub type TestScheduler = Scheduler<Placement, RecordingTransport>;

/// Owned identifiers from string literals.
pub fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `files * classes * tests` identifiers shaped like `pkg/test_f0.py::TestC0::test_0`.
pub fn grid_items(files: usize, classes: usize, tests: usize) -> Vec<String> {
    let mut items = Vec::new();
    for f in 0..files {
        for c in 0..classes {
            for t in 0..tests {
                items.push(format!("pkg/test_f{}.py::TestC{}::test_{}", f, c, t));
            }
        }
    }
    items
}

pub struct Harness {
    pub scheduler: TestScheduler,
    /// Indices completed through the harness, in completion order.
    pub completed: Vec<usize>,
    next_worker: WorkerId,
}

impl Harness {
    pub fn new(config: SchedulerConfig, exclusive: &[&str]) -> Self {
        let scheduler = Scheduler::new(
            config,
            ExclusiveSet::new(exclusive.iter().copied()),
            RecordingTransport::new(),
        )
        .unwrap();
        Self {
            scheduler,
            completed: Vec::new(),
            next_worker: 1,
        }
    }

    /// Register the configured number of workers and have each report
    /// `items`. The last report freezes the collection.
    pub fn start(&mut self, items: &[String]) {
        let count = self.scheduler.config().worker_count;
        let workers: Vec<WorkerId> = (0..count).map(|_| self.add_worker()).collect();
        for worker in workers {
            self.scheduler
                .report_enumeration(worker, items.to_vec())
                .unwrap();
        }
        assert!(self.scheduler.is_frozen());
    }

    /// Register one more worker and return its id.
    pub fn add_worker(&mut self) -> WorkerId {
        let id = self.next_worker;
        self.next_worker += 1;
        self.scheduler.register(id).unwrap();
        id
    }

    pub fn transport(&self) -> &RecordingTransport {
        self.scheduler.transport()
    }

    pub fn assigned(&self, worker: WorkerId) -> Vec<usize> {
        self.scheduler
            .worker(worker)
            .map(|w| w.assigned.clone())
            .unwrap_or_default()
    }

    /// Complete the oldest item `worker` holds.
    pub fn complete_next(&mut self, worker: WorkerId, duration: f64) -> Option<usize> {
        let index = *self.scheduler.worker(worker).ok()?.assigned.first()?;
        self.scheduler.complete(worker, index, duration).unwrap();
        self.completed.push(index);
        Some(index)
    }

    /// Workers holding at least one item, in registration order.
    pub fn busy_workers(&self) -> Vec<WorkerId> {
        let mut busy: Vec<WorkerId> = self
            .scheduler
            .workers()
            .filter(|w| w.outstanding() > 0)
            .map(|w| w.id)
            .collect();
        busy.sort_unstable();
        busy
    }

    /// Complete items round-robin until no worker holds anything.
    pub fn drain(&mut self) {
        loop {
            let busy = self.busy_workers();
            if busy.is_empty() {
                return;
            }
            for worker in busy {
                self.complete_next(worker, 0.01);
            }
        }
    }

    /// Every collected index is pending, held by one worker, completed or a
    /// crash item, and in exactly one of those places.
    pub fn assert_partition(&self) {
        let Some(collection) = self.scheduler.collection() else {
            return;
        };
        let mut seen: HashMap<usize, &'static str> = HashMap::new();
        let mut place = |index: usize, location: &'static str| {
            if let Some(previous) = seen.insert(index, location) {
                panic!("index {} is both {} and {}", index, previous, location);
            }
        };

        for index in self.scheduler.placement().pending_indices() {
            place(index, "pending");
        }
        for worker in self.scheduler.workers() {
            for &index in &worker.assigned {
                place(index, "assigned");
            }
        }
        for &index in &self.completed {
            place(index, "completed");
        }
        for item in self.scheduler.crash_items() {
            place(item.index, "crashed");
        }

        for index in 0..collection.len() {
            assert!(seen.contains_key(&index), "index {} was lost", index);
        }
        assert_eq!(seen.len(), collection.len());
    }

    /// Indices of the collected exclusive items.
    pub fn exclusive_indices(&self) -> Vec<usize> {
        let collection = self.scheduler.collection().unwrap();
        self.scheduler.exclusive().indices_in(collection)
    }
}

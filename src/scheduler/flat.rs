use std::sync::Arc;

use crate::config::RefillConfig;
use crate::scheduler::collection::Collection;
use crate::scheduler::exclusive::ExclusiveSet;
use crate::scheduler::placement::{Batch, DispatchContext, PlacementStrategy};
use crate::scheduler::queue::PendingQueue;
use crate::scheduler::WorkerId;

/// Flat queue placement with exclusive items sent one per batch.
#[derive(Debug)]
pub struct FlatExclusive {
    exclusive: ExclusiveSet,
    refill: RefillConfig,
    max_chunk: Option<usize>,
    collection: Option<Arc<Collection>>,
    pending: PendingQueue,
    /// Exclusive indices not yet dispatched, in collection order.
    unscheduled_exclusive: Vec<usize>,
}

impl FlatExclusive {
    pub fn new(exclusive: ExclusiveSet, refill: RefillConfig, max_chunk: Option<usize>) -> Self {
        Self {
            exclusive,
            refill,
            max_chunk,
            collection: None,
            pending: PendingQueue::new(),
            unscheduled_exclusive: Vec::new(),
        }
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn unscheduled_exclusive_indices(&self) -> &[usize] {
        &self.unscheduled_exclusive
    }

    fn label(&self, index: usize) -> &str {
        self.collection
            .as_deref()
            .map(|c| c.label(index))
            .unwrap_or("<unknown>")
    }

    fn max_chunk(&self) -> usize {
        self.max_chunk
            .or_else(|| self.collection.as_ref().map(|c| c.len()))
            .unwrap_or(usize::MAX)
    }

    /// Pick up to `num` items for one dispatch and remove them from pending.
    ///
    /// The first unscheduled exclusive item still pending is returned on its
    /// own. Otherwise up to `num` pending items are taken in order, skipping
    /// exclusive items that have not been sent yet. `num == 0` touches nothing.
    pub fn place(&mut self, num: usize) -> Batch {
        if num == 0 || self.pending.is_empty() {
            return Batch::default();
        }

        let pending = &self.pending;
        if let Some(pos) = self
            .unscheduled_exclusive
            .iter()
            .position(|&index| pending.contains(index))
        {
            let index = self.unscheduled_exclusive.remove(pos);
            self.pending.remove(index);
            tracing::info!(item = self.label(index), "Placing exclusive item alone");
            return Batch::exclusive(vec![index]);
        }

        let unscheduled = &self.unscheduled_exclusive;
        let items = self
            .pending
            .take_matching(|index| !unscheduled.contains(&index), num);
        Batch::shared(items)
    }

    /// Place up to `num` items and dispatch them to `worker`.
    pub fn send(&mut self, worker: WorkerId, num: usize, ctx: &mut DispatchContext<'_>) {
        let batch = self.place(num);
        if batch.is_empty() {
            tracing::debug!(worker_id = worker, num, "No eligible items for worker");
            return;
        }
        if batch.exclusive {
            tracing::info!(
                worker_id = worker,
                item = self.label(batch.items[0]),
                "Sent exclusive item"
            );
        }
        ctx.dispatch(worker, batch);
    }
}

impl PlacementStrategy for FlatExclusive {
    fn name(&self) -> &'static str {
        "load"
    }

    fn load(&mut self, collection: Arc<Collection>) {
        self.pending = PendingQueue::with_range(collection.len());
        self.unscheduled_exclusive = self.exclusive.indices_in(&collection);
        tracing::info!(
            items = collection.len(),
            exclusive = self.unscheduled_exclusive.len(),
            "Flat pending queue built"
        );
        self.collection = Some(collection);
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn pending_indices(&self) -> Vec<usize> {
        self.pending.iter().collect()
    }

    fn unscheduled_exclusive(&self) -> usize {
        self.unscheduled_exclusive.len()
    }

    fn initial_distribution(&mut self, ctx: &mut DispatchContext<'_>) {
        let workers = ctx.active_ids();
        if workers.is_empty() || self.pending.is_empty() {
            return;
        }

        let pending = self.pending.len();
        if pending < 2 * workers.len() {
            // Too few items to chunk: one at a time so every worker starts.
            for &worker in workers.iter().cycle().take(pending) {
                self.send(worker, 1, ctx);
            }
        } else {
            let total = self.collection.as_ref().map(|c| c.len()).unwrap_or(pending);
            let per_worker = total / workers.len();
            let chunk = (per_worker / self.refill.initial_divisor)
                .min(self.max_chunk())
                .max(self.refill.min_batch);
            tracing::debug!(chunk, workers = workers.len(), "Initial chunked distribution");
            for worker in workers {
                self.send(worker, chunk, ctx);
            }
        }
    }

    fn refill(&mut self, worker: WorkerId, duration: f64, ctx: &mut DispatchContext<'_>) {
        let Some(held) = ctx.refill_candidate(worker).map(|w| w.outstanding()) else {
            return;
        };
        if self.pending.is_empty() {
            ctx.shutdown(worker);
            return;
        }

        let workers = ctx.active_count().max(1);
        let pending = self.pending.len();
        let low = (pending / workers / self.refill.low_divisor).max(self.refill.min_batch);
        let high = (pending / workers / self.refill.high_divisor).max(self.refill.min_batch);

        if held >= low {
            return;
        }
        if duration >= self.refill.slow_item_secs && held >= 2 {
            // Slow items and enough queued: let the worker keep going.
            return;
        }

        let ceiling = self
            .refill
            .min_batch
            .saturating_sub(held)
            .max(self.max_chunk());
        let num = high.saturating_sub(held).min(ceiling);
        self.send(worker, num, ctx);
    }

    fn requeue(&mut self, indices: &[usize]) {
        self.pending.requeue(indices.iter().copied());
        let Some(collection) = self.collection.clone() else {
            return;
        };
        for &index in indices {
            let exclusive = collection
                .get(index)
                .map(|id| self.exclusive.contains(id))
                .unwrap_or(false);
            if exclusive {
                if let Err(pos) = self.unscheduled_exclusive.binary_search(&index) {
                    self.unscheduled_exclusive.insert(pos, index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(items: &[&str], exclusive: &[&str]) -> FlatExclusive {
        let mut strategy = FlatExclusive::new(
            ExclusiveSet::new(exclusive.iter().copied()),
            RefillConfig::default(),
            None,
        );
        let collection = Collection::new(items.iter().map(|s| s.to_string()).collect());
        strategy.load(Arc::new(collection));
        strategy
    }

    #[test]
    fn exclusive_item_is_placed_alone() {
        let mut strategy = flat(&["a", "b", "c", "d", "e"], &["c"]);
        let first = strategy.place(2);
        assert_eq!(first, Batch::exclusive(vec![2]));
        let second = strategy.place(2);
        assert_eq!(second, Batch::shared(vec![0, 1]));
        let third = strategy.place(2);
        assert_eq!(third, Batch::shared(vec![3, 4]));
        assert_eq!(strategy.pending_len(), 0);
    }

    #[test]
    fn one_exclusive_per_call() {
        let mut strategy = flat(&["x", "a", "y"], &["y", "x"]);
        assert_eq!(strategy.place(5).items, vec![0]);
        assert_eq!(strategy.place(5).items, vec![2]);
        assert_eq!(strategy.place(5).items, vec![1]);
    }

    #[test]
    fn zero_request_does_not_mutate() {
        let mut strategy = flat(&["a", "b"], &["b"]);
        assert!(strategy.place(0).is_empty());
        assert_eq!(strategy.pending_len(), 2);
        assert_eq!(strategy.unscheduled_exclusive(), 1);
    }

    #[test]
    fn requeued_exclusive_is_isolated_again() {
        let mut strategy = flat(&["a", "b", "c"], &["b"]);
        assert_eq!(strategy.place(3).items, vec![1]);
        assert_eq!(strategy.place(3).items, vec![0, 2]);
        strategy.requeue(&[2, 1]);
        assert_eq!(strategy.unscheduled_exclusive_indices(), &[1]);
        assert_eq!(strategy.place(3), Batch::exclusive(vec![1]));
        assert_eq!(strategy.place(3), Batch::shared(vec![2]));
    }

    #[test]
    fn exclusive_entries_not_collected_are_ignored() {
        let strategy = flat(&["a", "b"], &["zzz"]);
        assert_eq!(strategy.unscheduled_exclusive(), 0);
    }
}

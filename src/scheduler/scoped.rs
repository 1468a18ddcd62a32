use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RefillConfig;
use crate::scheduler::collection::Collection;
use crate::scheduler::exclusive::{Classifier, ScopeKey};
use crate::scheduler::placement::{Batch, DispatchContext, PlacementStrategy};
use crate::scheduler::queue::ScopeMap;
use crate::scheduler::WorkerId;

/// Scope-grouped placement. Exclusive items live in scopes of their own and
/// are handed out before any ordinary scope.
#[derive(Debug)]
pub struct ScopedExclusive {
    classifier: Classifier,
    refill: RefillConfig,
    dedicated_nodes: bool,
    collection: Option<Arc<Collection>>,
    scopes: ScopeMap,
    unscheduled_exclusive: HashSet<usize>,
    scheduled_exclusive: HashSet<usize>,
    /// Workers that took exclusive work while dedicated nodes are on.
    committed: HashSet<WorkerId>,
}

impl ScopedExclusive {
    pub fn new(classifier: Classifier, refill: RefillConfig, dedicated_nodes: bool) -> Self {
        Self {
            classifier,
            refill,
            dedicated_nodes,
            collection: None,
            scopes: ScopeMap::new(),
            unscheduled_exclusive: HashSet::new(),
            scheduled_exclusive: HashSet::new(),
            committed: HashSet::new(),
        }
    }

    pub fn scopes(&self) -> &ScopeMap {
        &self.scopes
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn is_committed(&self, worker: WorkerId) -> bool {
        self.committed.contains(&worker)
    }

    /// Exclusive indices already handed to some worker.
    pub fn scheduled_exclusive(&self) -> &HashSet<usize> {
        &self.scheduled_exclusive
    }

    fn label(&self, index: usize) -> &str {
        self.collection
            .as_deref()
            .map(|c| c.label(index))
            .unwrap_or("<unknown>")
    }

    /// Whether `worker` may take an exclusive unit. With dedicated nodes only
    /// workers that never ran ordinary work qualify.
    fn may_take_exclusive(&self, worker: WorkerId, ctx: &DispatchContext<'_>) -> bool {
        !self.dedicated_nodes
            || ctx
                .worker(worker)
                .map(|w| !w.received_shared)
                .unwrap_or(false)
    }

    /// Pop the first scope holding an unscheduled exclusive item.
    fn take_exclusive_unit(&mut self) -> Option<(ScopeKey, Vec<usize>)> {
        let unscheduled = &self.unscheduled_exclusive;
        let scope = self
            .scopes
            .scope_containing_any(|index| unscheduled.contains(&index))
            .map(|(scope, _)| scope.clone())?;
        let unit = self.scopes.pop_scope(&scope)?;
        for index in &unit {
            self.unscheduled_exclusive.remove(index);
            self.scheduled_exclusive.insert(*index);
        }
        Some((scope, unit))
    }

    /// Give `worker` one work unit, exclusive units first.
    pub fn assign_work_unit(&mut self, worker: WorkerId, ctx: &mut DispatchContext<'_>) {
        if !self.unscheduled_exclusive.is_empty() {
            if self.may_take_exclusive(worker, ctx) {
                if let Some((scope, unit)) = self.take_exclusive_unit() {
                    if self.dedicated_nodes {
                        self.committed.insert(worker);
                    }
                    tracing::info!(
                        worker_id = worker,
                        scope = %scope,
                        item = self.label(unit[0]),
                        "Scheduling exclusive work unit"
                    );
                    ctx.dispatch(worker, Batch::exclusive(unit));
                    return;
                }
            } else {
                let view: &DispatchContext<'_> = ctx;
                let eligible = view
                    .active_ids()
                    .into_iter()
                    .any(|id| self.may_take_exclusive(id, view));
                if !eligible {
                    tracing::warn!(
                        remaining = self.unscheduled_exclusive.len(),
                        "Exclusive work is waiting for a worker that has not run other tests"
                    );
                }
            }
        }

        if self.dedicated_nodes && self.committed.contains(&worker) {
            tracing::debug!(worker_id = worker, "Worker dedicated to exclusive work, skipping");
            return;
        }

        match self.scopes.pop_first_where(|scope| !scope.is_exclusive()) {
            Some((scope, unit)) => {
                tracing::debug!(
                    worker_id = worker,
                    scope = %scope,
                    count = unit.len(),
                    "Assigning work unit"
                );
                ctx.dispatch(worker, Batch::shared(unit));
            }
            None => {
                tracing::debug!(worker_id = worker, "No ordinary scope left for worker");
            }
        }
    }
}

impl PlacementStrategy for ScopedExclusive {
    fn name(&self) -> &'static str {
        "scoped"
    }

    fn load(&mut self, collection: Arc<Collection>) {
        self.scopes = ScopeMap::new();
        self.unscheduled_exclusive.clear();
        self.scheduled_exclusive.clear();
        for (index, id) in collection.iter().enumerate() {
            if self.classifier.is_exclusive(id) {
                self.unscheduled_exclusive.insert(index);
            }
            self.scopes.push(self.classifier.scope_of(id), index);
        }
        tracing::info!(
            items = collection.len(),
            scopes = self.scopes.len(),
            exclusive = self.unscheduled_exclusive.len(),
            "Scoped work queue built"
        );
        self.collection = Some(collection);
    }

    fn pending_len(&self) -> usize {
        self.scopes.item_count()
    }

    fn pending_indices(&self) -> Vec<usize> {
        self.scopes
            .iter()
            .flat_map(|(_, unit)| unit.iter().copied())
            .collect()
    }

    fn unscheduled_exclusive(&self) -> usize {
        self.unscheduled_exclusive.len()
    }

    fn initial_distribution(&mut self, ctx: &mut DispatchContext<'_>) {
        let mut workers = ctx.active_ids();
        if workers.is_empty() || self.scopes.is_empty() {
            return;
        }

        // More workers than scopes: the latest workers would never get work.
        let extra = workers.len().saturating_sub(self.scopes.len());
        if extra > 0 {
            tracing::info!(extra, "Shutting down unused workers");
            for worker in workers.split_off(workers.len() - extra) {
                ctx.shutdown(worker);
            }
        }

        for &worker in &workers {
            self.assign_work_unit(worker, ctx);
        }
        for &worker in &workers {
            self.refill(worker, 0.0, ctx);
        }
    }

    fn refill(&mut self, worker: WorkerId, _duration: f64, ctx: &mut DispatchContext<'_>) {
        let Some(held) = ctx.refill_candidate(worker).map(|w| w.outstanding()) else {
            return;
        };
        if self.scopes.is_empty() {
            ctx.shutdown(worker);
            return;
        }
        if held > self.refill.scope_prefetch {
            return;
        }
        self.assign_work_unit(worker, ctx);
    }

    fn requeue(&mut self, indices: &[usize]) {
        let Some(collection) = self.collection.clone() else {
            return;
        };
        for &index in indices {
            let Some(id) = collection.get(index) else {
                continue;
            };
            if self.classifier.is_exclusive(id) {
                self.scheduled_exclusive.remove(&index);
                self.unscheduled_exclusive.insert(index);
            }
            self.scopes.push(self.classifier.scope_of(id), index);
        }
    }

    fn worker_removed(&mut self, worker: WorkerId) {
        self.committed.remove(&worker);
    }
}

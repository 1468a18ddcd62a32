//! Placement strategies decide which pending items a worker receives.
//!
//! The [`Scheduler`](crate::scheduler::Scheduler) owns worker bookkeeping and
//! the transport; a [`PlacementStrategy`] owns the pending store and makes
//! every placement decision through a [`DispatchContext`]. Items are always
//! removed from the pending store before [`DispatchContext::dispatch`] is
//! called, so no later decision can see them as pending.
//!
//! Two families exist:
//! - [`FlatExclusive`]: a flat queue; each exclusive item is sent alone.
//! - [`ScopedExclusive`]: items grouped by scope; exclusive items get a scope
//!   of their own and are handed out before ordinary scopes.

use std::sync::Arc;

use crate::config::{PolicyKind, SchedulerConfig};
use crate::scheduler::assigner::{WorkerPhase, WorkerState, WorkerTable};
use crate::scheduler::collection::Collection;
use crate::scheduler::exclusive::{Classifier, ExclusiveSet};
use crate::scheduler::flat::FlatExclusive;
use crate::scheduler::scoped::ScopedExclusive;
use crate::scheduler::WorkerId;
use crate::transport::WorkerTransport;

/// Items chosen for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    pub items: Vec<usize>,
    /// The batch is exclusive work and nothing else.
    pub exclusive: bool,
}

impl Batch {
    pub fn shared(items: Vec<usize>) -> Self {
        Self {
            items,
            exclusive: false,
        }
    }

    pub fn exclusive(items: Vec<usize>) -> Self {
        Self {
            items,
            exclusive: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Worker bookkeeping and transport handed to a strategy for one decision.
pub struct DispatchContext<'a> {
    workers: &'a mut WorkerTable,
    transport: &'a mut dyn WorkerTransport,
}

impl<'a> DispatchContext<'a> {
    pub fn new(workers: &'a mut WorkerTable, transport: &'a mut dyn WorkerTransport) -> Self {
        Self { workers, transport }
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerState> {
        self.workers.get(id).ok()
    }

    /// The worker, if it can receive work right now.
    pub fn refill_candidate(&self, id: WorkerId) -> Option<&WorkerState> {
        self.worker(id).filter(|w| w.is_active())
    }

    pub fn active_ids(&self) -> Vec<WorkerId> {
        self.workers.active_ids()
    }

    pub fn active_count(&self) -> usize {
        self.workers.active_count()
    }

    pub fn active_workers(&self) -> impl Iterator<Item = &WorkerState> {
        self.workers.iter().filter(|w| w.is_active())
    }

    /// Record `batch` on the worker and hand it to the transport.
    /// Empty batches are dropped without touching anything.
    pub fn dispatch(&mut self, worker: WorkerId, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        let Ok(state) = self.workers.get_mut(worker) else {
            tracing::warn!(worker_id = worker, "Dispatch to unknown worker dropped");
            return;
        };
        state.assign(&batch.items, batch.exclusive);
        tracing::debug!(
            worker_id = worker,
            count = batch.len(),
            exclusive = batch.exclusive,
            "Dispatching items"
        );
        self.transport.dispatch(worker, &batch.items);
    }

    /// Ask a worker to finish what it holds and exit. Repeated calls are ignored.
    pub fn shutdown(&mut self, worker: WorkerId) {
        let Ok(state) = self.workers.get_mut(worker) else {
            return;
        };
        if state.is_shutting_down() {
            return;
        }
        state.phase = WorkerPhase::ShuttingDown;
        tracing::debug!(worker_id = worker, outstanding = state.outstanding(), "Shutting down worker");
        self.transport.request_shutdown(worker);
    }
}

/// A placement policy over its own pending store.
pub trait PlacementStrategy {
    fn name(&self) -> &'static str;

    /// Build the pending store from the freshly frozen collection.
    fn load(&mut self, collection: Arc<Collection>);

    /// Items not yet dispatched.
    fn pending_len(&self) -> usize;

    fn has_pending(&self) -> bool {
        self.pending_len() > 0
    }

    /// Snapshot of every pending index.
    fn pending_indices(&self) -> Vec<usize>;

    /// Exclusive items not yet dispatched.
    fn unscheduled_exclusive(&self) -> usize;

    /// First distribution right after the freeze.
    fn initial_distribution(&mut self, ctx: &mut DispatchContext<'_>);

    /// Offer `worker` more work after it completed an item (taking
    /// `duration` seconds) or after other workers changed.
    fn refill(&mut self, worker: WorkerId, duration: f64, ctx: &mut DispatchContext<'_>);

    /// Put recovered indices back into the pending store.
    fn requeue(&mut self, indices: &[usize]);

    /// The worker is gone; forget anything tied to it.
    fn worker_removed(&mut self, _worker: WorkerId) {}
}

/// Strategy chosen from configuration at runtime.
#[derive(Debug)]
pub enum Placement {
    Flat(FlatExclusive),
    Scoped(ScopedExclusive),
}

impl Placement {
    pub fn from_config(config: &SchedulerConfig, exclusive: ExclusiveSet) -> Self {
        match config.policy {
            PolicyKind::Load => Placement::Flat(FlatExclusive::new(
                exclusive,
                config.refill.clone(),
                config.max_chunk,
            )),
            PolicyKind::LoadFile | PolicyKind::LoadScope => {
                Placement::Scoped(ScopedExclusive::new(
                    Classifier::new(exclusive),
                    config.refill.clone(),
                    config.dedicated_nodes,
                ))
            }
        }
    }
}

/// Forward a call to whichever strategy is selected.
macro_rules! delegate {
    ($self:ident, $strategy:ident => $call:expr) => {
        match $self {
            Placement::Flat($strategy) => $call,
            Placement::Scoped($strategy) => $call,
        }
    };
}

impl PlacementStrategy for Placement {
    fn name(&self) -> &'static str {
        delegate!(self, s => s.name())
    }

    fn load(&mut self, collection: Arc<Collection>) {
        delegate!(self, s => s.load(collection))
    }

    fn pending_len(&self) -> usize {
        delegate!(self, s => s.pending_len())
    }

    fn pending_indices(&self) -> Vec<usize> {
        delegate!(self, s => s.pending_indices())
    }

    fn unscheduled_exclusive(&self) -> usize {
        delegate!(self, s => s.unscheduled_exclusive())
    }

    fn initial_distribution(&mut self, ctx: &mut DispatchContext<'_>) {
        delegate!(self, s => s.initial_distribution(ctx))
    }

    fn refill(&mut self, worker: WorkerId, duration: f64, ctx: &mut DispatchContext<'_>) {
        delegate!(self, s => s.refill(worker, duration, ctx))
    }

    fn requeue(&mut self, indices: &[usize]) {
        delegate!(self, s => s.requeue(indices))
    }

    fn worker_removed(&mut self, worker: WorkerId) {
        delegate!(self, s => s.worker_removed(worker))
    }
}

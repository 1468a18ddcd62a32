use std::sync::Arc;

use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::scheduler::assigner::{WorkerPhase, WorkerState, WorkerTable};
use crate::scheduler::collection::{Collection, CollectionRegistry};
use crate::scheduler::exclusive::ExclusiveSet;
use crate::scheduler::placement::{DispatchContext, Placement, PlacementStrategy};
use crate::scheduler::WorkerId;
use crate::transport::{WorkerEvent, WorkerTransport};

/// The item a worker was presumably running when it went away.
///
/// It is handed back to the caller and never resubmitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashItem {
    pub worker: WorkerId,
    pub index: usize,
    pub id: String,
}

/// Worker lifecycle controller.
///
/// Every event goes through `&mut self` one at a time, so placement
/// decisions never interleave. Dispatch and shutdown calls on the transport
/// are fire-and-forget; their results come back as later events.
#[derive(Debug)]
pub struct Scheduler<P: PlacementStrategy, T: WorkerTransport> {
    config: SchedulerConfig,
    exclusive: ExclusiveSet,
    registry: CollectionRegistry,
    workers: WorkerTable,
    placement: P,
    transport: T,
    collection: Option<Arc<Collection>>,
    completed: usize,
    crash_items: Vec<CrashItem>,
}

impl<T: WorkerTransport> Scheduler<Placement, T> {
    /// Scheduler with the placement family selected by `config.policy`.
    pub fn new(config: SchedulerConfig, exclusive: ExclusiveSet, transport: T) -> Result<Self> {
        let placement = Placement::from_config(&config, exclusive.clone());
        Self::with_strategy(config, exclusive, placement, transport)
    }
}

impl<P: PlacementStrategy, T: WorkerTransport> Scheduler<P, T> {
    pub fn with_strategy(
        config: SchedulerConfig,
        exclusive: ExclusiveSet,
        placement: P,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            policy = %config.policy,
            strategy = placement.name(),
            workers = config.worker_count,
            exclusive = exclusive.len(),
            dedicated_nodes = config.dedicated_nodes,
            "Scheduler created"
        );
        Ok(Self {
            registry: CollectionRegistry::new(config.worker_count),
            config,
            exclusive,
            workers: WorkerTable::new(),
            placement,
            transport,
            collection: None,
            completed: 0,
            crash_items: Vec::new(),
        })
    }

    /// Add a worker with nothing assigned.
    pub fn register(&mut self, worker: WorkerId) -> Result<()> {
        self.workers.register(worker)
    }

    /// Record a worker's enumeration. The report that completes the set
    /// freezes the collection and runs the initial distribution. Reports
    /// after the freeze come from late joiners and are validated against the
    /// frozen collection.
    pub fn report_enumeration(&mut self, worker: WorkerId, items: Vec<String>) -> Result<()> {
        let phase = self.workers.get(worker)?.phase;
        if phase == WorkerPhase::Rejected {
            tracing::warn!(worker_id = worker, "Ignoring collection from rejected worker");
            return Ok(());
        }

        if self.registry.is_frozen() {
            return self.admit_late_worker(worker, items);
        }

        let outcome = self.registry.report(worker, items)?;
        let state = self.workers.get_mut(worker)?;
        if state.phase == WorkerPhase::Registered {
            state.phase = WorkerPhase::Collecting;
        }
        tracing::debug!(
            worker_id = worker,
            %outcome,
            reported = self.registry.reported(),
            expected = self.config.worker_count,
            "Collection reported"
        );

        if self.registry.is_ready() {
            self.schedule()?;
        }
        Ok(())
    }

    fn admit_late_worker(&mut self, worker: WorkerId, items: Vec<String>) -> Result<()> {
        if let Err(err) = self.registry.report(worker, items) {
            tracing::error!(worker_id = worker, error = %err, "Late worker collected different tests");
            self.workers.get_mut(worker)?.phase = WorkerPhase::Rejected;
            self.transport.request_shutdown(worker);
            return Err(err);
        }
        self.workers.get_mut(worker)?.activate();
        tracing::info!(worker_id = worker, "Late worker joined");
        self.refill_worker(worker, 0.0);
        self.shutdown_if_drained();
        Ok(())
    }

    /// Freeze the collection and hand out the first batches.
    fn schedule(&mut self) -> Result<()> {
        let reported = self
            .workers
            .iter()
            .filter(|w| w.phase == WorkerPhase::Collecting)
            .count();
        let collection = self.registry.freeze(&self.exclusive, reported)?;
        let missing = self.exclusive.missing_from(&collection);
        if !missing.is_empty() {
            tracing::debug!(
                count = missing.len(),
                "Exclusive entries not present in the collection are ignored"
            );
        }

        self.placement.load(Arc::clone(&collection));
        self.collection = Some(collection);

        let collecting: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|w| w.phase == WorkerPhase::Collecting)
            .map(|w| w.id)
            .collect();
        for id in collecting {
            self.workers.get_mut(id)?.activate();
        }

        let mut ctx = DispatchContext::new(&mut self.workers, &mut self.transport);
        self.placement.initial_distribution(&mut ctx);
        tracing::info!(
            pending = self.placement.pending_len(),
            unscheduled_exclusive = self.placement.unscheduled_exclusive(),
            "Initial distribution done"
        );
        self.shutdown_if_drained();
        Ok(())
    }

    /// A worker finished `index` in `duration` seconds; top it up.
    pub fn complete(&mut self, worker: WorkerId, index: usize, duration: f64) -> Result<()> {
        let state = self.workers.get_mut(worker)?;
        if state.complete(index) {
            self.completed += 1;
        } else {
            tracing::warn!(
                worker_id = worker,
                index,
                "Completion for an item the worker does not hold, ignoring"
            );
        }
        self.refill_worker(worker, duration);
        self.shutdown_if_drained();
        Ok(())
    }

    /// A worker died. Everything it held except the first item goes back to
    /// pending; the first item is returned as the crash item.
    pub fn crash(&mut self, worker: WorkerId) -> Result<Option<CrashItem>> {
        self.remove_worker(worker, true)
    }

    /// A worker exited on its own. Items it still held never ran and all go
    /// back to pending.
    pub fn finished(&mut self, worker: WorkerId) -> Result<Option<CrashItem>> {
        self.remove_worker(worker, false)
    }

    fn remove_worker(&mut self, worker: WorkerId, crashed: bool) -> Result<Option<CrashItem>> {
        let state = self.workers.remove(worker)?;
        self.registry.forget(worker);
        self.placement.worker_removed(worker);

        let mut assigned = state.assigned;
        let crash_item = if crashed && !assigned.is_empty() {
            let index = assigned.remove(0);
            let id = self
                .collection
                .as_deref()
                .map(|c| c.label(index).to_string())
                .unwrap_or_default();
            tracing::warn!(
                worker_id = worker,
                item = %id,
                requeued = assigned.len(),
                "Worker crashed with items outstanding"
            );
            let item = CrashItem { worker, index, id };
            self.crash_items.push(item.clone());
            Some(item)
        } else if crashed {
            tracing::warn!(worker_id = worker, "Worker crashed while idle");
            None
        } else {
            if assigned.is_empty() {
                tracing::info!(worker_id = worker, "Worker finished");
            } else {
                tracing::warn!(
                    worker_id = worker,
                    requeued = assigned.len(),
                    "Worker finished without running everything it held"
                );
            }
            None
        };

        if !assigned.is_empty() {
            self.placement.requeue(&assigned);
            self.resume_stopping_workers();
        }
        self.refill_all();
        self.shutdown_if_drained();
        Ok(crash_item)
    }

    /// Workers told to wind down stay connected until they report `finished`.
    fn resume_stopping_workers(&mut self) {
        for id in self.workers.ids() {
            let Ok(state) = self.workers.get_mut(id) else {
                continue;
            };
            if state.resume() {
                tracing::info!(worker_id = id, "Resuming worker for requeued items");
            }
        }
    }

    /// Apply one worker event.
    pub fn handle(&mut self, event: WorkerEvent) -> Result<Option<CrashItem>> {
        match event {
            WorkerEvent::Registered { worker } => self.register(worker).map(|_| None),
            WorkerEvent::EnumerationReported { worker, items } => {
                self.report_enumeration(worker, items).map(|_| None)
            }
            WorkerEvent::ItemCompleted {
                worker,
                index,
                duration_secs,
            } => self.complete(worker, index, duration_secs).map(|_| None),
            WorkerEvent::Crashed { worker } => self.crash(worker),
            WorkerEvent::Finished { worker } => self.finished(worker),
        }
    }

    /// Tell every worker to finish up and exit (session teardown).
    pub fn shutdown_all(&mut self) {
        let ids = self.workers.ids();
        let mut ctx = DispatchContext::new(&mut self.workers, &mut self.transport);
        for id in ids {
            ctx.shutdown(id);
        }
    }

    fn refill_worker(&mut self, worker: WorkerId, duration: f64) {
        if self.collection.is_none() {
            return;
        }
        let mut ctx = DispatchContext::new(&mut self.workers, &mut self.transport);
        self.placement.refill(worker, duration, &mut ctx);
    }

    fn refill_all(&mut self) {
        for id in self.workers.active_ids() {
            self.refill_worker(id, 0.0);
        }
    }

    /// Once nothing is left to place, every worker may wind down.
    fn shutdown_if_drained(&mut self) {
        if self.collection.is_none() || self.placement.has_pending() {
            return;
        }
        let active = self.workers.active_ids();
        let mut ctx = DispatchContext::new(&mut self.workers, &mut self.transport);
        for id in active {
            ctx.shutdown(id);
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn exclusive(&self) -> &ExclusiveSet {
        &self.exclusive
    }

    pub fn collection(&self) -> Option<&Arc<Collection>> {
        self.collection.as_ref()
    }

    pub fn is_frozen(&self) -> bool {
        self.collection.is_some()
    }

    pub fn placement(&self) -> &P {
        &self.placement
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn worker(&self, id: WorkerId) -> Result<&WorkerState> {
        self.workers.get(id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerState> {
        self.workers.iter()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn pending_len(&self) -> usize {
        self.placement.pending_len()
    }

    /// Items completed so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn crash_items(&self) -> &[CrashItem] {
        &self.crash_items
    }

    /// Work is still waiting somewhere: pending or held by a worker.
    pub fn has_pending(&self) -> bool {
        self.placement.has_pending() || self.workers.iter().any(|w| w.outstanding() > 0)
    }

    /// Items are pending but no registered worker holds anything or is about
    /// to receive work, so no further event can move them.
    pub fn is_stalled(&self) -> bool {
        self.is_frozen()
            && self.placement.has_pending()
            && self.workers.iter().all(|w| {
                w.outstanding() == 0
                    && !matches!(w.phase, WorkerPhase::Registered | WorkerPhase::Collecting)
            })
    }

    /// The collection is frozen and every item has left the scheduler.
    pub fn is_drained(&self) -> bool {
        self.is_frozen() && !self.has_pending()
    }
}

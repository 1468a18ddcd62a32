use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SchedulerError};
use crate::scheduler::WorkerId;

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Connected, has not reported its collection yet.
    Registered,
    /// Reported its collection, waiting for the others.
    Collecting,
    /// Holds dispatched items that have not completed.
    Dispatching,
    /// Ready for work but holds nothing.
    Idle,
    /// Told to finish what it holds and exit.
    ShuttingDown,
    /// Joined late with a different collection; never receives work.
    Rejected,
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerPhase::Registered => write!(f, "registered"),
            WorkerPhase::Collecting => write!(f, "collecting"),
            WorkerPhase::Dispatching => write!(f, "dispatching"),
            WorkerPhase::Idle => write!(f, "idle"),
            WorkerPhase::ShuttingDown => write!(f, "shutting_down"),
            WorkerPhase::Rejected => write!(f, "rejected"),
        }
    }
}

/// Scheduler-side view of one worker.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub id: WorkerId,
    pub phase: WorkerPhase,
    /// Dispatched, not yet completed, in dispatch order.
    pub assigned: Vec<usize>,
    /// Total items ever dispatched to this worker.
    pub dispatched: usize,
    pub received_exclusive: bool,
    pub received_shared: bool,
}

impl WorkerState {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            phase: WorkerPhase::Registered,
            assigned: Vec::new(),
            dispatched: 0,
            received_exclusive: false,
            received_shared: false,
        }
    }

    /// Can take part in placement.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, WorkerPhase::Dispatching | WorkerPhase::Idle)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.phase == WorkerPhase::ShuttingDown
    }

    pub fn outstanding(&self) -> usize {
        self.assigned.len()
    }

    /// Record a dispatch of `items`.
    pub fn assign(&mut self, items: &[usize], exclusive: bool) {
        self.assigned.extend_from_slice(items);
        self.dispatched += items.len();
        if exclusive {
            self.received_exclusive = true;
        } else {
            self.received_shared = true;
        }
        if self.phase == WorkerPhase::Idle {
            self.phase = WorkerPhase::Dispatching;
        }
    }

    /// Drop a completed index. Returns false if the worker did not hold it.
    pub fn complete(&mut self, index: usize) -> bool {
        let Some(pos) = self.assigned.iter().position(|&i| i == index) else {
            return false;
        };
        self.assigned.remove(pos);
        if self.assigned.is_empty() && self.phase == WorkerPhase::Dispatching {
            self.phase = WorkerPhase::Idle;
        }
        true
    }

    /// Put a worker that was told to wind down back into rotation.
    /// Returns false unless it was shutting down.
    pub fn resume(&mut self) -> bool {
        if self.phase != WorkerPhase::ShuttingDown {
            return false;
        }
        self.phase = if self.assigned.is_empty() {
            WorkerPhase::Idle
        } else {
            WorkerPhase::Dispatching
        };
        true
    }

    /// Mark the worker ready once the collection is agreed on.
    pub fn activate(&mut self) {
        if matches!(self.phase, WorkerPhase::Registered | WorkerPhase::Collecting) {
            self.phase = if self.assigned.is_empty() {
                WorkerPhase::Idle
            } else {
                WorkerPhase::Dispatching
            };
        }
    }
}

/// Registered workers, remembered in registration order.
#[derive(Debug, Default)]
pub struct WorkerTable {
    order: Vec<WorkerId>,
    workers: HashMap<WorkerId, WorkerState>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: WorkerId) -> Result<()> {
        if self.workers.contains_key(&id) {
            return Err(SchedulerError::AlreadyRegistered(id));
        }
        self.order.push(id);
        self.workers.insert(id, WorkerState::new(id));
        tracing::info!(worker_id = id, "Worker registered");
        Ok(())
    }

    pub fn remove(&mut self, id: WorkerId) -> Result<WorkerState> {
        let state = self
            .workers
            .remove(&id)
            .ok_or(SchedulerError::NodeNotFound(id))?;
        self.order.retain(|&w| w != id);
        Ok(state)
    }

    pub fn get(&self, id: WorkerId) -> Result<&WorkerState> {
        self.workers.get(&id).ok_or(SchedulerError::NodeNotFound(id))
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Result<&mut WorkerState> {
        self.workers
            .get_mut(&id)
            .ok_or(SchedulerError::NodeNotFound(id))
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Worker ids in registration order.
    pub fn ids(&self) -> Vec<WorkerId> {
        self.order.clone()
    }

    /// Workers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkerState> {
        self.order.iter().filter_map(|id| self.workers.get(id))
    }

    /// Workers that can receive work, in registration order.
    pub fn active_ids(&self) -> Vec<WorkerId> {
        self.iter().filter(|w| w.is_active()).map(|w| w.id).collect()
    }

    pub fn active_count(&self) -> usize {
        self.iter().filter(|w| w.is_active()).count()
    }
}

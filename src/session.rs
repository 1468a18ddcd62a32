//! Local session: one control loop driving the scheduler and a set of
//! in-process workers.
//!
//! The loop owns the [`Scheduler`] outright and applies one
//! [`WorkerEvent`] at a time. Workers run as separate tokio tasks and are
//! reached through a [`ChannelTransport`]. Crashed workers may be replaced
//! by fresh ones, which join as late workers against the frozen collection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{PolicyKind, SchedulerConfig, SimulationConfig};
use crate::error::{Result, SchedulerError};
use crate::scheduler::{CrashItem, ExclusiveSet, Placement, Scheduler, WorkerId};
use crate::transport::{ChannelTransport, TransportCall, WorkerEvent};
use crate::worker::{SimulatedWorker, WorkerExit};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What one worker received over the session.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker: WorkerId,
    /// Identifiers dispatched to the worker, in dispatch order.
    pub items: Vec<String>,
    /// The subset of `items` that is exclusive.
    pub exclusive: Vec<String>,
    pub batches: usize,
}

/// Outcome of a local session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub policy: PolicyKind,
    pub dedicated_nodes: bool,
    pub total_items: usize,
    pub completed: usize,
    /// Items still pending when the session ended.
    pub unfinished: usize,
    pub respawned: usize,
    pub cancelled: bool,
    pub stalled: bool,
    pub workers: Vec<WorkerReport>,
    pub crash_items: Vec<CrashItem>,
}

impl SessionReport {
    /// Every collected item either completed or was lost in a crash.
    pub fn is_complete(&self) -> bool {
        self.unfinished == 0 && self.completed + self.crash_items.len() == self.total_items
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Scheduler, transport and simulated workers wired together.
pub struct LocalSession {
    config: SchedulerConfig,
    simulation: SimulationConfig,
    exclusive: ExclusiveSet,
    enumeration: Vec<String>,
}

impl LocalSession {
    pub fn new(
        config: SchedulerConfig,
        simulation: SimulationConfig,
        exclusive: ExclusiveSet,
        enumeration: Vec<String>,
    ) -> Self {
        Self {
            config,
            simulation,
            exclusive,
            enumeration,
        }
    }

    /// Run the session until every worker has exited.
    ///
    /// # Errors
    ///
    /// Returns the first fatal scheduling error (invalid configuration, too
    /// few workers for the exclusive items, or mismatched enumerations at
    /// freeze) after all workers have been told to stop and have exited.
    pub async fn run(self, cancel: CancellationToken) -> Result<SessionReport> {
        self.simulation.validate()?;
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            session_id = %session_id,
            policy = %self.config.policy,
            workers = self.config.worker_count,
            items = self.enumeration.len(),
            "Starting local session"
        );

        let mut scheduler =
            Scheduler::new(self.config.clone(), self.exclusive.clone(), ChannelTransport::new())?;
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut handles: Vec<JoinHandle<WorkerExit>> = Vec::new();
        let mut next_id: WorkerId = 1;
        for _ in 0..self.config.worker_count {
            handles.push(self.spawn_worker(next_id, &mut scheduler, &event_tx));
            next_id += 1;
        }

        let mut live = handles.len();
        let mut respawns_left = self.simulation.respawn_budget;
        let mut respawned = 0;
        let mut cancelled = false;
        let mut stalled = false;
        let mut failure: Option<SchedulerError> = None;

        while live > 0 {
            let event = tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    tracing::warn!(session_id = %session_id, "Session cancelled, stopping workers");
                    cancelled = true;
                    scheduler.shutdown_all();
                    continue;
                }
                event = event_rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            let worker = event.worker();
            let leaving = matches!(
                event,
                WorkerEvent::Crashed { .. } | WorkerEvent::Finished { .. }
            );
            let crashed = matches!(event, WorkerEvent::Crashed { .. });
            if leaving {
                live -= 1;
                scheduler.transport_mut().detach(worker);
            }

            match scheduler.handle(event) {
                Ok(_) => {}
                Err(err) if failure.is_none() && aborts_session(&err, scheduler.is_frozen()) => {
                    tracing::error!(error = %err, "Scheduling failed, stopping workers");
                    scheduler.shutdown_all();
                    failure = Some(err);
                }
                Err(err) => {
                    tracing::warn!(worker_id = worker, error = %err, "Worker event rejected");
                }
            }

            if cancelled {
                // Workers that registered after the cancel still need telling.
                scheduler.shutdown_all();
            }

            if crashed
                && respawns_left > 0
                && !cancelled
                && failure.is_none()
                && scheduler.has_pending()
            {
                respawns_left -= 1;
                respawned += 1;
                tracing::info!(replaced = worker, worker_id = next_id, "Replacing crashed worker");
                handles.push(self.spawn_worker(next_id, &mut scheduler, &event_tx));
                next_id += 1;
                live += 1;
            }

            if !stalled
                && !cancelled
                && failure.is_none()
                && live == scheduler.worker_count()
                && scheduler.is_stalled()
            {
                tracing::error!(
                    pending = scheduler.pending_len(),
                    "Pending items cannot be placed on any remaining worker"
                );
                stalled = true;
                scheduler.shutdown_all();
            }
        }

        if !stalled && !cancelled && failure.is_none() && scheduler.pending_len() > 0 {
            tracing::error!(
                pending = scheduler.pending_len(),
                "Every worker exited with items still pending"
            );
            stalled = true;
        }

        drop(event_tx);
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Worker task failed");
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        let report = build_report(
            session_id,
            started_at,
            &scheduler,
            &self.exclusive,
            respawned,
            cancelled,
            stalled,
        );
        tracing::info!(
            session_id = %session_id,
            completed = report.completed,
            crashed = report.crash_items.len(),
            unfinished = report.unfinished,
            duration_ms = report.duration_ms(),
            "Session finished"
        );
        Ok(report)
    }

    fn spawn_worker(
        &self,
        id: WorkerId,
        scheduler: &mut Scheduler<Placement, ChannelTransport>,
        events: &mpsc::Sender<WorkerEvent>,
    ) -> JoinHandle<WorkerExit> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        scheduler.transport_mut().attach(id, command_tx);
        SimulatedWorker::new(
            id,
            self.enumeration.clone(),
            self.simulation.clone(),
            events.clone(),
            command_rx,
        )
        .spawn()
    }
}

/// Errors after which no dispatch can happen. A mismatch from a late joiner
/// only rejects that worker.
fn aborts_session(err: &SchedulerError, frozen: bool) -> bool {
    err.is_fatal_configuration()
        || (!frozen && matches!(err, SchedulerError::CollectionMismatch(_)))
}

fn build_report(
    session_id: Uuid,
    started_at: DateTime<Utc>,
    scheduler: &Scheduler<Placement, ChannelTransport>,
    exclusive: &ExclusiveSet,
    respawned: usize,
    cancelled: bool,
    stalled: bool,
) -> SessionReport {
    let collection = scheduler.collection();
    let label = |index: usize| {
        collection
            .map(|c| c.label(index).to_string())
            .unwrap_or_default()
    };

    let mut order: Vec<WorkerId> = Vec::new();
    let mut workers: HashMap<WorkerId, WorkerReport> = HashMap::new();
    for call in scheduler.transport().log() {
        let TransportCall::Dispatch { worker, items } = call else {
            continue;
        };
        let report = workers.entry(*worker).or_insert_with(|| {
            order.push(*worker);
            WorkerReport {
                worker: *worker,
                items: Vec::new(),
                exclusive: Vec::new(),
                batches: 0,
            }
        });
        report.batches += 1;
        for &index in items {
            let id = label(index);
            if exclusive.contains(&id) {
                report.exclusive.push(id.clone());
            }
            report.items.push(id);
        }
    }

    let config = scheduler.config();
    SessionReport {
        session_id,
        started_at,
        finished_at: Utc::now(),
        policy: config.policy,
        dedicated_nodes: config.dedicated_nodes,
        total_items: collection.map(|c| c.len()).unwrap_or(0),
        completed: scheduler.completed(),
        unfinished: scheduler.pending_len(),
        respawned,
        cancelled,
        stalled,
        workers: order
            .into_iter()
            .filter_map(|id| workers.remove(&id))
            .collect(),
        crash_items: scheduler.crash_items().to_vec(),
    }
}

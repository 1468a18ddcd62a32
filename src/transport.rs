//! Seam between the scheduler and the processes that run work items.
//!
//! The scheduler only ever calls [`WorkerTransport::dispatch`] and
//! [`WorkerTransport::request_shutdown`]; both are fire-and-forget and their
//! outcome comes back later as a [`WorkerEvent`].

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::scheduler::WorkerId;

/// Outbound side of the worker connection.
pub trait WorkerTransport {
    /// Send collection indices for the worker to run, in order.
    fn dispatch(&mut self, worker: WorkerId, items: &[usize]);

    /// Ask the worker to finish what it holds and exit.
    fn request_shutdown(&mut self, worker: WorkerId);
}

/// Instruction delivered to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    RunItems(Vec<usize>),
    Shutdown,
}

/// Notification delivered from a worker to the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Registered {
        worker: WorkerId,
    },
    EnumerationReported {
        worker: WorkerId,
        items: Vec<String>,
    },
    ItemCompleted {
        worker: WorkerId,
        index: usize,
        duration_secs: f64,
    },
    /// The worker died; whatever it held is lost.
    Crashed {
        worker: WorkerId,
    },
    /// The worker exited after a shutdown request.
    Finished {
        worker: WorkerId,
    },
}

impl WorkerEvent {
    pub fn worker(&self) -> WorkerId {
        match self {
            WorkerEvent::Registered { worker }
            | WorkerEvent::EnumerationReported { worker, .. }
            | WorkerEvent::ItemCompleted { worker, .. }
            | WorkerEvent::Crashed { worker }
            | WorkerEvent::Finished { worker } => *worker,
        }
    }
}

/// A call the scheduler made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Dispatch { worker: WorkerId, items: Vec<usize> },
    Shutdown { worker: WorkerId },
}

/// Transport that only records calls. Used to drive the scheduler by hand.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    calls: Vec<TransportCall>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[TransportCall] {
        &self.calls
    }

    /// Every dispatch as `(worker, items)`, in call order.
    pub fn dispatches(&self) -> Vec<(WorkerId, Vec<usize>)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Dispatch { worker, items } => Some((*worker, items.clone())),
                TransportCall::Shutdown { .. } => None,
            })
            .collect()
    }

    /// All items dispatched to `worker`, flattened in call order.
    pub fn dispatched_to(&self, worker: WorkerId) -> Vec<usize> {
        self.dispatches()
            .into_iter()
            .filter(|(w, _)| *w == worker)
            .flat_map(|(_, items)| items)
            .collect()
    }

    pub fn shutdowns(&self) -> Vec<WorkerId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Shutdown { worker } => Some(*worker),
                TransportCall::Dispatch { .. } => None,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl WorkerTransport for RecordingTransport {
    fn dispatch(&mut self, worker: WorkerId, items: &[usize]) {
        self.calls.push(TransportCall::Dispatch {
            worker,
            items: items.to_vec(),
        });
    }

    fn request_shutdown(&mut self, worker: WorkerId) {
        self.calls.push(TransportCall::Shutdown { worker });
    }
}

/// Transport over unbounded tokio channels, one per worker task.
///
/// Sends never block; a closed channel means the worker is gone and its
/// crash or exit event is already on the way.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: HashMap<WorkerId, mpsc::UnboundedSender<WorkerCommand>>,
    log: Vec<TransportCall>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, worker: WorkerId, sender: mpsc::UnboundedSender<WorkerCommand>) {
        self.senders.insert(worker, sender);
    }

    pub fn detach(&mut self, worker: WorkerId) {
        self.senders.remove(&worker);
    }

    pub fn log(&self) -> &[TransportCall] {
        &self.log
    }

    fn send(&self, worker: WorkerId, command: WorkerCommand) {
        let Some(sender) = self.senders.get(&worker) else {
            tracing::warn!(worker_id = worker, "No channel for worker, command dropped");
            return;
        };
        if sender.send(command).is_err() {
            tracing::warn!(worker_id = worker, "Worker channel closed, command dropped");
        }
    }
}

impl WorkerTransport for ChannelTransport {
    fn dispatch(&mut self, worker: WorkerId, items: &[usize]) {
        self.log.push(TransportCall::Dispatch {
            worker,
            items: items.to_vec(),
        });
        self.send(worker, WorkerCommand::RunItems(items.to_vec()));
    }

    fn request_shutdown(&mut self, worker: WorkerId) {
        self.log.push(TransportCall::Shutdown { worker });
        self.send(worker, WorkerCommand::Shutdown);
    }
}

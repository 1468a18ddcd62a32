use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SimulationConfig;
use crate::scheduler::WorkerId;
use crate::transport::{WorkerCommand, WorkerEvent};

/// How a simulated worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Ran everything it was given and exited after a shutdown request.
    Finished,
    /// Died while running an item.
    Crashed,
    /// The control loop went away first.
    Disconnected,
}

/// Worker task that "runs" items by sleeping for a random duration.
///
/// It registers, reports its enumeration, then runs dispatched indices in
/// order. Commands that arrive while an item runs are picked up between
/// items. After a shutdown request it drains its queue and reports
/// `Finished`.
pub struct SimulatedWorker {
    id: WorkerId,
    enumeration: Vec<String>,
    config: SimulationConfig,
    events: mpsc::Sender<WorkerEvent>,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    rng: StdRng,
}

impl SimulatedWorker {
    pub fn new(
        id: WorkerId,
        enumeration: Vec<String>,
        config: SimulationConfig,
        events: mpsc::Sender<WorkerEvent>,
        commands: mpsc::UnboundedReceiver<WorkerCommand>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id)),
            None => StdRng::from_entropy(),
        };
        Self {
            id,
            enumeration,
            config,
            events,
            commands,
            rng,
        }
    }

    pub fn spawn(self) -> JoinHandle<WorkerExit> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> WorkerExit {
        let worker = self.id;
        let enumeration = std::mem::take(&mut self.enumeration);
        if !self.emit(WorkerEvent::Registered { worker }).await
            || !self
                .emit(WorkerEvent::EnumerationReported {
                    worker,
                    items: enumeration,
                })
                .await
        {
            return WorkerExit::Disconnected;
        }

        let mut queue: VecDeque<usize> = VecDeque::new();
        let mut shutting_down = false;

        loop {
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command, &mut queue, &mut shutting_down);
            }

            if let Some(index) = queue.pop_front() {
                let started = Instant::now();
                let ms = self
                    .rng
                    .gen_range(self.config.min_item_ms..=self.config.max_item_ms);
                tokio::time::sleep(Duration::from_millis(ms)).await;

                if self.config.crash_probability > 0.0
                    && self.rng.gen_bool(self.config.crash_probability)
                {
                    tracing::warn!(worker_id = worker, index, "Simulated worker crashed");
                    self.emit(WorkerEvent::Crashed { worker }).await;
                    return WorkerExit::Crashed;
                }

                let event = WorkerEvent::ItemCompleted {
                    worker,
                    index,
                    duration_secs: started.elapsed().as_secs_f64(),
                };
                if !self.emit(event).await {
                    return WorkerExit::Disconnected;
                }
                continue;
            }

            if shutting_down {
                tracing::debug!(worker_id = worker, "Simulated worker finished");
                self.emit(WorkerEvent::Finished { worker }).await;
                return WorkerExit::Finished;
            }

            let next = self.commands.recv().await;
            match next {
                Some(command) => self.apply(command, &mut queue, &mut shutting_down),
                None => return WorkerExit::Disconnected,
            }
        }
    }

    fn apply(&self, command: WorkerCommand, queue: &mut VecDeque<usize>, shutting_down: &mut bool) {
        match command {
            WorkerCommand::RunItems(items) => {
                tracing::debug!(worker_id = self.id, count = items.len(), "Received items");
                queue.extend(items);
            }
            WorkerCommand::Shutdown => *shutting_down = true,
        }
    }

    async fn emit(&self, event: WorkerEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{Result, SchedulerError};
use crate::scheduler::exclusive::ExclusiveSet;
use crate::scheduler::WorkerId;

/// The frozen, ordered list of work item identifiers agreed on by all workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    items: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Collection {
    pub fn new(items: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(items.len());
        for (index, id) in items.iter().enumerate() {
            // First occurrence wins, matching a front-to-back search.
            positions.entry(id.clone()).or_insert(index);
        }
        Self { items, positions }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    /// Identifier for an index, or a placeholder for diagnostics.
    pub fn label(&self, index: usize) -> &str {
        self.get(index).unwrap_or("<unknown>")
    }
}

/// Two workers collected different items.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Different tests were collected between {canonical_worker} and {other_worker}: \
     first difference at position {position} ({} vs {})",
    display_slot(.expected),
    display_slot(.found)
)]
pub struct CollectionMismatch {
    pub canonical_worker: WorkerId,
    pub other_worker: WorkerId,
    pub position: usize,
    /// Canonical item at `position`, `None` past the end.
    pub expected: Option<String>,
    /// The other worker's item at `position`, `None` past the end.
    pub found: Option<String>,
    pub canonical_len: usize,
    pub other_len: usize,
}

fn display_slot(slot: &Option<String>) -> String {
    match slot {
        Some(id) => format!("'{}'", id),
        None => "<end>".to_string(),
    }
}

impl CollectionMismatch {
    /// Compare two enumerations; `None` when identical.
    pub fn compare(
        canonical_worker: WorkerId,
        canonical: &[String],
        other_worker: WorkerId,
        other: &[String],
    ) -> Option<Self> {
        let position = canonical
            .iter()
            .zip(other.iter())
            .position(|(a, b)| a != b)
            .or_else(|| (canonical.len() != other.len()).then(|| canonical.len().min(other.len())))?;

        Some(Self {
            canonical_worker,
            other_worker,
            position,
            expected: canonical.get(position).cloned(),
            found: other.get(position).cloned(),
            canonical_len: canonical.len(),
            other_len: other.len(),
        })
    }
}

/// Outcome of recording a worker's enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Stored; the collection is not frozen yet.
    Recorded,
    /// The collection was already frozen and this enumeration matches it.
    Validated,
}

/// Accumulates per-worker enumerations until the collection can be frozen.
#[derive(Debug)]
pub struct CollectionRegistry {
    expected_workers: usize,
    reports: Vec<(WorkerId, Vec<String>)>,
    frozen: Option<Arc<Collection>>,
    canonical_worker: Option<WorkerId>,
}

impl CollectionRegistry {
    pub fn new(expected_workers: usize) -> Self {
        Self {
            expected_workers,
            reports: Vec::new(),
            frozen: None,
            canonical_worker: None,
        }
    }

    /// Record a worker's enumeration. After the freeze the enumeration is
    /// checked against the frozen collection instead.
    pub fn report(&mut self, worker: WorkerId, items: Vec<String>) -> Result<ReportOutcome> {
        if let Some(collection) = &self.frozen {
            let canonical_worker = self.canonical_worker.unwrap_or(worker);
            if let Some(mismatch) =
                CollectionMismatch::compare(canonical_worker, collection.as_slice(), worker, &items)
            {
                return Err(mismatch.into());
            }
            return Ok(ReportOutcome::Validated);
        }

        match self.reports.iter_mut().find(|(id, _)| *id == worker) {
            Some((_, existing)) => {
                tracing::warn!(worker_id = worker, "Worker reported its collection twice, keeping latest");
                *existing = items;
            }
            None => self.reports.push((worker, items)),
        }
        Ok(ReportOutcome::Recorded)
    }

    /// Drop a worker's enumeration (worker left before the freeze).
    pub fn forget(&mut self, worker: WorkerId) {
        if self.frozen.is_none() {
            self.reports.retain(|(id, _)| *id != worker);
        }
    }

    pub fn reported(&self) -> usize {
        self.reports.len()
    }

    pub fn is_ready(&self) -> bool {
        self.frozen.is_some() || self.reports.len() >= self.expected_workers
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn collection(&self) -> Option<&Arc<Collection>> {
        self.frozen.as_ref()
    }

    /// Validate all enumerations and freeze the canonical collection.
    ///
    /// The first reporter is canonical. Fails if any enumeration differs, or
    /// if the collected exclusive items would leave no worker for the rest.
    pub fn freeze(
        &mut self,
        exclusive: &ExclusiveSet,
        registered_workers: usize,
    ) -> Result<Arc<Collection>> {
        if let Some(collection) = &self.frozen {
            return Ok(Arc::clone(collection));
        }
        if !self.is_ready() {
            return Err(SchedulerError::CollectionIncomplete {
                reported: self.reports.len(),
                expected: self.expected_workers,
            });
        }

        let (canonical_worker, canonical) = &self.reports[0];
        for (worker, items) in &self.reports[1..] {
            if let Some(mismatch) =
                CollectionMismatch::compare(*canonical_worker, canonical, *worker, items)
            {
                tracing::error!(
                    canonical_worker = mismatch.canonical_worker,
                    other_worker = mismatch.other_worker,
                    position = mismatch.position,
                    "Different tests collected, aborting run"
                );
                return Err(mismatch.into());
            }
        }

        let collection = Collection::new(canonical.clone());
        let exclusive_count = exclusive.indices_in(&collection).len();
        if exclusive_count >= registered_workers {
            return Err(SchedulerError::NotEnoughWorkers {
                exclusive: exclusive_count,
                workers: registered_workers,
            });
        }

        let collection = Arc::new(collection);
        self.canonical_worker = Some(*canonical_worker);
        self.frozen = Some(Arc::clone(&collection));
        self.reports.clear();
        tracing::info!(
            items = collection.len(),
            exclusive = exclusive_count,
            "Collection frozen"
        );
        Ok(collection)
    }
}

impl fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportOutcome::Recorded => write!(f, "recorded"),
            ReportOutcome::Validated => write!(f, "validated"),
        }
    }
}

use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::collection::CollectionMismatch;
use crate::scheduler::WorkerId;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Not enough workers ({workers}) for exclusive items ({exclusive})")]
    NotEnoughWorkers { exclusive: usize, workers: usize },

    #[error("Exclusive item list '{0}' not found")]
    MissingExclusiveSource(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    CollectionMismatch(#[from] Box<CollectionMismatch>),

    #[error("Worker not found: {0}")]
    NodeNotFound(WorkerId),

    #[error("Worker already registered: {0}")]
    AlreadyRegistered(WorkerId),

    #[error("Collection incomplete: {reported} of {expected} workers reported")]
    CollectionIncomplete { reported: usize, expected: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Configuration problems that abort the session before any dispatch.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            SchedulerError::NotEnoughWorkers { .. }
                | SchedulerError::MissingExclusiveSource(_)
                | SchedulerError::InvalidConfig(_)
        )
    }
}

impl From<CollectionMismatch> for SchedulerError {
    fn from(mismatch: CollectionMismatch) -> Self {
        SchedulerError::CollectionMismatch(Box::new(mismatch))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

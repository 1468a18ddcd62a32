use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Result, SchedulerError};

pub const DEFAULT_EXCLUSIVE_SOURCE: &str = "tests/resources/exclusive_tests.txt";

/// Which placement family drives the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Flat pending queue, exclusive items dispatched one per batch.
    #[default]
    Load,
    /// Scoped by file (identifier before the first `::`), exclusive items in
    /// scopes of their own.
    LoadFile,
    /// Grouped by file like `LoadFile`, usually combined with dedicated nodes.
    LoadScope,
}

impl PolicyKind {
    pub fn is_scoped(&self) -> bool {
        !matches!(self, PolicyKind::Load)
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Load => write!(f, "load"),
            PolicyKind::LoadFile => write!(f, "loadfile"),
            PolicyKind::LoadScope => write!(f, "loadscope"),
        }
    }
}

/// What to do when the exclusive item list does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingSourcePolicy {
    /// Abort the session with `MissingExclusiveSource`.
    #[default]
    Fail,
    /// Log a warning and continue with an empty exclusive set.
    Empty,
}

#[derive(Debug, Clone)]
pub struct ExclusiveSourceConfig {
    pub path: PathBuf,
    pub missing: MissingSourcePolicy,
}

impl Default for ExclusiveSourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_EXCLUSIVE_SOURCE),
            missing: MissingSourcePolicy::default(),
        }
    }
}

/// Batch sizing knobs. None of these affect correctness, only how work is
/// spread across workers.
#[derive(Debug, Clone, PartialEq)]
pub struct RefillConfig {
    /// Smallest batch handed out when a worker is refilled.
    pub min_batch: usize,
    /// Low-water mark is `pending / workers / low_divisor`.
    pub low_divisor: usize,
    /// High-water mark is `pending / workers / high_divisor`.
    pub high_divisor: usize,
    /// Initial chunk is `collection / workers / initial_divisor`.
    pub initial_divisor: usize,
    /// An item slower than this (seconds) lets a busy worker keep its queue.
    pub slow_item_secs: f64,
    /// Scoped policies leave a worker alone while it holds more than this.
    pub scope_prefetch: usize,
}

impl Default for RefillConfig {
    fn default() -> Self {
        Self {
            min_batch: 2,
            low_divisor: 4,
            high_divisor: 2,
            initial_divisor: 4,
            slow_item_secs: 0.1,
            scope_prefetch: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of workers that must report before the collection is frozen.
    pub worker_count: usize,
    pub policy: PolicyKind,
    /// Workers that ran exclusive work never receive anything else.
    pub dedicated_nodes: bool,
    /// Upper bound on a single refill batch. `None` means the collection size.
    pub max_chunk: Option<usize>,
    pub exclusive_source: ExclusiveSourceConfig,
    pub refill: RefillConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            policy: PolicyKind::default(),
            dedicated_nodes: false,
            max_chunk: None,
            exclusive_source: ExclusiveSourceConfig::default(),
            refill: RefillConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new(worker_count: usize, policy: PolicyKind) -> Self {
        Self {
            worker_count,
            policy,
            ..Default::default()
        }
    }

    pub fn with_dedicated_nodes(mut self, dedicated: bool) -> Self {
        self.dedicated_nodes = dedicated;
        self
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk);
        self
    }

    pub fn with_exclusive_source(mut self, path: PathBuf, missing: MissingSourcePolicy) -> Self {
        self.exclusive_source = ExclusiveSourceConfig { path, missing };
        self
    }

    pub fn with_refill(mut self, refill: RefillConfig) -> Self {
        self.refill = refill;
        self
    }

    /// Reject configurations no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.max_chunk == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "max chunk must be at least 1".to_string(),
            ));
        }
        let refill = &self.refill;
        if refill.low_divisor == 0 || refill.high_divisor == 0 || refill.initial_divisor == 0 {
            return Err(SchedulerError::InvalidConfig(
                "refill divisors must be non-zero".to_string(),
            ));
        }
        if self.dedicated_nodes && !self.policy.is_scoped() {
            tracing::warn!(
                policy = %self.policy,
                "Dedicated nodes only apply to scoped policies, ignoring"
            );
        }
        Ok(())
    }
}

/// Knobs for the in-process simulated workers.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub min_item_ms: u64,
    pub max_item_ms: u64,
    /// Probability that a worker dies while running an item.
    pub crash_probability: f64,
    /// How many crashed workers get replaced by fresh ones.
    pub respawn_budget: usize,
    /// Fixed seed for item durations and crashes. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_item_ms: 5,
            max_item_ms: 25,
            crash_probability: 0.0,
            respawn_budget: 0,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn with_item_ms(mut self, min: u64, max: u64) -> Self {
        self.min_item_ms = min;
        self.max_item_ms = max;
        self
    }

    pub fn with_crashes(mut self, probability: f64, respawn_budget: usize) -> Self {
        self.crash_probability = probability;
        self.respawn_budget = respawn_budget;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_item_ms > self.max_item_ms {
            return Err(SchedulerError::InvalidConfig(format!(
                "item duration range {}..={} ms is empty",
                self.min_item_ms, self.max_item_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.crash_probability) {
            return Err(SchedulerError::InvalidConfig(format!(
                "crash probability {} is outside 0..=1",
                self.crash_probability
            )));
        }
        Ok(())
    }
}

pub mod assigner;
pub mod collection;
pub mod controller;
pub mod exclusive;
pub mod flat;
pub mod placement;
pub mod queue;
pub mod scoped;

/// Opaque worker identity assigned by the transport.
pub type WorkerId = u64;

pub use assigner::{WorkerPhase, WorkerState};
pub use collection::{Collection, CollectionMismatch, CollectionRegistry};
pub use controller::{CrashItem, Scheduler};
pub use exclusive::{Classifier, ExclusiveSet, ScopeKey};
pub use flat::FlatExclusive;
pub use placement::{Batch, DispatchContext, Placement, PlacementStrategy};
pub use queue::{PendingQueue, ScopeMap};
pub use scoped::ScopedExclusive;

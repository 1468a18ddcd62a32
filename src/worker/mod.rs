//! In-process workers for local sessions.
//!
//! A [`SimulatedWorker`] stands in for a real test-runner process:
//! - **Registration**: announces itself and reports its enumeration
//! - **Execution**: runs dispatched indices in order, sleeping a random
//!   duration per item
//! - **Failure**: optionally crashes mid-item with a configured probability
//!
//! Workers talk to the control loop only through
//! [`WorkerEvent`](crate::transport::WorkerEvent)s and receive
//! [`WorkerCommand`](crate::transport::WorkerCommand)s.

pub mod simulated;

pub use simulated::{SimulatedWorker, WorkerExit};

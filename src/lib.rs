pub mod config;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod source;
pub mod transport;
pub mod worker;

//! Service implementations
//!
//! This module contains real implementations of all service traits.
//! These are the production implementations that handle actual I/O operations.

pub mod execution_history;
pub mod file_stager;
pub mod health_prober;
pub mod keepalive;
pub mod process_manager;
pub mod process_output_handler;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use execution_history::{DatastoreEndpoint, RealExecutionHistory};
pub use file_stager::RealFileStager;
pub use health_prober::{start_loop, ProbeEvent, ProbeSubscription, RealHealthProber};
pub use keepalive::{KeepaliveHandle, KeepaliveSettings};
pub use process_manager::RealProcessManager;

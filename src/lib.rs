//! prochost - multi-process worker host orchestration
//!
//! Hosts, spare processes, child processes and the services they run are
//! owned by one [`orchestrator::Orchestrator`] on a UI logical thread. Launch
//! and channel results arrive from an IO logical thread as events.

pub mod channel;
pub mod child;
pub mod config;
pub mod error;
pub mod host;
pub mod id;
pub mod launch;
pub mod orchestrator;
pub mod runtime;
pub mod service;
pub mod spare;
pub mod testing;
pub mod threading;

pub use error::{HostError, Result};

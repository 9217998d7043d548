//! Pre-warmed spare worker host.
//!
//! Launching a worker is slow. The [`SpareProcessManager`] keeps at most one
//! launched, unused host around so the next matching request can skip it.

pub mod manager;

pub use manager::{SpareConfig, SpareProcessManager, SpareStats, SpareTakeAction};

//! Utility child processes bound to services rather than contexts.

pub mod data;
pub mod generic_host;
pub mod registry;

pub use data::{ChildProcessData, ChildProcessHostDelegate, ChildProcessObserver, DEFAULT_METRICS_NAME, NoopDelegate};
pub use generic_host::GenericChildProcessHost;
pub use registry::ChildProcessRegistry;

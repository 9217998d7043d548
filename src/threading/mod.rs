//! Logical threads and the task executor.
//!
//! A fixed set of named execution contexts ([`ThreadId`]) is bound to task
//! runners in a [`ThreadRegistry`]. The [`TaskExecutor`] posts work onto
//! them by trait, through proxy runners that resolve the real runner late.

pub mod bound;
pub mod executor;
pub mod manual;
pub mod registry;
pub mod runner;
pub mod startup;
pub mod thread_id;

pub use bound::{SequenceBound, WeakSequenceBound};
pub use executor::{ProxyTaskRunner, TaskExecutor};
pub use manual::ManualTaskRunner;
pub use registry::{ThreadRegistry, ThreadState};
pub use runner::{SequenceThread, Task, TaskRunner};
pub use startup::StartupTaskRunner;
pub use thread_id::{TaskTraits, ThreadId};

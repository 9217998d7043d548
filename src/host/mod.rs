//! Worker hosts.
//!
//! A [`ProcessHost`] is the UI-side owner of one worker slot. The
//! [`HostRegistry`] keeps every live host by id and defers deletion of the
//! ones that finished cleanup.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod events;
pub mod keep_alive;
pub mod observer;
pub mod policy;
pub mod priority;
pub mod process_host;
pub mod registry;
pub mod services;
pub mod state;

pub use config::{HostConfig, MAX_PROCESS_COUNT, MIN_PROCESS_COUNT};
pub use context::{Context, ContextId};
pub use diagnostics::BadMessageReport;
pub use events::{HostEvent, HostEventSink, HostHandle, QueuedEventSink};
pub use keep_alive::{KeepAliveClientType, KeepAliveCounts};
pub use observer::{
    HostRequests, HostSnapshot, Listener, ObserverId, ObserverList, ProcessHostObserver, ProcessType,
};
pub use policy::{DefaultEmbedderPolicy, EmbedderPolicy};
pub use priority::{ClientPriority, Importance, MAX_FRAME_DEPTH_FOR_PRIORITY, PriorityClient, PriorityInputs, ProcessPriority};
pub use process_host::{CleanupOutcome, HostUpdate, PriorityClientId, ProcessHost};
pub use registry::{HostNotice, HostRegistry};
pub use services::HostServices;
pub use state::{
    HostState, RESULT_CODE_HUNG, RESULT_CODE_KILLED, RESULT_CODE_KILLED_BAD_MESSAGE, RESULT_CODE_NORMAL_EXIT,
    ReadinessTracker, TerminationInfo, TerminationStatus,
};

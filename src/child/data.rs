//! Child snapshots, observers and delegates.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelMessage;
use crate::host::{ProcessType, TerminationInfo};

pub const DEFAULT_METRICS_NAME: &str = "utility";

/// Immutable view of a child handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildProcessData {
    pub id: i32,
    pub process_type: ProcessType,
    pub name: String,
    pub metrics_name: String,
    pub pid: Option<u32>,
}

impl ChildProcessData {
    pub fn new(id: i32, process_type: ProcessType, name: &str) -> Self {
        Self {
            id,
            process_type,
            name: name.to_string(),
            metrics_name: DEFAULT_METRICS_NAME.to_string(),
            pid: None,
        }
    }
}

/// Process-wide notifications about child hosts.
pub trait ChildProcessObserver: Send + Sync {
    fn host_created(&self, _data: &ChildProcessData) {}

    fn host_connected(&self, _data: &ChildProcessData) {}

    fn host_launched_and_connected(&self, _data: &ChildProcessData) {}

    /// The child went away without crashing or being killed.
    fn host_disconnected(&self, _data: &ChildProcessData) {}

    fn host_crashed(&self, _data: &ChildProcessData, _info: &TerminationInfo) {}

    fn host_killed(&self, _data: &ChildProcessData, _info: &TerminationInfo) {}
}

/// Per-child callbacks for whoever asked for the child.
pub trait ChildProcessHostDelegate: Send + Sync {
    fn on_process_launched(&self, _data: &ChildProcessData) {}

    fn on_process_launch_failed(&self, _data: &ChildProcessData, _error_code: i32) {}

    fn on_process_crashed(&self, _data: &ChildProcessData, _exit_code: i32) {}

    fn on_channel_connected(&self, _data: &ChildProcessData) {}

    /// Return true if the message was handled.
    fn on_message_received(&self, _data: &ChildProcessData, _message: &ChannelMessage) -> bool {
        false
    }

    fn on_bad_message_received(&self, _data: &ChildProcessData, _reason: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl ChildProcessHostDelegate for NoopDelegate {}

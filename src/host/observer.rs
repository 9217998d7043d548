//! Host observers and route listeners.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::context::ContextId;
use super::state::{HostState, TerminationInfo};
use crate::channel::ChannelMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Worker,
    Utility,
}

impl ProcessType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessType::Worker => "worker",
            ProcessType::Utility => "utility",
        }
    }
}

/// What observers see of a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    pub id: i32,
    pub context: ContextId,
    pub state: HostState,
    pub pid: Option<u32>,
    pub is_spare: bool,
}

/// Follow-up work observers may ask for while a host is exiting.
///
/// Requests are collected during the notification pass and acted on after
/// it, so no observer ever sees the host change underneath it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostRequests {
    cleanup: bool,
    reinit: bool,
}

impl HostRequests {
    pub fn request_cleanup(&mut self) {
        self.cleanup = true;
    }

    /// Relaunch the host once notification finishes.
    pub fn request_reinit(&mut self) {
        self.reinit = true;
    }

    pub fn cleanup_requested(&self) -> bool {
        self.cleanup
    }

    pub fn reinit_requested(&self) -> bool {
        self.reinit
    }
}

pub trait ProcessHostObserver: Send + Sync {
    fn host_launched(&self, _host: &HostSnapshot) {}

    fn host_ready(&self, _host: &HostSnapshot) {}

    fn host_exited(&self, _host: &HostSnapshot, _info: &TerminationInfo, _requests: &mut HostRequests) {}

    /// Last call for this host; it is about to be unregistered.
    fn host_destroyed(&self, _host: &HostSnapshot) {}
}

/// Handles messages for one routing id.
pub trait Listener: Send + Sync {
    /// Returns false if the message was not handled.
    fn on_message_received(&self, message: &ChannelMessage) -> bool;

    fn on_channel_error(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Ordered observer registrations. Notify from a [`snapshot`](Self::snapshot)
/// so observers can be added or removed mid-notification.
pub struct ObserverList<T: ?Sized> {
    next: u64,
    entries: Vec<(ObserverId, Arc<T>)>,
}

impl<T: ?Sized> ObserverList<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: Arc<T>) -> ObserverId {
        let id = ObserverId(self.next);
        self.next += 1;
        self.entries.push((id, observer));
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|(_, o)| o.clone()).collect()
    }
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

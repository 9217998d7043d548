//! Events flowing from the IO side back to hosts on the UI thread.
//!
//! Launch results, channel connections and incoming messages are produced
//! off the UI thread. Each is tagged with the [`HostHandle`] of the launch
//! attempt it belongs to and posted through a [`HostEventSink`]. A handle
//! whose host is gone, or that names an earlier launch, is ignored.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use super::keep_alive::KeepAliveClientType;
use super::state::TerminationInfo;
use crate::channel::{ChannelMessage, Transport};

/// Names one launch attempt of one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle {
    pub id: i32,
    pub launch: u64,
}

impl HostHandle {
    pub fn new(id: i32, launch: u64) -> Self {
        Self { id, launch }
    }
}

impl fmt::Display for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.launch)
    }
}

#[derive(Debug)]
pub enum HostEvent {
    ProcessLaunched {
        host: HostHandle,
        pid: u32,
    },
    ProcessLaunchFailed {
        host: HostHandle,
        error_code: i32,
    },
    ProcessExited {
        host: HostHandle,
        info: TerminationInfo,
    },
    ChannelConnected {
        host: HostHandle,
        peer_pid: u32,
        transport: Box<dyn Transport>,
    },
    ChannelError {
        host: HostHandle,
    },
    MessageReceived {
        host: HostHandle,
        message: ChannelMessage,
    },
    BadMessage {
        host: HostHandle,
        reason: String,
    },
    /// A timed keep-alive count ran out.
    KeepAliveExpired {
        host: HostHandle,
        client: KeepAliveClientType,
    },
    /// Destroy hosts that were scheduled for deletion.
    DeferredDeletion,
}

impl HostEvent {
    pub fn host(&self) -> Option<HostHandle> {
        match self {
            HostEvent::ProcessLaunched { host, .. }
            | HostEvent::ProcessLaunchFailed { host, .. }
            | HostEvent::ProcessExited { host, .. }
            | HostEvent::ChannelConnected { host, .. }
            | HostEvent::ChannelError { host }
            | HostEvent::MessageReceived { host, .. }
            | HostEvent::BadMessage { host, .. }
            | HostEvent::KeepAliveExpired { host, .. } => Some(*host),
            HostEvent::DeferredDeletion => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::ProcessLaunched { .. } => "process_launched",
            HostEvent::ProcessLaunchFailed { .. } => "process_launch_failed",
            HostEvent::ProcessExited { .. } => "process_exited",
            HostEvent::ChannelConnected { .. } => "channel_connected",
            HostEvent::ChannelError { .. } => "channel_error",
            HostEvent::MessageReceived { .. } => "message_received",
            HostEvent::BadMessage { .. } => "bad_message",
            HostEvent::KeepAliveExpired { .. } => "keep_alive_expired",
            HostEvent::DeferredDeletion => "deferred_deletion",
        }
    }
}

/// Delivers events to the orchestrator's sequence.
///
/// Implementations never run the event inline: delivery is always a later
/// task, even when posted from the UI thread itself.
pub trait HostEventSink: Send + Sync {
    fn post(&self, event: HostEvent);

    fn post_delayed(&self, event: HostEvent, delay: Duration);
}

/// Sink that just collects events for a caller to pump by hand.
#[derive(Default)]
pub struct QueuedEventSink {
    ready: Mutex<VecDeque<HostEvent>>,
    delayed: Mutex<Vec<(Duration, HostEvent)>>,
}

impl QueuedEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next immediate event.
    pub fn pop(&self) -> Option<HostEvent> {
        self.ready.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    pub fn drain(&self) -> Vec<HostEvent> {
        self.ready.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect()
    }

    /// Move every delayed event to the ready queue, as if its time had come.
    pub fn expire_delayed(&self) -> usize {
        let delayed: Vec<(Duration, HostEvent)> =
            self.delayed.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
        let count = delayed.len();
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        ready.extend(delayed.into_iter().map(|(_, event)| event));
        count
    }

    pub fn len(&self) -> usize {
        self.ready.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl HostEventSink for QueuedEventSink {
    fn post(&self, event: HostEvent) {
        self.ready.lock().unwrap_or_else(|e| e.into_inner()).push_back(event);
    }

    fn post_delayed(&self, event: HostEvent, delay: Duration) {
        if delay.is_zero() {
            self.post(event);
            return;
        }
        self.delayed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((delay, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_host_handle() {
        let handle = HostHandle::new(3, 1);
        let event = HostEvent::ChannelError { host: handle };
        assert_eq!(event.host(), Some(handle));
        assert_eq!(event.name(), "channel_error");
        assert_eq!(HostEvent::DeferredDeletion.host(), None);
        assert_eq!(handle.to_string(), "3#1");
    }

    #[test]
    fn test_queued_sink_orders_events() {
        let sink = QueuedEventSink::new();
        sink.post(HostEvent::ProcessLaunched {
            host: HostHandle::new(1, 1),
            pid: 10,
        });
        sink.post(HostEvent::DeferredDeletion);
        assert_eq!(sink.len(), 2);
        assert!(matches!(sink.pop(), Some(HostEvent::ProcessLaunched { pid: 10, .. })));
        assert!(matches!(sink.pop(), Some(HostEvent::DeferredDeletion)));
        assert!(sink.pop().is_none());
    }

    #[test]
    fn test_delayed_events_wait_for_expiry() {
        let sink = QueuedEventSink::new();
        sink.post_delayed(
            HostEvent::KeepAliveExpired {
                host: HostHandle::new(1, 1),
                client: KeepAliveClientType::Unload,
            },
            Duration::from_secs(1),
        );
        assert!(sink.is_empty());
        assert_eq!(sink.delayed_len(), 1);
        assert_eq!(sink.expire_delayed(), 1);
        assert_eq!(sink.len(), 1);
    }
}

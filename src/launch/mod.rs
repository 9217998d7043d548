//! Starting worker processes.
//!
//! A [`ProcessLauncher`] turns a [`LaunchRequest`] into a running process
//! and hands back a [`ChildProcess`] handle. Results arrive later, through
//! the request's [`ProcessReporter`], as events for the host that asked.

pub mod command;
pub mod command_line;

use std::fmt;
use std::sync::Arc;

pub use command::CommandLauncher;
pub use command_line::{CommandLine, switches};

use crate::channel::{BootstrapToken, ChannelMessage};
use crate::host::{HostEvent, HostEventSink, HostHandle, ProcessPriority, ProcessType, TerminationInfo};

/// Control over a launched (or launching) process.
pub trait ChildProcess: Send {
    /// How the process ended, or `StillRunning`.
    fn termination_info(&mut self, known_dead: bool) -> TerminationInfo;

    fn terminate(&mut self, exit_code: i32) -> bool;

    fn set_priority(&mut self, priority: &ProcessPriority);
}

pub trait ProcessLauncher: Send + Sync {
    /// Begin starting a process. Must not block; report through
    /// `request.reporter`.
    fn launch(&self, request: LaunchRequest) -> Box<dyn ChildProcess>;
}

pub struct LaunchRequest {
    pub process_type: ProcessType,
    pub command_line: CommandLine,
    pub token: BootstrapToken,
    pub reporter: ProcessReporter,
}

impl LaunchRequest {
    pub fn host(&self) -> HostHandle {
        self.reporter.handle()
    }
}

impl fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("host", &self.host())
            .field("process_type", &self.process_type)
            .field("command_line", &self.command_line)
            .finish()
    }
}

/// Posts process and channel events for one launch attempt.
#[derive(Clone)]
pub struct ProcessReporter {
    handle: HostHandle,
    sink: Arc<dyn HostEventSink>,
}

impl ProcessReporter {
    pub fn new(handle: HostHandle, sink: Arc<dyn HostEventSink>) -> Self {
        Self { handle, sink }
    }

    pub fn handle(&self) -> HostHandle {
        self.handle
    }

    pub fn launched(&self, pid: u32) {
        self.sink.post(HostEvent::ProcessLaunched { host: self.handle, pid });
    }

    pub fn launch_failed(&self, error_code: i32) {
        self.sink.post(HostEvent::ProcessLaunchFailed {
            host: self.handle,
            error_code,
        });
    }

    pub fn exited(&self, info: TerminationInfo) {
        self.sink.post(HostEvent::ProcessExited { host: self.handle, info });
    }

    pub fn message_received(&self, message: ChannelMessage) {
        self.sink.post(HostEvent::MessageReceived {
            host: self.handle,
            message,
        });
    }

    pub fn bad_message(&self, reason: &str) {
        self.sink.post(HostEvent::BadMessage {
            host: self.handle,
            reason: reason.to_string(),
        });
    }

    pub fn channel_error(&self) {
        self.sink.post(HostEvent::ChannelError { host: self.handle });
    }
}

impl fmt::Debug for ProcessReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessReporter").field("handle", &self.handle).finish()
    }
}

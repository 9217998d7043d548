//! Hosts for utility children bound to a named service.
//!
//! A child follows the worker launch and ready rules but has no context,
//! priority clients or keep-alive. It is launched once; when it goes away
//! the registry drops it.

use std::sync::Arc;

use log::{debug, error, info, warn};

use super::data::{ChildProcessData, ChildProcessHostDelegate, ChildProcessObserver};
use crate::channel::{Channel, ChannelMessage, ControlMessage, Transport};
use crate::error::{HostError, Result};
use crate::host::{
    HostEvent, HostHandle, HostServices, ProcessType, RESULT_CODE_KILLED_BAD_MESSAGE, RESULT_CODE_NORMAL_EXIT,
    ReadinessTracker, TerminationInfo, TerminationStatus,
};
use crate::launch::{ChildProcess, CommandLine, LaunchRequest, switches};
use crate::service::ServiceIdentity;

/// Children launch once, so every handle names launch 1.
const CHILD_LAUNCH: u64 = 1;

pub struct GenericChildProcessHost {
    data: ChildProcessData,
    identity: ServiceIdentity,
    services: Arc<HostServices>,
    delegate: Arc<dyn ChildProcessHostDelegate>,
    channel: Option<Channel>,
    child: Option<Box<dyn ChildProcess>>,
    readiness: ReadinessTracker,
    launch_started: bool,
    launch_failed: bool,
    killed_for_bad_message: bool,
    bound_services: Vec<String>,
}

impl GenericChildProcessHost {
    pub fn new(
        id: i32,
        service_name: &str,
        display_name: &str,
        services: Arc<HostServices>,
        delegate: Arc<dyn ChildProcessHostDelegate>,
    ) -> Self {
        let identity = ServiceIdentity::new(service_name, &id.to_string());
        let handle = HostHandle::new(id, CHILD_LAUNCH);
        let sink = services.sink.clone();
        let token = services.broker.invite(
            identity.clone(),
            Box::new(move |transport, peer_pid| {
                sink.post(HostEvent::ChannelConnected {
                    host: handle,
                    peer_pid,
                    transport,
                });
            }),
        );
        Self {
            data: ChildProcessData::new(id, ProcessType::Utility, display_name),
            identity: identity.clone(),
            services,
            delegate,
            channel: Some(Channel::new(token, identity)),
            child: None,
            readiness: ReadinessTracker::default(),
            launch_started: false,
            launch_failed: false,
            killed_for_bad_message: false,
            bound_services: Vec::new(),
        }
    }

    pub fn id(&self) -> i32 {
        self.data.id
    }

    pub fn data(&self) -> &ChildProcessData {
        &self.data
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle::new(self.data.id, CHILD_LAUNCH)
    }

    pub fn set_metrics_name(&mut self, metrics_name: &str) {
        self.data.metrics_name = metrics_name.to_string();
    }

    pub fn is_launched_and_connected(&self) -> bool {
        self.readiness.is_ready()
    }

    pub fn bound_services(&self) -> &[String] {
        &self.bound_services
    }

    /// Start the process. A child can be launched only once.
    pub fn launch(&mut self) -> Result<()> {
        if self.launch_started {
            return Err(HostError::InvalidState(format!("child {} already launched", self.data.id)));
        }
        let Some(channel) = self.channel.as_ref() else {
            return Err(HostError::InvalidState(format!("child {} has no channel", self.data.id)));
        };
        let config = &self.services.config;
        let mut command_line = CommandLine::new(config.utility_program().clone());
        command_line.append_switch_value(switches::PROCESS_TYPE, ProcessType::Utility.as_str());
        command_line.copy_switches_from(&config.base_command_line, &config.propagate_switches);
        command_line.append_switch_value(switches::SERVICE_REQUEST_CHANNEL_TOKEN, channel.bootstrap_token().as_str());
        command_line.append_switch_value(switches::SERVICE_NAME, &self.identity.name);
        for arg in &config.extra_args {
            command_line.append_arg(arg);
        }

        let request = LaunchRequest {
            process_type: ProcessType::Utility,
            command_line,
            token: channel.bootstrap_token().clone(),
            reporter: self.services.reporter(self.handle()),
        };
        info!("Launching child {} for {}", self.data.id, self.identity);
        self.launch_started = true;
        self.child = Some(self.services.launcher.launch(request));
        Ok(())
    }

    /// Ask the child to serve `service_name`. Queued until connected.
    pub fn bind_service(&mut self, service_name: &str) -> bool {
        let sent = ControlMessage::BindService {
            service_name: service_name.to_string(),
        }
        .to_message()
        .map(|message| self.send(&message))
        .unwrap_or(false);
        if sent {
            self.bound_services.push(service_name.to_string());
        }
        sent
    }

    pub fn send(&mut self, message: &ChannelMessage) -> bool {
        match self.channel.as_mut().map(|channel| channel.send(message)) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("Child {} failed to send '{}': {}", self.data.id, message.name, e);
                false
            }
            None => false,
        }
    }

    pub fn terminate(&mut self, exit_code: i32) -> bool {
        match self.child.as_mut() {
            Some(child) => child.terminate(exit_code),
            None => false,
        }
    }

    /// Apply an event. Returns true once the child is gone and should be
    /// removed.
    pub(crate) fn handle_event(&mut self, event: HostEvent, observers: &[Arc<dyn ChildProcessObserver>]) -> bool {
        match event {
            HostEvent::ProcessLaunched { pid, .. } => {
                if self.readiness.is_launched() {
                    return false;
                }
                let ready = self.readiness.on_launched(pid);
                self.data.pid = Some(pid);
                debug!("Child {} launched as pid {}", self.data.id, pid);
                self.delegate.on_process_launched(&self.data);
                if let Some(channel) = self.channel.as_mut() {
                    if let Err(e) = channel.open() {
                        warn!("Child {} failed to flush channel: {}", self.data.id, e);
                    }
                }
                if ready {
                    self.notify_launched_and_connected(observers);
                }
                false
            }
            HostEvent::ChannelConnected {
                transport, peer_pid, ..
            } => self.on_channel_connected(transport, peer_pid, observers),
            HostEvent::ProcessLaunchFailed { error_code, .. } => {
                warn!("Child {} failed to launch: error {}", self.data.id, error_code);
                self.launch_failed = true;
                self.delegate.on_process_launch_failed(&self.data, error_code);
                self.on_child_disconnected(Some(TerminationInfo::launch_failed(error_code)), observers);
                true
            }
            HostEvent::ProcessExited { info, .. } => {
                self.on_child_disconnected(Some(info), observers);
                true
            }
            HostEvent::ChannelError { .. } => {
                self.on_child_disconnected(None, observers);
                true
            }
            HostEvent::MessageReceived { message, .. } => {
                if !self.delegate.on_message_received(&self.data, &message) {
                    debug!("Child {} ignored '{}'", self.data.id, message.name);
                }
                false
            }
            HostEvent::BadMessage { reason, .. } => {
                self.shutdown_for_bad_message(&reason);
                false
            }
            HostEvent::KeepAliveExpired { .. } | HostEvent::DeferredDeletion => false,
        }
    }

    /// Returns true if joining lost the channel and the child is gone.
    fn on_channel_connected(
        &mut self,
        mut transport: Box<dyn Transport>,
        peer_pid: u32,
        observers: &[Arc<dyn ChildProcessObserver>],
    ) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            transport.close();
            return false;
        };
        if let Err(e) = channel.join(transport, peer_pid) {
            if channel.is_closed() {
                warn!("Child {} lost its channel while connecting: {}", self.data.id, e);
                self.on_child_disconnected(None, observers);
                return true;
            }
            warn!("Child {} rejected connection: {}", self.data.id, e);
            return false;
        }
        for observer in observers {
            observer.host_connected(&self.data);
        }
        self.delegate.on_channel_connected(&self.data);
        if self.readiness.on_connected() {
            self.notify_launched_and_connected(observers);
        }
        false
    }

    fn notify_launched_and_connected(&self, observers: &[Arc<dyn ChildProcessObserver>]) {
        info!("Child {} ({}) launched and connected", self.data.id, self.identity);
        for observer in observers {
            observer.host_launched_and_connected(&self.data);
        }
    }

    /// Classify the exit and send exactly one of crashed, killed or
    /// disconnected.
    fn on_child_disconnected(&mut self, known: Option<TerminationInfo>, observers: &[Arc<dyn ChildProcessObserver>]) {
        let mut info = match (known, self.child.as_mut()) {
            (Some(info), _) => info,
            (None, Some(child)) => child.termination_info(true),
            (None, None) => TerminationInfo::normal(),
        }
        .classify(true);
        if self.killed_for_bad_message && info.status != TerminationStatus::LaunchFailed {
            info = TerminationInfo::new(TerminationStatus::KilledBadMessage, RESULT_CODE_KILLED_BAD_MESSAGE);
        }

        if info.status.is_crash() {
            warn!("Child {} crashed: {:?} ({})", self.data.id, info.status, info.exit_code);
            if !self.launch_failed {
                self.delegate.on_process_crashed(&self.data, info.exit_code);
            }
            for observer in observers {
                observer.host_crashed(&self.data, &info);
            }
        } else if info.status.is_killed() {
            warn!("Child {} killed: {:?} ({})", self.data.id, info.status, info.exit_code);
            for observer in observers {
                observer.host_killed(&self.data, &info);
            }
        } else if self.readiness.is_ready() {
            info!("Child {} disconnected", self.data.id);
            for observer in observers {
                observer.host_disconnected(&self.data);
            }
        }
        self.shutdown();
    }

    fn shutdown_for_bad_message(&mut self, reason: &str) {
        self.delegate.on_bad_message_received(&self.data, reason);
        if self.services.config.disable_kill_after_bad_message {
            warn!("Child {} sent a bad message (kill disabled): {}", self.data.id, reason);
            return;
        }
        error!("Terminating child {} for bad message: {}", self.data.id, reason);
        self.killed_for_bad_message = true;
        self.terminate(RESULT_CODE_KILLED_BAD_MESSAGE);
    }

    /// Close the channel and let go of the process.
    pub(crate) fn shutdown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            self.services.broker.revoke(channel.bootstrap_token());
            channel.close();
        }
        if let Some(mut child) = self.child.take() {
            child.terminate(RESULT_CODE_NORMAL_EXIT);
        }
        self.readiness.reset();
    }
}

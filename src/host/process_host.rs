//! One worker slot and the process currently filling it.
//!
//! A [`ProcessHost`] lives on the UI thread. It owns the channel and the
//! launcher's process handle, aggregates priority from its clients, counts
//! keep-alive references, routes inbound messages to listeners and runs the
//! death path. The same host can be relaunched after its process dies.
//!
//! Hosts never delete themselves. Operations that may end a host's life
//! return a [`HostUpdate`]; the registry acts on it once the host has
//! returned, which keeps teardown out of the host's own call stack.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::context::ContextId;
use super::diagnostics::BadMessageReport;
use super::events::{HostEvent, HostHandle};
use super::keep_alive::{KeepAliveClientType, KeepAliveCounts};
use super::observer::{HostRequests, HostSnapshot, Listener, ObserverId, ObserverList, ProcessHostObserver, ProcessType};
use super::priority::{PriorityClient, PriorityInputs, ProcessPriority};
use super::services::HostServices;
use super::state::{
    HostState, RESULT_CODE_KILLED_BAD_MESSAGE, RESULT_CODE_NORMAL_EXIT, ReadinessTracker, TerminationInfo,
    TerminationStatus,
};
use crate::channel::{BootstrapToken, Channel, ChannelMessage, ControlMessage, Transport};
use crate::error::{HostError, Result};
use crate::launch::{ChildProcess, CommandLine, LaunchRequest, switches};
use crate::service::ServiceIdentity;
use crate::threading::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriorityClientId(u64);

/// Result of asking a host to clean up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupOutcome {
    /// Something still holds the host open.
    #[default]
    Retained,
    /// Asked during death notification; runs when notification finishes.
    Deferred,
    /// The host must be unregistered and dropped on a later task.
    DeleteSoon,
    AlreadyDeleting,
}

/// What the registry has to do after a host call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostUpdate {
    pub exited: Option<TerminationInfo>,
    pub cleanup: CleanupOutcome,
}

impl HostUpdate {
    pub fn cleanup(outcome: CleanupOutcome) -> Self {
        Self {
            exited: None,
            cleanup: outcome,
        }
    }

    pub fn is_delete_soon(&self) -> bool {
        self.cleanup == CleanupOutcome::DeleteSoon
    }
}

pub struct ProcessHost {
    id: i32,
    context: ContextId,
    services: Arc<HostServices>,
    state: HostState,
    launch: u64,

    channel: Option<Channel>,
    child: Option<Box<dyn ChildProcess>>,
    readiness: ReadinessTracker,
    init_time: Option<Instant>,
    ready_tasks: Vec<Task>,

    priority_clients: BTreeMap<PriorityClientId, Arc<dyn PriorityClient>>,
    next_priority_client: u64,
    inputs: PriorityInputs,
    priority: ProcessPriority,

    keep_alive: KeepAliveCounts,
    listeners: BTreeMap<i32, Arc<dyn Listener>>,
    observers: ObserverList<dyn ProcessHostObserver>,

    is_spare: bool,
    is_unused: bool,
    never_reusable: bool,
    deleting_soon: bool,
    within_process_died_observer: bool,
    delayed_cleanup_needed: bool,
    fast_shutdown_started: bool,
    sudden_termination_allowed: bool,
    killed_for_bad_message: bool,
    last_bad_message: Option<BadMessageReport>,
    last_termination: Option<TerminationInfo>,
}

impl fmt::Debug for ProcessHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHost")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("state", &self.state)
            .field("launch", &self.launch)
            .field("listeners", &self.listeners.len())
            .field("keep_alive", &self.keep_alive.total())
            .field("is_spare", &self.is_spare)
            .field("deleting_soon", &self.deleting_soon)
            .finish()
    }
}

impl ProcessHost {
    /// A host with a paused channel and no process yet.
    pub fn new(id: i32, context: ContextId, services: Arc<HostServices>) -> Self {
        let mut host = Self {
            id,
            context,
            services,
            state: HostState::Uninitialized,
            launch: 0,
            channel: None,
            child: None,
            readiness: ReadinessTracker::default(),
            init_time: None,
            ready_tasks: Vec::new(),
            priority_clients: BTreeMap::new(),
            next_priority_client: 0,
            inputs: PriorityInputs::default(),
            priority: ProcessPriority::default(),
            keep_alive: KeepAliveCounts::default(),
            listeners: BTreeMap::new(),
            observers: ObserverList::new(),
            is_spare: false,
            is_unused: true,
            never_reusable: false,
            deleting_soon: false,
            within_process_died_observer: false,
            delayed_cleanup_needed: false,
            fast_shutdown_started: false,
            sudden_termination_allowed: true,
            killed_for_bad_message: false,
            last_bad_message: None,
            last_termination: None,
        };
        host.channel = Some(host.create_channel());
        host
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn context(&self) -> &ContextId {
        &self.context
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// Handle for the current launch attempt.
    pub fn handle(&self) -> HostHandle {
        HostHandle::new(self.id, self.launch)
    }

    pub fn is_ready(&self) -> bool {
        self.state == HostState::Ready
    }

    pub fn is_initialized_and_not_dead(&self) -> bool {
        self.state.is_initialized_and_not_dead()
    }

    pub fn pid(&self) -> Option<u32> {
        self.readiness.pid()
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    pub fn init_time(&self) -> Option<Instant> {
        self.init_time
    }

    /// Time since the last `init`.
    pub fn uptime(&self) -> Option<Duration> {
        self.init_time.map(|t| t.elapsed())
    }

    pub fn snapshot(&self) -> HostSnapshot {
        HostSnapshot {
            id: self.id,
            context: self.context.clone(),
            state: self.state,
            pid: self.readiness.pid(),
            is_spare: self.is_spare,
        }
    }

    pub fn is_spare(&self) -> bool {
        self.is_spare
    }

    pub(crate) fn set_is_spare(&mut self, is_spare: bool) {
        self.is_spare = is_spare;
    }

    pub fn is_unused(&self) -> bool {
        self.is_unused
    }

    pub fn set_is_used(&mut self) {
        self.is_unused = false;
    }

    pub fn is_never_reusable(&self) -> bool {
        self.never_reusable
    }

    pub fn set_never_reusable(&mut self) {
        self.never_reusable = true;
    }

    pub fn is_deleting_soon(&self) -> bool {
        self.deleting_soon
    }

    pub fn fast_shutdown_started(&self) -> bool {
        self.fast_shutdown_started
    }

    pub fn sudden_termination_allowed(&self) -> bool {
        self.sudden_termination_allowed
    }

    pub fn last_bad_message(&self) -> Option<&BadMessageReport> {
        self.last_bad_message.as_ref()
    }

    pub fn last_termination(&self) -> Option<TerminationInfo> {
        self.last_termination
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn keep_alive_count(&self, client: KeepAliveClientType) -> u32 {
        self.keep_alive.count(client)
    }

    pub fn keep_alive_total(&self) -> u32 {
        self.keep_alive.total()
    }

    pub fn is_keep_alive_ref_count_disabled(&self) -> bool {
        self.keep_alive.is_disabled()
    }

    pub fn priority(&self) -> ProcessPriority {
        self.priority
    }

    pub fn priority_inputs(&self) -> PriorityInputs {
        self.inputs
    }

    /// Unused, with nothing routed to it and nothing keeping it alive.
    pub fn host_has_not_been_used(&self) -> bool {
        self.is_unused && self.listeners.is_empty() && self.keep_alive.total() == 0
    }

    /// Whether new work may be routed here.
    pub fn may_reuse_host(&self) -> bool {
        !self.never_reusable
            && !self.deleting_soon
            && !self.keep_alive.is_disabled()
            && self.services.policy.may_reuse_host(&self.snapshot())
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ProcessHostObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Launch (or relaunch) the worker process.
    ///
    /// A no-op while a process is launching or running.
    pub fn init(&mut self) -> Result<()> {
        if self.deleting_soon {
            return Err(HostError::InvalidState(format!("host {} is being deleted", self.id)));
        }
        if self.state.is_initialized_and_not_dead() {
            return Ok(());
        }
        let services = self.services.clone();
        if !services.config.single_process && services.config.worker_program.as_os_str().is_empty() {
            return Err(HostError::LaunchFailed("no worker program configured".to_string()));
        }

        let mut channel = match self.channel.take() {
            Some(channel) => channel,
            None => self.create_channel(),
        };
        self.readiness.reset();
        self.fast_shutdown_started = false;
        self.killed_for_bad_message = false;
        self.sudden_termination_allowed = true;
        self.state = HostState::Launching;
        self.init_time = Some(Instant::now());

        // Anything queued before init goes out ahead of the launch.
        if let Err(e) = channel.open() {
            warn!("Host {} failed to flush pre-launch messages: {}", self.id, e);
        }
        let snapshot = self.snapshot();
        for message in services.policy.will_launch(&snapshot) {
            if let Err(e) = channel.send(&message) {
                warn!("Host {} dropped pre-launch message '{}': {}", self.id, message.name, e);
            }
        }

        let handle = self.handle();
        if services.config.single_process {
            debug!("Host {} runs in-process", self.id);
            services.sink.post(HostEvent::ProcessLaunched {
                host: handle,
                pid: std::process::id(),
            });
        } else {
            let request = LaunchRequest {
                process_type: ProcessType::Worker,
                command_line: self.build_command_line(channel.bootstrap_token()),
                token: channel.bootstrap_token().clone(),
                reporter: services.reporter(handle),
            };
            self.child = Some(services.launcher.launch(request));
        }

        channel.pause();
        info!("Host {} launching as {}", self.id, channel.identity());
        self.channel = Some(channel);
        Ok(())
    }

    /// Apply an IO-side event addressed to this host.
    ///
    /// Events from an earlier launch attempt are dropped, except timed
    /// keep-alive expiry which belongs to the host rather than the launch.
    pub fn handle_event(&mut self, event: HostEvent) -> HostUpdate {
        if let Some(handle) = event.host() {
            let stale = handle.id != self.id
                || (handle.launch != self.launch && !matches!(event, HostEvent::KeepAliveExpired { .. }));
            if stale {
                debug!("Host {} dropping stale {} for {}", self.id, event.name(), handle);
                if let HostEvent::ChannelConnected { mut transport, .. } = event {
                    transport.close();
                }
                return HostUpdate::default();
            }
        }

        match event {
            HostEvent::ProcessLaunched { pid, .. } => {
                self.on_process_launched(pid);
                HostUpdate::default()
            }
            HostEvent::ProcessLaunchFailed { error_code, .. } => {
                warn!("Host {} failed to launch: error {}", self.id, error_code);
                self.process_died(true, Some(TerminationInfo::launch_failed(error_code)))
            }
            HostEvent::ProcessExited { info, .. } => self.process_died(true, Some(info)),
            HostEvent::ChannelConnected {
                transport, peer_pid, ..
            } => self.on_channel_connected(transport, peer_pid),
            HostEvent::ChannelError { .. } => self.process_died(true, None),
            HostEvent::MessageReceived { message, .. } => {
                self.on_message_received(&message);
                HostUpdate::default()
            }
            HostEvent::BadMessage { reason, .. } => {
                self.shutdown_for_bad_message(&reason);
                HostUpdate::default()
            }
            HostEvent::KeepAliveExpired { client, .. } => {
                if self.keep_alive.is_disabled() || self.deleting_soon {
                    return HostUpdate::default();
                }
                HostUpdate::cleanup(self.decrement_keep_alive_ref_count(client))
            }
            HostEvent::DeferredDeletion => HostUpdate::default(),
        }
    }

    fn on_process_launched(&mut self, pid: u32) {
        if self.deleting_soon || self.state != HostState::Launching || self.readiness.is_launched() {
            debug!("Host {} ignoring launch report in state {:?}", self.id, self.state);
            return;
        }
        let became_ready = self.readiness.on_launched(pid);
        info!("Host {} launched as pid {}", self.id, pid);

        let snapshot = self.snapshot();
        for observer in self.observers.snapshot() {
            observer.host_launched(&snapshot);
        }

        let preamble = self.services.policy.launch_preamble(&snapshot);
        if let Some(channel) = self.channel.as_mut() {
            if let Err(e) = channel.open_with_preamble(preamble) {
                warn!("Host {} failed to flush channel on launch: {}", self.id, e);
            }
        }
        self.update_process_priority();

        if became_ready {
            self.notify_ready();
        }
    }

    /// A join that loses the channel is a channel error.
    fn on_channel_connected(&mut self, mut transport: Box<dyn Transport>, peer_pid: u32) -> HostUpdate {
        if self.deleting_soon || !self.state.is_initialized_and_not_dead() {
            transport.close();
            return HostUpdate::default();
        }
        let Some(channel) = self.channel.as_mut() else {
            transport.close();
            return HostUpdate::default();
        };
        if let Err(e) = channel.join(transport, peer_pid) {
            if channel.is_closed() {
                warn!("Host {} lost its channel while connecting: {}", self.id, e);
                return self.process_died(true, None);
            }
            warn!("Host {} rejected channel connection: {}", self.id, e);
            return HostUpdate::default();
        }
        debug!("Host {} channel connected to pid {}", self.id, peer_pid);
        if self.readiness.on_connected() {
            self.notify_ready();
        }
        HostUpdate::default()
    }

    fn notify_ready(&mut self) {
        self.state = HostState::Ready;
        info!("Host {} ready", self.id);
        let snapshot = self.snapshot();
        for observer in self.observers.snapshot() {
            observer.host_ready(&snapshot);
        }
        for task in std::mem::take(&mut self.ready_tasks) {
            task();
        }
    }

    /// Run `task` now if ready, else on the next ready notification.
    ///
    /// Returns false if the host is going away; the task is dropped.
    pub fn post_task_when_ready(&mut self, task: Task) -> bool {
        if self.deleting_soon {
            return false;
        }
        if self.is_ready() {
            task();
        } else {
            self.ready_tasks.push(task);
        }
        true
    }

    /// The death path. Runs at most once per launch.
    fn process_died(&mut self, already_dead: bool, known_info: Option<TerminationInfo>) -> HostUpdate {
        if self.deleting_soon || !self.state.is_initialized_and_not_dead() {
            debug!("Host {} ignoring death report in state {:?}", self.id, self.state);
            return HostUpdate::default();
        }
        debug_assert!(!self.within_process_died_observer, "nested death of host {}", self.id);

        let mut child = self.child.take();
        if !already_dead {
            if let Some(child) = child.as_mut() {
                child.terminate(RESULT_CODE_NORMAL_EXIT);
            }
        }
        let mut info = match (known_info, child.as_mut()) {
            (Some(info), _) => info,
            (None, Some(child)) => child.termination_info(true),
            (None, None) => TerminationInfo::normal(),
        }
        .classify(true);
        if self.killed_for_bad_message && info.status != TerminationStatus::LaunchFailed {
            info = TerminationInfo::new(TerminationStatus::KilledBadMessage, RESULT_CODE_KILLED_BAD_MESSAGE);
        }
        drop(child);

        self.state = HostState::Dead;
        self.readiness.reset();
        self.reset_channel();
        self.ready_tasks.clear();
        self.last_termination = Some(info);
        self.update_process_priority();

        match info.status {
            TerminationStatus::NormalTermination | TerminationStatus::StillRunning => {
                info!("Host {} exited: {:?} ({})", self.id, info.status, info.exit_code)
            }
            _ => warn!("Host {} died: {:?} ({})", self.id, info.status, info.exit_code),
        }

        let snapshot = self.snapshot();
        let mut requests = HostRequests::default();
        self.within_process_died_observer = true;
        for observer in self.observers.snapshot() {
            observer.host_exited(&snapshot, &info, &mut requests);
        }
        let listeners: Vec<Arc<dyn Listener>> = self.listeners.values().cloned().collect();
        for listener in listeners {
            listener.on_channel_error();
        }
        self.within_process_died_observer = false;

        if requests.cleanup_requested() {
            self.delayed_cleanup_needed = true;
        }
        let mut update = HostUpdate {
            exited: Some(info),
            cleanup: CleanupOutcome::Retained,
        };
        if self.delayed_cleanup_needed {
            update.cleanup = self.cleanup();
        }
        if requests.reinit_requested() && !update.is_delete_soon() {
            if let Err(e) = self.init() {
                warn!("Host {} could not relaunch: {}", self.id, e);
            }
        }
        update
    }

    /// Tear the host down if nothing holds it open.
    ///
    /// On [`CleanupOutcome::DeleteSoon`] observers have been told the host is
    /// gone and the caller must unregister it.
    pub fn cleanup(&mut self) -> CleanupOutcome {
        if self.deleting_soon {
            return CleanupOutcome::AlreadyDeleting;
        }
        if self.within_process_died_observer {
            self.delayed_cleanup_needed = true;
            return CleanupOutcome::Deferred;
        }
        self.delayed_cleanup_needed = false;

        if self.services.config.single_process {
            return CleanupOutcome::Retained;
        }
        if !self.listeners.is_empty() || self.keep_alive.total() != 0 {
            return CleanupOutcome::Retained;
        }

        let snapshot = self.snapshot();
        let observers = self.observers.snapshot();
        if self.state.is_initialized_and_not_dead() {
            let info = TerminationInfo::normal();
            let mut ignored = HostRequests::default();
            self.within_process_died_observer = true;
            for observer in &observers {
                observer.host_exited(&snapshot, &info, &mut ignored);
            }
            self.within_process_died_observer = false;
        }
        for observer in &observers {
            observer.host_destroyed(&snapshot);
        }

        self.deleting_soon = true;
        self.delayed_cleanup_needed = false;
        self.reset_channel();
        self.ready_tasks.clear();
        self.observers.clear();
        self.priority_clients.clear();
        info!("Host {} scheduled for deletion", self.id);
        CleanupOutcome::DeleteSoon
    }

    /// Last step before the host is dropped.
    pub(crate) fn finalize(&mut self) {
        if let Some(mut child) = self.child.take() {
            child.terminate(RESULT_CODE_NORMAL_EXIT);
        }
        debug!("Host {} deleted", self.id);
    }

    /// Ask the launcher to end the process.
    pub fn shutdown(&mut self, exit_code: i32) -> bool {
        if self.services.config.single_process {
            return false;
        }
        match self.child.as_mut() {
            Some(child) => child.terminate(exit_code),
            None => false,
        }
    }

    /// Kill the worker for sending something invalid.
    pub fn shutdown_for_bad_message(&mut self, reason: &str) -> Option<BadMessageReport> {
        if self.services.config.disable_kill_after_bad_message {
            warn!("Host {} sent a bad message (kill disabled): {}", self.id, reason);
            return None;
        }
        if self.services.config.single_process {
            error!("Bad message in single-process mode from host {}: {}", self.id, reason);
            return None;
        }
        let report = BadMessageReport::new(self.id, self.readiness.pid(), reason);
        error!("Terminating host {} for bad message: {}", self.id, reason);
        self.killed_for_bad_message = true;
        self.shutdown(RESULT_CODE_KILLED_BAD_MESSAGE);
        self.last_bad_message = Some(report.clone());
        Some(report)
    }

    /// Kill the process right away if nothing needs it to exit cleanly.
    ///
    /// Returns `None` when fast shutdown is not allowed.
    pub fn fast_shutdown_if_possible(&mut self, skip_unload: bool) -> Option<HostUpdate> {
        if self.services.config.single_process || self.child.is_none() || !self.readiness.is_launched() {
            return None;
        }
        if !skip_unload && !self.sudden_termination_allowed {
            return None;
        }
        if self.keep_alive.total() != 0 {
            return None;
        }
        info!("Host {} fast shutdown", self.id);
        self.fast_shutdown_started = true;
        Some(self.process_died(false, None))
    }

    /// Send `message` to the worker. Queued until the worker is live.
    ///
    /// Dropped, returning false, while the host is dead.
    pub fn send(&mut self, message: &ChannelMessage) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            debug!("Host {} dropping '{}': no channel", self.id, message.name);
            return false;
        };
        match channel.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Host {} failed to send '{}': {}", self.id, message.name, e);
                false
            }
        }
    }

    fn send_control(&mut self, control: ControlMessage) -> bool {
        match control.to_message() {
            Ok(message) => self.send(&message),
            Err(e) => {
                warn!("Host {} could not encode control message: {}", self.id, e);
                false
            }
        }
    }

    /// Dispatch an inbound message. Returns whether anyone handled it.
    pub fn on_message_received(&mut self, message: &ChannelMessage) -> bool {
        if self.deleting_soon || self.fast_shutdown_started {
            return false;
        }
        if message.is_control() {
            return match ControlMessage::from_message(message) {
                Ok(control) => self.on_control_message(control),
                Err(e) => {
                    self.shutdown_for_bad_message(&e.to_string());
                    false
                }
            };
        }
        match self.listeners.get(&message.routing_id).cloned() {
            Some(listener) => listener.on_message_received(message),
            None => {
                debug!("Host {} has no listener for route {}", self.id, message.routing_id);
                if message.sync {
                    self.send(&message.error_reply());
                }
                false
            }
        }
    }

    fn on_control_message(&mut self, control: ControlMessage) -> bool {
        match control {
            ControlMessage::SuddenTerminationChanged { allowed } => {
                self.sudden_termination_allowed = allowed;
                true
            }
            ControlMessage::ShutdownRequest => {
                if self.listeners.is_empty() && self.keep_alive.total() == 0 {
                    debug!("Host {} granting shutdown request", self.id);
                    self.send_control(ControlMessage::Shutdown);
                }
                true
            }
            other => {
                self.shutdown_for_bad_message(&format!("unexpected control message {:?}", other));
                false
            }
        }
    }

    /// Route messages for `routing_id` to `listener`.
    ///
    /// # Panics
    ///
    /// If the routing id is already taken.
    pub fn add_route(&mut self, routing_id: i32, listener: Arc<dyn Listener>) {
        assert!(
            !self.listeners.contains_key(&routing_id),
            "Found Routing ID Conflict: {}",
            routing_id
        );
        self.listeners.insert(routing_id, listener);
    }

    pub fn remove_route(&mut self, routing_id: i32) -> CleanupOutcome {
        self.listeners.remove(&routing_id);
        self.cleanup()
    }

    pub fn increment_keep_alive_ref_count(&mut self, client: KeepAliveClientType) {
        self.keep_alive.increment(client);
    }

    pub fn decrement_keep_alive_ref_count(&mut self, client: KeepAliveClientType) -> CleanupOutcome {
        if self.keep_alive.decrement(client) {
            self.cleanup()
        } else {
            CleanupOutcome::Retained
        }
    }

    /// Zero all keep-alive counts for good and try to clean up.
    pub fn disable_keep_alive_ref_count(&mut self) -> CleanupOutcome {
        if !self.keep_alive.disable() {
            return CleanupOutcome::Retained;
        }
        debug!("Host {} keep-alive disabled", self.id);
        self.cleanup()
    }

    /// Hold the host open for `timeout` so unload handlers can finish.
    pub fn delay_process_shutdown_for_unload(&mut self, timeout: Duration) -> bool {
        if self.deleting_soon || self.keep_alive.is_disabled() {
            return false;
        }
        self.keep_alive.increment(KeepAliveClientType::Unload);
        self.services.sink.post_delayed(
            HostEvent::KeepAliveExpired {
                host: self.handle(),
                client: KeepAliveClientType::Unload,
            },
            timeout,
        );
        true
    }

    pub fn add_priority_client(&mut self, client: Arc<dyn PriorityClient>) -> PriorityClientId {
        let id = PriorityClientId(self.next_priority_client);
        self.next_priority_client += 1;
        self.priority_clients.insert(id, client);
        self.update_client_priority();
        id
    }

    pub fn remove_priority_client(&mut self, id: PriorityClientId) -> bool {
        let removed = self.priority_clients.remove(&id).is_some();
        if removed {
            self.update_client_priority();
        }
        removed
    }

    /// Re-read every client's priority.
    pub fn update_client_priority(&mut self) {
        let inputs = PriorityInputs::aggregate(self.priority_clients.values().map(|c| c.priority()));
        if inputs != self.inputs {
            self.inputs = inputs;
            self.update_process_priority();
        }
    }

    fn update_process_priority(&mut self) {
        if self.child.is_none() || !self.readiness.is_launched() {
            self.priority = ProcessPriority::default();
            return;
        }
        let priority = ProcessPriority::derive(&self.inputs, self.services.config.disable_backgrounding);
        if priority == self.priority {
            return;
        }
        let flipped = priority.is_background() != self.priority.is_background();
        self.priority = priority;
        if let Some(child) = self.child.as_mut() {
            child.set_priority(&priority);
        }
        if flipped {
            debug!("Host {} backgrounded: {}", self.id, priority.is_background());
            self.send_control(ControlMessage::SetProcessBackgrounded {
                backgrounded: priority.is_background(),
            });
        }
    }

    fn create_channel(&mut self) -> Channel {
        self.launch += 1;
        let handle = self.handle();
        let identity = ServiceIdentity::new(ProcessType::Worker.as_str(), &format!("{}_{}", self.id, self.launch));
        let sink = self.services.sink.clone();
        let token = self.services.broker.invite(
            identity.clone(),
            Box::new(move |transport, peer_pid| {
                sink.post(HostEvent::ChannelConnected {
                    host: handle,
                    peer_pid,
                    transport,
                });
            }),
        );
        Channel::new(token, identity)
    }

    fn reset_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            self.services.broker.revoke(channel.bootstrap_token());
            channel.close();
        }
    }

    fn build_command_line(&self, token: &BootstrapToken) -> CommandLine {
        let config = &self.services.config;
        let mut command_line = CommandLine::new(config.worker_program.clone());
        command_line.append_switch_value(switches::PROCESS_TYPE, ProcessType::Worker.as_str());
        command_line.copy_switches_from(&config.base_command_line, &config.propagate_switches);
        command_line.append_switch_value(switches::LANG, &config.lang);
        self.services.policy.append_extra_switches(&mut command_line);
        command_line.append_switch_value(switches::SERVICE_REQUEST_CHANNEL_TOKEN, token.as_str());
        command_line.append_switch_value(switches::WORKER_CLIENT_ID, &self.id.to_string());
        for arg in &config.extra_args {
            command_line.append_arg(arg);
        }
        command_line
    }
}

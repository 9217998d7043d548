//! Doubles for driving hosts without real processes.
//!
//! [`FakeLauncher`] records every launch request and, in auto mode, plays
//! the worker's part: it reports the launch and connects back through the
//! bootstrap broker over a [`MemoryTransport`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::{BootstrapBroker, BootstrapToken, ChannelMessage, MemoryTransport};
use crate::child::{ChildProcessData, ChildProcessObserver};
use crate::error::Result;
use crate::host::{
    ClientPriority, HostHandle, HostRequests, HostSnapshot, Listener,
    ProcessHostObserver, ProcessPriority, PriorityClient, ProcessType, TerminationInfo, TerminationStatus,
};
use crate::launch::{ChildProcess, CommandLine, LaunchRequest, ProcessLauncher, ProcessReporter};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
struct FakeProcessState {
    priorities: Vec<ProcessPriority>,
    terminated_with: Option<i32>,
    info: TerminationInfo,
}

/// Shared view of one fake process.
#[derive(Debug, Clone)]
pub struct FakeProcess {
    state: Arc<Mutex<FakeProcessState>>,
}

impl FakeProcess {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeProcessState {
                priorities: Vec::new(),
                terminated_with: None,
                info: TerminationInfo::new(TerminationStatus::StillRunning, 0),
            })),
        }
    }

    pub fn priorities(&self) -> Vec<ProcessPriority> {
        lock(&self.state).priorities.clone()
    }

    pub fn terminated_with(&self) -> Option<i32> {
        lock(&self.state).terminated_with
    }

    /// What the process reports when asked how it ended.
    pub fn set_termination_info(&self, info: TerminationInfo) {
        lock(&self.state).info = info;
    }
}

struct FakeChild {
    process: FakeProcess,
}

impl ChildProcess for FakeChild {
    fn termination_info(&mut self, known_dead: bool) -> TerminationInfo {
        lock(&self.process.state).info.classify(known_dead)
    }

    fn terminate(&mut self, exit_code: i32) -> bool {
        let mut state = lock(&self.process.state);
        state.terminated_with = Some(exit_code);
        state.info = TerminationInfo::new(TerminationStatus::ProcessWasKilled, exit_code);
        true
    }

    fn set_priority(&mut self, priority: &ProcessPriority) {
        lock(&self.process.state).priorities.push(*priority);
    }
}

/// One recorded launch.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub process_type: ProcessType,
    pub command_line: CommandLine,
    pub token: BootstrapToken,
    pub reporter: ProcessReporter,
    pub process: FakeProcess,
}

impl LaunchRecord {
    pub fn host(&self) -> HostHandle {
        self.reporter.handle()
    }

    pub fn complete(&self, pid: u32) {
        self.reporter.launched(pid);
    }

    /// Connect back as the worker would, returning the worker's view of the pipe.
    pub fn connect(&self, broker: &BootstrapBroker, pid: u32) -> Result<MemoryTransport> {
        let transport = MemoryTransport::new();
        broker.accept(self.token.as_str(), Box::new(transport.clone()), pid)?;
        Ok(transport)
    }
}

pub struct FakeLauncher {
    launches: Mutex<Vec<LaunchRecord>>,
    transports: Mutex<BTreeMap<i32, MemoryTransport>>,
    auto_broker: Option<Arc<BootstrapBroker>>,
    next_pid: AtomicU32,
}

impl FakeLauncher {
    /// Records launches; reports nothing until told to.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Reports every launch and connects it through `broker` straight away.
    pub fn auto(broker: Arc<BootstrapBroker>) -> Arc<Self> {
        Arc::new(Self::build(Some(broker)))
    }

    fn build(auto_broker: Option<Arc<BootstrapBroker>>) -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            transports: Mutex::new(BTreeMap::new()),
            auto_broker,
            next_pid: AtomicU32::new(1000),
        }
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        lock(&self.launches).clone()
    }

    pub fn launch_count(&self) -> usize {
        lock(&self.launches).len()
    }

    pub fn last(&self) -> Option<LaunchRecord> {
        lock(&self.launches).last().cloned()
    }

    /// Latest launch for host `id`.
    pub fn for_host(&self, id: i32) -> Option<LaunchRecord> {
        lock(&self.launches).iter().rev().find(|r| r.host().id == id).cloned()
    }

    /// Worker end of an auto-connected host's pipe.
    pub fn transport(&self, id: i32) -> Option<MemoryTransport> {
        lock(&self.transports).get(&id).cloned()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, request: LaunchRequest) -> Box<dyn ChildProcess> {
        let process = FakeProcess::new();
        let record = LaunchRecord {
            process_type: request.process_type,
            command_line: request.command_line,
            token: request.token,
            reporter: request.reporter,
            process: process.clone(),
        };
        lock(&self.launches).push(record.clone());

        if let Some(broker) = &self.auto_broker {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            record.complete(pid);
            match record.connect(broker, pid) {
                Ok(transport) => {
                    lock(&self.transports).insert(record.host().id, transport);
                }
                Err(e) => log::warn!("fake connect failed: {}", e),
            }
        }
        Box::new(FakeChild { process })
    }
}

/// Something a [`RecordingObserver`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    Launched(i32),
    Ready(i32),
    Exited(i32, TerminationStatus),
    Destroyed(i32),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
    cleanup_on_exit: bool,
    reinit_on_exit: bool,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Asks for cleanup from inside every exit notification.
    pub fn requesting_cleanup() -> Arc<Self> {
        Arc::new(Self {
            cleanup_on_exit: true,
            ..Self::default()
        })
    }

    /// Asks for a relaunch from inside every exit notification.
    pub fn requesting_reinit() -> Arc<Self> {
        Arc::new(Self {
            reinit_on_exit: true,
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, matches: impl Fn(&ObservedEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| matches(e)).count()
    }
}

impl ProcessHostObserver for RecordingObserver {
    fn host_launched(&self, host: &HostSnapshot) {
        lock(&self.events).push(ObservedEvent::Launched(host.id));
    }

    fn host_ready(&self, host: &HostSnapshot) {
        lock(&self.events).push(ObservedEvent::Ready(host.id));
    }

    fn host_exited(&self, host: &HostSnapshot, info: &TerminationInfo, requests: &mut HostRequests) {
        lock(&self.events).push(ObservedEvent::Exited(host.id, info.status));
        if self.cleanup_on_exit {
            requests.request_cleanup();
        }
        if self.reinit_on_exit {
            requests.request_reinit();
        }
    }

    fn host_destroyed(&self, host: &HostSnapshot) {
        lock(&self.events).push(ObservedEvent::Destroyed(host.id));
    }
}

/// Child observer that keeps a log of `"callback:id"` strings.
#[derive(Default)]
pub struct RecordingChildObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingChildObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    fn record(&self, name: &str, data: &ChildProcessData) {
        lock(&self.events).push(format!("{}:{}", name, data.id));
    }
}

impl ChildProcessObserver for RecordingChildObserver {
    fn host_created(&self, data: &ChildProcessData) {
        self.record("created", data);
    }

    fn host_connected(&self, data: &ChildProcessData) {
        self.record("connected", data);
    }

    fn host_launched_and_connected(&self, data: &ChildProcessData) {
        self.record("launched_and_connected", data);
    }

    fn host_disconnected(&self, data: &ChildProcessData) {
        self.record("disconnected", data);
    }

    fn host_crashed(&self, data: &ChildProcessData, _info: &TerminationInfo) {
        self.record("crashed", data);
    }

    fn host_killed(&self, data: &ChildProcessData, _info: &TerminationInfo) {
        self.record("killed", data);
    }
}

/// Priority client whose answer can be changed.
pub struct StaticPriorityClient {
    priority: Mutex<ClientPriority>,
}

impl StaticPriorityClient {
    pub fn new(priority: ClientPriority) -> Arc<Self> {
        Arc::new(Self {
            priority: Mutex::new(priority),
        })
    }

    pub fn set(&self, priority: ClientPriority) {
        *lock(&self.priority) = priority;
    }
}

impl PriorityClient for StaticPriorityClient {
    fn priority(&self) -> ClientPriority {
        *lock(&self.priority)
    }
}

/// Listener that accepts everything and remembers it.
#[derive(Default)]
pub struct RecordingListener {
    messages: Mutex<Vec<ChannelMessage>>,
    errors: AtomicU32,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<ChannelMessage> {
        lock(&self.messages).clone()
    }

    pub fn channel_errors(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }
}

impl Listener for RecordingListener {
    fn on_message_received(&self, message: &ChannelMessage) -> bool {
        lock(&self.messages).push(message.clone());
        true
    }

    fn on_channel_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

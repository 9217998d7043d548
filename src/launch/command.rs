//! Launching workers as OS processes.
//!
//! The worker's stdin and stdout carry the channel as length-prefixed
//! frames. Its first frame must be a `Hello` carrying the bootstrap token
//! from its command line; until then nothing it sends is delivered.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use super::{ChildProcess, LaunchRequest, ProcessLauncher, ProcessReporter};
use crate::channel::{BootstrapBroker, BootstrapToken, ControlMessage, Incoming, StreamTransport, pump_incoming};
use crate::host::{
    ProcessPriority, RESULT_CODE_KILLED, TerminationInfo, TerminationStatus,
};
use crate::threading::{TaskExecutor, TaskTraits};

/// Launch error code when the IO thread is gone.
pub const LAUNCH_ERROR_NO_IO_THREAD: i32 = -2;

#[derive(Default)]
struct ProcessState {
    pid: Option<u32>,
    exit: Option<TerminationInfo>,
    kill: Option<mpsc::UnboundedSender<i32>>,
    pending_kill: Option<i32>,
    /// Exit code of a kill that has been asked for but not yet seen.
    requested_exit: Option<i32>,
    priority: Option<ProcessPriority>,
}

/// Starts workers with `tokio::process` on the IO thread.
pub struct CommandLauncher {
    executor: Arc<TaskExecutor>,
    broker: Arc<BootstrapBroker>,
}

impl CommandLauncher {
    pub fn new(executor: Arc<TaskExecutor>, broker: Arc<BootstrapBroker>) -> Self {
        Self { executor, broker }
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, request: LaunchRequest) -> Box<dyn ChildProcess> {
        let state = Arc::new(Mutex::new(ProcessState::default()));
        let task_state = state.clone();
        let broker = self.broker.clone();
        let reporter = request.reporter.clone();

        let posted = self.executor.post_task(TaskTraits::io(), move || {
            tokio::spawn(run_process(request, broker, task_state));
        });
        if !posted {
            warn!("IO thread unavailable; launch of {} failed", reporter.handle());
            reporter.launch_failed(LAUNCH_ERROR_NO_IO_THREAD);
        }
        Box::new(CommandProcess { state })
    }
}

struct CommandProcess {
    state: Arc<Mutex<ProcessState>>,
}

impl CommandProcess {
    fn lock(&self) -> std::sync::MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChildProcess for CommandProcess {
    fn termination_info(&mut self, known_dead: bool) -> TerminationInfo {
        let state = self.lock();
        let info = match (state.exit, state.requested_exit) {
            (Some(exit), _) => exit,
            (None, Some(code)) => TerminationInfo::new(TerminationStatus::ProcessWasKilled, code),
            (None, None) => TerminationInfo::new(TerminationStatus::StillRunning, 0),
        };
        info.classify(known_dead)
    }

    fn terminate(&mut self, exit_code: i32) -> bool {
        let mut state = self.lock();
        if state.exit.is_some() {
            return false;
        }
        let sent = match &state.kill {
            Some(kill) => kill.send(exit_code).is_ok(),
            None => {
                state.pending_kill = Some(exit_code);
                true
            }
        };
        if sent {
            state.requested_exit.get_or_insert(exit_code);
        }
        sent
    }

    fn set_priority(&mut self, priority: &ProcessPriority) {
        let mut state = self.lock();
        // No portable priority API; record it for diagnostics.
        debug!("pid {:?} priority {:?}", state.pid, priority);
        state.priority = Some(*priority);
    }
}

impl Drop for CommandProcess {
    fn drop(&mut self) {
        let state = self.lock();
        if state.exit.is_none() {
            if let Some(kill) = &state.kill {
                let _ = kill.send(RESULT_CODE_KILLED);
            }
        }
    }
}

async fn run_process(request: LaunchRequest, broker: Arc<BootstrapBroker>, state: Arc<Mutex<ProcessState>>) {
    let reporter = request.reporter.clone();
    let argv = request.command_line.argv();
    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn {}: {}", request.command_line.program().display(), e);
            reporter.launch_failed(e.raw_os_error().unwrap_or(-1));
            return;
        }
    };

    let pid = child.id().unwrap_or_default();
    let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<i32>();
    {
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        state.pid = Some(pid);
        if let Some(code) = state.pending_kill.take() {
            let _ = kill_tx.send(code);
        }
        state.kill = Some(kill_tx);
    }
    info!("Launched {} as pid {}", reporter.handle(), pid);
    reporter.launched(pid);

    if let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) {
        tokio::spawn(serve_channel(stdin, stdout, request.token, broker, reporter.clone()));
    }

    let mut requested_exit = None;
    let status = tokio::select! {
        status = child.wait() => status,
        Some(code) = kill_rx.recv() => {
            debug!("Terminating pid {} with code {}", pid, code);
            requested_exit = Some(code);
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill pid {}: {}", pid, e);
            }
            child.wait().await
        }
    };

    let info = match status {
        Ok(status) => classify_exit(status, requested_exit),
        Err(e) => {
            warn!("Waiting on pid {} failed: {}", pid, e);
            TerminationInfo::new(TerminationStatus::AbnormalTermination, -1)
        }
    };
    state.lock().unwrap_or_else(|e| e.into_inner()).exit = Some(info);
    reporter.exited(info);
}

async fn serve_channel(
    stdin: ChildStdin,
    stdout: ChildStdout,
    token: BootstrapToken,
    broker: Arc<BootstrapBroker>,
    reporter: ProcessReporter,
) {
    let mut writer = Some(stdin);
    let mut joined = false;
    pump_incoming(stdout, |incoming| match incoming {
        Incoming::Message(message) if !joined => match ControlMessage::from_message(&message) {
            Ok(ControlMessage::Hello { token: presented, pid }) if presented == token.as_str() => {
                if let Some(stdin) = writer.take() {
                    let (transport, _writer_task) = StreamTransport::spawn(stdin);
                    match broker.accept(&presented, Box::new(transport), pid) {
                        Ok(_) => joined = true,
                        Err(e) => reporter.bad_message(&e.to_string()),
                    }
                }
            }
            _ => reporter.bad_message(&format!("expected hello, got '{}'", message.name)),
        },
        Incoming::Message(message) => reporter.message_received(message),
        Incoming::BadMessage(reason) => reporter.bad_message(&reason),
        Incoming::Closed => reporter.channel_error(),
    })
    .await;
}

/// Map an OS exit status onto a termination status.
pub fn classify_exit(status: ExitStatus, requested_exit: Option<i32>) -> TerminationInfo {
    if let Some(code) = status.code() {
        return match requested_exit {
            Some(requested) => TerminationInfo::new(TerminationStatus::ProcessWasKilled, requested),
            None if code == 0 => TerminationInfo::normal(),
            None => TerminationInfo::new(TerminationStatus::AbnormalTermination, code),
        };
    }
    classify_signal(status, requested_exit)
}

#[cfg(unix)]
fn classify_signal(status: ExitStatus, requested_exit: Option<i32>) -> TerminationInfo {
    use std::os::unix::process::ExitStatusExt;

    const SIGINT: i32 = 2;
    const SIGKILL: i32 = 9;
    const SIGTERM: i32 = 15;

    let signal = status.signal().unwrap_or_default();
    match (signal, requested_exit) {
        (_, Some(code)) => TerminationInfo::new(TerminationStatus::ProcessWasKilled, code),
        (SIGINT | SIGKILL | SIGTERM, None) => {
            TerminationInfo::new(TerminationStatus::ProcessWasKilled, RESULT_CODE_KILLED)
        }
        (signal, None) => TerminationInfo::new(TerminationStatus::ProcessCrashed, signal),
    }
}

#[cfg(not(unix))]
fn classify_signal(_status: ExitStatus, requested_exit: Option<i32>) -> TerminationInfo {
    match requested_exit {
        Some(code) => TerminationInfo::new(TerminationStatus::ProcessWasKilled, code),
        None => TerminationInfo::new(TerminationStatus::AbnormalTermination, -1),
    }
}

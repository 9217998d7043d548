//! Host lifecycle states and exit classification.

use serde::{Deserialize, Serialize};

pub const RESULT_CODE_NORMAL_EXIT: i32 = 0;
pub const RESULT_CODE_KILLED: i32 = 1;
pub const RESULT_CODE_HUNG: i32 = 2;
pub const RESULT_CODE_KILLED_BAD_MESSAGE: i32 = 3;

/// Where a host is in its launch/death cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Uninitialized,
    Launching,
    Ready,
    Dead,
}

impl HostState {
    pub fn is_initialized_and_not_dead(self) -> bool {
        matches!(self, HostState::Launching | HostState::Ready)
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    NormalTermination,
    AbnormalTermination,
    ProcessWasKilled,
    ProcessCrashed,
    StillRunning,
    LaunchFailed,
    KilledBadMessage,
}

impl TerminationStatus {
    /// Reported to child observers as a crash.
    pub fn is_crash(self) -> bool {
        matches!(
            self,
            TerminationStatus::ProcessCrashed
                | TerminationStatus::AbnormalTermination
                | TerminationStatus::LaunchFailed
        )
    }

    /// Reported to child observers as a kill.
    pub fn is_killed(self) -> bool {
        matches!(
            self,
            TerminationStatus::ProcessWasKilled | TerminationStatus::KilledBadMessage
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationInfo {
    pub status: TerminationStatus,
    pub exit_code: i32,
}

impl TerminationInfo {
    pub fn new(status: TerminationStatus, exit_code: i32) -> Self {
        Self { status, exit_code }
    }

    pub fn normal() -> Self {
        Self::new(TerminationStatus::NormalTermination, RESULT_CODE_NORMAL_EXIT)
    }

    pub fn launch_failed(error_code: i32) -> Self {
        Self::new(TerminationStatus::LaunchFailed, error_code)
    }

    /// A process we know is dead but that still reports running counts as
    /// crashed, so the host does not wait forever for it to become ready.
    pub fn classify(self, known_dead: bool) -> Self {
        if known_dead && self.status == TerminationStatus::StillRunning {
            Self::new(TerminationStatus::ProcessCrashed, self.exit_code)
        } else {
            self
        }
    }
}

/// Folds the launch and connect signals into one ready transition.
///
/// Either signal may arrive first and either may repeat; `true` is
/// returned exactly once, by whichever call completes the pair.
#[derive(Debug, Clone, Default)]
pub struct ReadinessTracker {
    pid: Option<u32>,
    connected: bool,
    notified: bool,
}

impl ReadinessTracker {
    pub fn on_launched(&mut self, pid: u32) -> bool {
        if self.pid.is_none() {
            self.pid = Some(pid);
        }
        self.check()
    }

    pub fn on_connected(&mut self) -> bool {
        self.connected = true;
        self.check()
    }

    pub fn is_launched(&self) -> bool {
        self.pid.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_ready(&self) -> bool {
        self.is_launched() && self.connected
    }

    pub fn has_notified(&self) -> bool {
        self.notified
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn check(&mut self) -> bool {
        if self.is_ready() && !self.notified {
            self.notified = true;
            true
        } else {
            false
        }
    }
}

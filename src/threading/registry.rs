//! Registry binding logical threads to task runners.
//!
//! Each [`ThreadId`] moves Uninitialized -> Running -> Shutdown exactly once.
//! The runner stays mapped after shutdown, but posts are refused so late
//! work is dropped instead of reaching a stopped thread.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, error, info};

use super::runner::{Task, TaskRunner};
use super::thread_id::ThreadId;
use crate::error::{HostError, Result};

/// Lifecycle of one logical thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadState {
    Uninitialized,
    Running,
    Shutdown,
}

#[derive(Clone)]
struct Slot {
    state: ThreadState,
    runner: Option<Arc<dyn TaskRunner>>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: ThreadState::Uninitialized,
            runner: None,
        }
    }
}

/// Maps each logical thread to the runner backing it.
pub struct ThreadRegistry {
    slots: RwLock<[Slot; ThreadId::COUNT]>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(std::array::from_fn(|_| Slot::default())),
        }
    }

    /// Bind `id` to `runner` and mark it running.
    ///
    /// Rejected unless the thread is still uninitialized.
    pub fn register_thread(&self, id: ThreadId, runner: Arc<dyn TaskRunner>) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = &mut slots[id.index()];
        if slot.state != ThreadState::Uninitialized {
            error!("Refusing to register {}: state is {:?}", id, slot.state);
            debug_assert!(false, "{} registered while {:?}", id, slot.state);
            return Err(HostError::Thread(format!("{} already registered", id)));
        }
        slot.state = ThreadState::Running;
        slot.runner = Some(runner);
        info!("Registered {}", id);
        Ok(())
    }

    /// Mark `id` shut down. The runner mapping is kept.
    pub fn mark_shutdown(&self, id: ThreadId) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = &mut slots[id.index()];
        if slot.state != ThreadState::Running {
            error!("Refusing to shut down {}: state is {:?}", id, slot.state);
            return Err(HostError::Thread(format!("{} is not running", id)));
        }
        slot.state = ThreadState::Shutdown;
        info!("{} shut down", id);
        Ok(())
    }

    /// Return a shut-down thread to uninitialized so it can be registered again.
    pub fn reset_for_testing(&self, id: ThreadId) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let slot = &mut slots[id.index()];
        if slot.state != ThreadState::Shutdown {
            return Err(HostError::Thread(format!("{} must be shut down before reset", id)));
        }
        *slot = Slot::default();
        Ok(())
    }

    pub fn state(&self, id: ThreadId) -> ThreadState {
        self.slots.read().unwrap_or_else(|e| e.into_inner())[id.index()].state
    }

    pub fn is_running(&self, id: ThreadId) -> bool {
        self.state(id) == ThreadState::Running
    }

    /// True once the thread has been registered, including after shutdown.
    pub fn is_thread_initialized(&self, id: ThreadId) -> bool {
        self.state(id) >= ThreadState::Running
    }

    /// True when the calling code runs on the runner bound to `id`.
    pub fn currently_on(&self, id: ThreadId) -> bool {
        self.runner(id)
            .map(|runner| runner.runs_tasks_in_current_sequence())
            .unwrap_or(false)
    }

    /// Which logical thread the caller is on, if any.
    pub fn current_thread_identifier(&self) -> Option<ThreadId> {
        ThreadId::ALL.into_iter().find(|id| self.currently_on(*id))
    }

    /// The real runner for `id`, once it has been registered.
    pub fn task_runner_for_thread(&self, id: ThreadId) -> Option<Arc<dyn TaskRunner>> {
        if !self.is_thread_initialized(id) {
            return None;
        }
        self.runner(id)
    }

    /// Forward a task to the runner for `id` if it is running.
    pub(crate) fn post(&self, id: ThreadId, task: Task, delay: Duration, nestable: bool) -> bool {
        let (state, runner) = {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            let slot = &slots[id.index()];
            (slot.state, slot.runner.clone())
        };

        match (state, runner) {
            (ThreadState::Running, Some(runner)) => {
                if nestable {
                    runner.post_delayed_task(task, delay)
                } else {
                    runner.post_non_nestable_delayed_task(task, delay)
                }
            }
            (state, _) => {
                debug!("Dropping task posted to {} in state {:?}", id, state);
                false
            }
        }
    }

    fn runner(&self, id: ThreadId) -> Option<Arc<dyn TaskRunner>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())[id.index()]
            .runner
            .clone()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading::ManualTaskRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_thread_once() {
        let registry = ThreadRegistry::new();
        assert_eq!(registry.state(ThreadId::Ui), ThreadState::Uninitialized);

        registry.register_thread(ThreadId::Ui, ManualTaskRunner::new()).unwrap();
        assert!(registry.is_running(ThreadId::Ui));
        assert!(!registry.is_running(ThreadId::Io));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "registered while Running")]
    fn test_double_registration_panics_in_debug() {
        let registry = ThreadRegistry::new();
        registry.register_thread(ThreadId::Io, ManualTaskRunner::new()).unwrap();
        let _ = registry.register_thread(ThreadId::Io, ManualTaskRunner::new());
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_double_registration_rejected() {
        let registry = ThreadRegistry::new();
        registry.register_thread(ThreadId::Io, ManualTaskRunner::new()).unwrap();
        let result = registry.register_thread(ThreadId::Io, ManualTaskRunner::new());
        assert!(matches!(result, Err(HostError::Thread(_))));
        assert!(registry.is_running(ThreadId::Io));
    }

    #[test]
    fn test_post_after_shutdown_is_dropped() {
        let registry = ThreadRegistry::new();
        let runner = ManualTaskRunner::new();
        registry.register_thread(ThreadId::Ui, runner.clone()).unwrap();
        registry.mark_shutdown(ThreadId::Ui).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let posted = registry.post(
            ThreadId::Ui,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::ZERO,
            true,
        );

        assert!(!posted);
        runner.run_until_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!registry.is_running(ThreadId::Ui));
        assert!(registry.is_thread_initialized(ThreadId::Ui));
        assert!(registry.task_runner_for_thread(ThreadId::Ui).is_some());
    }

    #[test]
    fn test_shutdown_requires_running() {
        let registry = ThreadRegistry::new();
        assert!(registry.mark_shutdown(ThreadId::Io).is_err());

        registry.register_thread(ThreadId::Io, ManualTaskRunner::new()).unwrap();
        registry.mark_shutdown(ThreadId::Io).unwrap();
        assert!(registry.mark_shutdown(ThreadId::Io).is_err());
    }

    #[test]
    fn test_reset_for_testing_allows_reregistration() {
        let registry = ThreadRegistry::new();
        registry.register_thread(ThreadId::Ui, ManualTaskRunner::new()).unwrap();
        assert!(registry.reset_for_testing(ThreadId::Ui).is_err());

        registry.mark_shutdown(ThreadId::Ui).unwrap();
        registry.reset_for_testing(ThreadId::Ui).unwrap();
        assert_eq!(registry.state(ThreadId::Ui), ThreadState::Uninitialized);
        registry.register_thread(ThreadId::Ui, ManualTaskRunner::new()).unwrap();
    }

    #[test]
    fn test_current_thread_identifier() {
        let registry = ThreadRegistry::new();
        assert_eq!(registry.current_thread_identifier(), None);

        // Manual runners belong to the thread that created them.
        registry.register_thread(ThreadId::Ui, ManualTaskRunner::new()).unwrap();
        assert!(registry.currently_on(ThreadId::Ui));
        assert_eq!(registry.current_thread_identifier(), Some(ThreadId::Ui));
    }

    #[test]
    fn test_unregistered_runner_lookup() {
        let registry = ThreadRegistry::new();
        assert!(registry.task_runner_for_thread(ThreadId::Io).is_none());
        assert!(!registry.currently_on(ThreadId::Io));
    }
}

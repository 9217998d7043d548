//! Ordered startup steps.
//!
//! Steps normally run one per posted task so the owning thread stays
//! responsive between them. [`StartupTaskRunner::run_all_tasks_now`] runs
//! them inline and exists for tests.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, error};

use super::runner::TaskRunner;
use crate::error::Result;

pub type StartupTask = Box<dyn FnOnce() -> Result<()> + Send>;
/// Told whether every step succeeded.
pub type StartupCallback = Box<dyn FnOnce(bool) + Send>;

pub struct StartupTaskRunner {
    tasks: VecDeque<(String, StartupTask)>,
    runner: Arc<dyn TaskRunner>,
    on_complete: Option<StartupCallback>,
}

impl StartupTaskRunner {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            tasks: VecDeque::new(),
            runner,
            on_complete: None,
        }
    }

    pub fn add_task<F>(&mut self, name: &str, task: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.tasks.push_back((name.to_string(), Box::new(task)));
    }

    pub fn set_on_complete<F>(&mut self, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Post the first step; each step posts the next. Stops at the first error.
    pub fn start_running_tasks_async(self) -> bool {
        let runner = self.runner.clone();
        runner.post_task(Box::new(move || self.run_next()))
    }

    /// Run every remaining step inline.
    pub fn run_all_tasks_now(mut self) -> Result<()> {
        let mut result = Ok(());
        while let Some((name, task)) = self.tasks.pop_front() {
            debug!("Running startup step {}", name);
            if let Err(e) = task() {
                error!("Startup step {} failed: {}", name, e);
                result = Err(e);
                break;
            }
        }
        self.finish(result)
    }

    fn run_next(mut self) {
        let Some((name, task)) = self.tasks.pop_front() else {
            let _ = self.finish(Ok(()));
            return;
        };

        debug!("Running startup step {}", name);
        if let Err(e) = task() {
            error!("Startup step {} failed: {}", name, e);
            let _ = self.finish(Err(e));
            return;
        }

        let runner = self.runner.clone();
        runner.post_task(Box::new(move || self.run_next()));
    }

    fn finish(mut self, result: Result<()>) -> Result<()> {
        if let Some(callback) = self.on_complete.take() {
            callback(result.is_ok());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostError;
    use crate::threading::ManualTaskRunner;
    use std::sync::Mutex;

    #[test]
    fn test_async_steps_run_one_per_task() {
        let runner = ManualTaskRunner::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut startup = StartupTaskRunner::new(runner.clone());

        for name in ["a", "b", "c"] {
            let log = log.clone();
            startup.add_task(name, move || {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        let done = Arc::new(Mutex::new(None));
        let done_clone = done.clone();
        startup.set_on_complete(move |ok| *done_clone.lock().unwrap() = Some(ok));

        assert!(startup.start_running_tasks_async());
        assert!(log.lock().unwrap().is_empty());

        runner.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(*done.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_async_steps_stop_at_first_error() {
        let runner = ManualTaskRunner::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut startup = StartupTaskRunner::new(runner.clone());

        let first = log.clone();
        startup.add_task("fails", move || {
            first.lock().unwrap().push("fails");
            Err(HostError::InvalidState("boom".to_string()))
        });
        let second = log.clone();
        startup.add_task("never", move || {
            second.lock().unwrap().push("never");
            Ok(())
        });

        startup.start_running_tasks_async();
        runner.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["fails"]);
    }

    #[test]
    fn test_run_all_tasks_now_is_synchronous() {
        let runner = ManualTaskRunner::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut startup = StartupTaskRunner::new(runner.clone());
        let l = log.clone();
        startup.add_task("only", move || {
            l.lock().unwrap().push("only");
            Ok(())
        });
        assert_eq!(startup.len(), 1);

        startup.run_all_tasks_now().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["only"]);
        assert_eq!(runner.pending_count(), 0);
    }
}

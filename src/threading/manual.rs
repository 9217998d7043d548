//! A task runner driven by hand, with virtual time.
//!
//! Tasks only run inside [`ManualTaskRunner::run_until_idle`] or
//! [`ManualTaskRunner::fast_forward_by`]. Used to drive the orchestrator
//! deterministically in tests and in single-threaded embedders.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::runner::{Task, TaskRunner};

struct PendingTask {
    run_at: Duration,
    sequence: u64,
    nestable: bool,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_sequence: u64,
    queue: Vec<PendingTask>,
}

/// Runs tasks on the thread that created it, only when asked to.
pub struct ManualTaskRunner {
    state: Mutex<ManualState>,
    depth: AtomicUsize,
    accepting: AtomicBool,
    owner: std::thread::ThreadId,
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ManualTaskRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManualState::default()),
            depth: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            owner: std::thread::current().id(),
        })
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    pub fn pending_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Refuse all further posts.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Run every task that is due, including tasks posted while running.
    ///
    /// When called from inside a running task, non-nestable tasks are left
    /// for the outer invocation.
    pub fn run_until_idle(&self) -> usize {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = DepthGuard(&self.depth);

        let mut ran = 0;
        while let Some(task) = self.take_next(depth == 1) {
            task();
            ran += 1;
        }
        ran
    }

    /// Advance virtual time, running tasks as their deadlines pass.
    pub fn fast_forward_by(&self, delta: Duration) -> usize {
        let target = self.now() + delta;
        let mut ran = self.run_until_idle();
        loop {
            let next_deadline = {
                let state = self.lock();
                state
                    .queue
                    .iter()
                    .map(|t| t.run_at)
                    .filter(|at| *at > state.now && *at <= target)
                    .min()
            };
            match next_deadline {
                Some(at) => {
                    self.lock().now = at;
                    ran += self.run_until_idle();
                }
                None => break,
            }
        }
        self.lock().now = target;
        ran + self.run_until_idle()
    }

    fn take_next(&self, outermost: bool) -> Option<Task> {
        let mut state = self.lock();
        let now = state.now;
        let index = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, t)| t.run_at <= now && (outermost || t.nestable))
            .min_by_key(|(_, t)| (t.run_at, t.sequence))
            .map(|(i, _)| i)?;
        Some(state.queue.swap_remove(index).task)
    }

    fn enqueue(&self, task: Task, delay: Duration, nestable: bool) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        let mut state = self.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let run_at = state.now + delay;
        state.queue.push(PendingTask {
            run_at,
            sequence,
            nestable,
            task,
        });
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TaskRunner for ManualTaskRunner {
    fn post_delayed_task(&self, task: Task, delay: Duration) -> bool {
        self.enqueue(task, delay, true)
    }

    fn post_non_nestable_delayed_task(&self, task: Task, delay: Duration) -> bool {
        self.enqueue(task, delay, false)
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        std::thread::current().id() == self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |label: &'static str| -> Task {
            let log = log_clone.clone();
            Box::new(move || log.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_tasks_wait_for_run_until_idle() {
        let runner = ManualTaskRunner::new();
        let (log, task) = recorder();

        runner.post_task(task("a"));
        runner.post_task(task("b"));
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(runner.run_until_idle(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_delayed_tasks_need_time() {
        let runner = ManualTaskRunner::new();
        let (log, task) = recorder();

        runner.post_delayed_task(task("later"), Duration::from_secs(5));
        runner.post_delayed_task(task("sooner"), Duration::from_secs(1));
        assert_eq!(runner.run_until_idle(), 0);

        runner.fast_forward_by(Duration::from_secs(2));
        assert_eq!(*log.lock().unwrap(), vec!["sooner"]);

        runner.fast_forward_by(Duration::from_secs(3));
        assert_eq!(*log.lock().unwrap(), vec!["sooner", "later"]);
        assert_eq!(runner.now(), Duration::from_secs(5));
    }

    #[test]
    fn test_non_nestable_skipped_in_nested_loop() {
        let runner = ManualTaskRunner::new();
        let (log, task) = recorder();

        let inner = runner.clone();
        let nested_log = log.clone();
        let outer_task = task("non-nestable");
        runner.post_task(Box::new(move || {
            inner.post_non_nestable_task(outer_task);
            inner.run_until_idle();
            nested_log.lock().unwrap().push("nested-done");
        }));

        runner.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec!["nested-done", "non-nestable"]);
    }

    #[test]
    fn test_stop_accepting_rejects_posts() {
        let runner = ManualTaskRunner::new();
        runner.stop_accepting();
        assert!(!runner.post_task(Box::new(|| {})));
        assert_eq!(runner.pending_count(), 0);
    }
}

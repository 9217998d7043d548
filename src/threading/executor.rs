//! Thread-tagged task executor.
//!
//! Callers post a task with [`TaskTraits`]; the executor resolves the
//! logical thread through a proxy runner that looks up the real runner at
//! post time. Proxies exist before their thread does, so startup code can
//! capture a runner early.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::debug;

use super::registry::ThreadRegistry;
use super::runner::{Task, TaskRunner};
use super::thread_id::{TaskTraits, ThreadId};

/// Runner for one logical thread that defers to the registry on every post.
pub struct ProxyTaskRunner {
    id: ThreadId,
    registry: Arc<ThreadRegistry>,
}

impl ProxyTaskRunner {
    fn new(id: ThreadId, registry: Arc<ThreadRegistry>) -> Self {
        Self { id, registry }
    }

    pub fn thread(&self) -> ThreadId {
        self.id
    }
}

impl TaskRunner for ProxyTaskRunner {
    fn post_delayed_task(&self, task: Task, delay: Duration) -> bool {
        self.registry.post(self.id, task, delay, true)
    }

    fn post_non_nestable_delayed_task(&self, task: Task, delay: Duration) -> bool {
        self.registry.post(self.id, task, delay, false)
    }

    fn runs_tasks_in_current_sequence(&self) -> bool {
        self.registry.currently_on(self.id)
    }
}

#[derive(Default)]
struct AfterStartup {
    complete: bool,
    queued: Vec<(TaskTraits, Task)>,
}

/// Posts tasks onto logical threads.
pub struct TaskExecutor {
    registry: Arc<ThreadRegistry>,
    proxies: [OnceLock<Arc<ProxyTaskRunner>>; ThreadId::COUNT],
    after_startup: Mutex<AfterStartup>,
}

impl TaskExecutor {
    pub fn new(registry: Arc<ThreadRegistry>) -> Self {
        Self {
            registry,
            proxies: std::array::from_fn(|_| OnceLock::new()),
            after_startup: Mutex::new(AfterStartup::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    pub fn post_task<F>(&self, traits: TaskTraits, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed_task(traits, task, Duration::ZERO)
    }

    pub fn post_delayed_task<F>(&self, traits: TaskTraits, task: F, delay: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_boxed(traits, Box::new(task), delay)
    }

    /// Runner that posts with `traits`. Valid before the thread is registered.
    pub fn create_task_runner(&self, traits: TaskTraits) -> Arc<dyn TaskRunner> {
        self.proxy(traits.thread)
    }

    /// Hold `task` until startup completes, then post it normally.
    pub fn post_after_startup_task<F>(&self, traits: TaskTraits, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut after = self.after_startup.lock().unwrap_or_else(|e| e.into_inner());
        if after.complete {
            drop(after);
            return self.post_task(traits, task);
        }
        after.queued.push((traits, Box::new(task)));
        true
    }

    /// Release tasks held by [`post_after_startup_task`](Self::post_after_startup_task), in post order.
    pub fn mark_startup_complete(&self) {
        let queued = {
            let mut after = self.after_startup.lock().unwrap_or_else(|e| e.into_inner());
            if after.complete {
                return;
            }
            after.complete = true;
            std::mem::take(&mut after.queued)
        };
        debug!("Startup complete; releasing {} deferred tasks", queued.len());
        for (traits, task) in queued {
            self.post_boxed(traits, task, Duration::ZERO);
        }
    }

    pub fn is_startup_complete(&self) -> bool {
        self.after_startup.lock().unwrap_or_else(|e| e.into_inner()).complete
    }

    pub fn currently_on(&self, id: ThreadId) -> bool {
        self.registry.currently_on(id)
    }

    fn post_boxed(&self, traits: TaskTraits, task: Task, delay: Duration) -> bool {
        let runner = self.proxy(traits.thread);
        if traits.nestable {
            runner.post_delayed_task(task, delay)
        } else {
            runner.post_non_nestable_delayed_task(task, delay)
        }
    }

    fn proxy(&self, id: ThreadId) -> Arc<ProxyTaskRunner> {
        self.proxies[id.index()]
            .get_or_init(|| Arc::new(ProxyTaskRunner::new(id, self.registry.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading::ManualTaskRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_post_task_reaches_registered_runner() {
        let registry = Arc::new(ThreadRegistry::new());
        let executor = TaskExecutor::new(registry.clone());
        let io = ManualTaskRunner::new();
        registry.register_thread(ThreadId::Io, io.clone()).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(executor.post_task(TaskTraits::io(), counting_task(&counter)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        io.run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_runner_captured_before_registration() {
        let registry = Arc::new(ThreadRegistry::new());
        let executor = TaskExecutor::new(registry.clone());
        let runner = executor.create_task_runner(TaskTraits::ui());

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(!runner.post_task(Box::new(counting_task(&counter))));

        let ui = ManualTaskRunner::new();
        registry.register_thread(ThreadId::Ui, ui.clone()).unwrap();
        assert!(runner.post_task(Box::new(counting_task(&counter))));
        ui.run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_proxy_is_built_once_per_thread() {
        let executor = TaskExecutor::new(Arc::new(ThreadRegistry::new()));
        let a = executor.proxy(ThreadId::Io);
        let b = executor.proxy(ThreadId::Io);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.thread(), ThreadId::Io);
    }

    #[test]
    fn test_post_after_shutdown_does_not_run() {
        let registry = Arc::new(ThreadRegistry::new());
        let executor = TaskExecutor::new(registry.clone());
        let ui = ManualTaskRunner::new();
        registry.register_thread(ThreadId::Ui, ui.clone()).unwrap();
        registry.mark_shutdown(ThreadId::Ui).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(!executor.post_task(TaskTraits::ui(), counting_task(&counter)));
        ui.run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_nestable_trait_is_honored() {
        let registry = Arc::new(ThreadRegistry::new());
        let executor = Arc::new(TaskExecutor::new(registry.clone()));
        let ui = ManualTaskRunner::new();
        registry.register_thread(ThreadId::Ui, ui.clone()).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let inner_executor = executor.clone();
        let inner_ui = ui.clone();
        let inner_order = order.clone();
        executor.post_task(TaskTraits::ui(), move || {
            let o = inner_order.clone();
            inner_executor.post_task(TaskTraits::ui().non_nestable(), move || o.lock().unwrap().push("non-nestable"));
            let o = inner_order.clone();
            inner_executor.post_task(TaskTraits::ui(), move || o.lock().unwrap().push("nestable"));
            inner_ui.run_until_idle();
        });

        ui.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec!["nestable", "non-nestable"]);
    }

    #[test]
    fn test_after_startup_tasks_held_until_complete() {
        let registry = Arc::new(ThreadRegistry::new());
        let executor = TaskExecutor::new(registry.clone());
        let ui = ManualTaskRunner::new();
        registry.register_thread(ThreadId::Ui, ui.clone()).unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        executor.post_after_startup_task(TaskTraits::ui(), counting_task(&counter));
        ui.run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!executor.is_startup_complete());

        executor.mark_startup_complete();
        ui.run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        executor.post_after_startup_task(TaskTraits::ui(), counting_task(&counter));
        ui.run_until_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

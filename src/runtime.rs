//! Threaded wiring around the orchestrator.
//!
//! [`HostRuntime`] starts the UI and IO logical threads, binds the
//! [`Orchestrator`] to UI, and routes IO-side events back to it through a
//! [`UiEventSink`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::channel::BootstrapBroker;
use crate::config::Config;
use crate::error::{HostError, Result};
use crate::host::{EmbedderPolicy, HostEvent, HostEventSink, HostHandle, HostServices};
use crate::launch::ProcessLauncher;
use crate::orchestrator::Orchestrator;
use crate::service::ServiceDirectory;
use crate::threading::{
    SequenceBound, SequenceThread, StartupTaskRunner, TaskExecutor, TaskRunner, TaskTraits, ThreadId,
    ThreadRegistry, WeakSequenceBound,
};

/// Builds the process launcher once the IO thread and broker exist.
pub type LauncherFactory = Box<dyn FnOnce(Arc<TaskExecutor>, Arc<BootstrapBroker>) -> Arc<dyn ProcessLauncher>>;

/// Re-posts every event onto the UI thread.
///
/// Bound to the orchestrator after construction, since the orchestrator
/// needs the sink first. Events posted before binding are dropped.
pub struct UiEventSink {
    executor: Arc<TaskExecutor>,
    orchestrator: OnceLock<WeakSequenceBound<Orchestrator>>,
}

impl UiEventSink {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self {
            executor,
            orchestrator: OnceLock::new(),
        }
    }

    pub fn bind(&self, orchestrator: WeakSequenceBound<Orchestrator>) -> bool {
        self.orchestrator.set(orchestrator).is_ok()
    }

    fn deliver(&self, event: HostEvent, delay: Duration) {
        let Some(target) = self.orchestrator.get().cloned() else {
            warn!("Dropping {} event: sink not bound", event.name());
            return;
        };
        let name = event.name();
        let posted = self.executor.post_delayed_task(
            TaskTraits::ui(),
            move || {
                if let Some(orchestrator) = target.upgrade() {
                    orchestrator.with(|o| o.handle_event(event));
                }
            },
            delay,
        );
        if !posted {
            debug!("UI thread gone; dropped {} event", name);
        }
    }
}

impl HostEventSink for UiEventSink {
    fn post(&self, event: HostEvent) {
        self.deliver(event, Duration::ZERO);
    }

    fn post_delayed(&self, event: HostEvent, delay: Duration) {
        self.deliver(event, delay);
    }
}

/// Reports a malformed message seen off the UI thread.
///
/// Holds only a weak orchestrator handle. Reporting from any thread other
/// than UI re-posts the report to UI first. On UI it must not be called
/// from inside an orchestrator callback.
#[derive(Clone)]
pub struct BadMessageReporter {
    orchestrator: WeakSequenceBound<Orchestrator>,
    host: HostHandle,
}

impl BadMessageReporter {
    pub fn new(orchestrator: WeakSequenceBound<Orchestrator>, host: HostHandle) -> Self {
        Self { orchestrator, host }
    }

    pub fn host(&self) -> HostHandle {
        self.host
    }

    pub fn report(self, reason: &str) {
        let runner = self.orchestrator.runner().clone();
        if !runner.runs_tasks_in_current_sequence() {
            let reason = reason.to_string();
            if !runner.post_task(Box::new(move || self.report(&reason))) {
                debug!("UI thread gone; bad message report dropped");
            }
            return;
        }
        match self.orchestrator.upgrade() {
            Some(orchestrator) => orchestrator.with(|o| o.report_bad_message(self.host, reason)),
            None => debug!("Orchestrator gone; bad message from {} ignored", self.host),
        }
    }
}

pub struct HostRuntime {
    threads: Arc<ThreadRegistry>,
    executor: Arc<TaskExecutor>,
    ui: Arc<SequenceThread>,
    io: Arc<SequenceThread>,
    broker: Arc<BootstrapBroker>,
    orchestrator: SequenceBound<Orchestrator>,
}

impl HostRuntime {
    /// Start both threads and the orchestrator.
    ///
    /// Startup services are bound on UI as the first startup step; tasks
    /// posted with [`TaskExecutor::post_after_startup_task`] run after it.
    pub fn start(config: &Config, launcher: LauncherFactory, policy: Arc<dyn EmbedderPolicy>) -> Result<Self> {
        let directory = ServiceDirectory::from_config(&config.services)?;

        let threads = Arc::new(ThreadRegistry::new());
        let executor = Arc::new(TaskExecutor::new(threads.clone()));
        let ui = SequenceThread::start(ThreadId::Ui.name())?;
        let io = SequenceThread::start(ThreadId::Io.name())?;
        threads.register_thread(ThreadId::Ui, ui.clone())?;
        threads.register_thread(ThreadId::Io, io.clone())?;

        let broker = Arc::new(BootstrapBroker::new());
        let sink = Arc::new(UiEventSink::new(executor.clone()));
        let launcher = launcher(executor.clone(), broker.clone());
        let services = Arc::new(
            HostServices::new(config.host_config(), launcher, broker.clone(), sink.clone()).with_policy(policy),
        );
        let orchestrator = SequenceBound::new(
            Orchestrator::new(services, config.spare_config()).with_directory(directory),
            executor.create_task_runner(TaskTraits::ui()),
        );
        sink.bind(orchestrator.downgrade());

        let mut startup = StartupTaskRunner::new(executor.create_task_runner(TaskTraits::ui()));
        let target = orchestrator.downgrade();
        startup.add_task("launch_startup_services", move || {
            let orchestrator = target
                .upgrade()
                .ok_or_else(|| HostError::InvalidState("orchestrator dropped during startup".to_string()))?;
            let bound = orchestrator.with(|o| o.launch_startup_services());
            info!("Launched {} startup services", bound.len());
            Ok(())
        });
        let release = executor.clone();
        startup.set_on_complete(move |ok| {
            if !ok {
                warn!("Startup did not complete cleanly");
            }
            release.mark_startup_complete();
        });
        startup.start_running_tasks_async();

        info!("Host runtime started");
        Ok(Self {
            threads,
            executor,
            ui,
            io,
            broker,
            orchestrator,
        })
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn threads(&self) -> &Arc<ThreadRegistry> {
        &self.threads
    }

    pub fn broker(&self) -> &Arc<BootstrapBroker> {
        &self.broker
    }

    pub fn orchestrator(&self) -> &SequenceBound<Orchestrator> {
        &self.orchestrator
    }

    pub fn bad_message_reporter(&self, host: HostHandle) -> BadMessageReporter {
        BadMessageReporter::new(self.orchestrator.downgrade(), host)
    }

    /// Run `f` on the UI thread and wait for its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Orchestrator) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let posted = self.orchestrator.post(move |o| {
            let _ = tx.send(f(o));
        });
        if !posted {
            return Err(HostError::Thread("UI thread is not running".to_string()));
        }
        rx.await
            .map_err(|_| HostError::Thread("UI thread dropped the call".to_string()))
    }

    /// Kill every worker, then stop UI and IO.
    ///
    /// Blocks until both threads have exited.
    pub fn shutdown(self) {
        info!("Host runtime shutting down");
        self.orchestrator.post(|o| o.terminate_all());
        for (id, thread) in [(ThreadId::Ui, &self.ui), (ThreadId::Io, &self.io)] {
            if let Err(e) = self.threads.mark_shutdown(id) {
                warn!("Failed to mark {} shut down: {}", id, e);
            }
            thread.stop();
        }
        debug!("Host runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfig, ServicePolicyKind};
    use crate::host::DefaultEmbedderPolicy;
    use crate::orchestrator::HostRequest;
    use crate::testing::FakeLauncher;
    use std::time::Instant;

    fn start(config: &Config) -> (HostRuntime, Arc<FakeLauncher>) {
        let slot: Arc<OnceLock<Arc<FakeLauncher>>> = Arc::new(OnceLock::new());
        let captured = slot.clone();
        let runtime = HostRuntime::start(
            config,
            Box::new(move |_: Arc<TaskExecutor>, broker: Arc<BootstrapBroker>| {
                let launcher = FakeLauncher::auto(broker);
                let _ = captured.set(launcher.clone());
                launcher as Arc<dyn ProcessLauncher>
            }),
            Arc::new(DefaultEmbedderPolicy),
        )
        .unwrap();
        let launcher = slot.get().cloned().unwrap();
        (runtime, launcher)
    }

    async fn wait_until<F>(runtime: &HostRuntime, check: F) -> bool
    where
        F: Fn(&mut Orchestrator) -> bool + Send + Sync + Clone + 'static,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if runtime.call(check.clone()).await.unwrap_or(false) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_host_becomes_ready_on_ui_thread() {
        let (runtime, launcher) = start(&Config::default());
        let id = runtime
            .call(|o| {
                let context = o.create_context();
                o.get_process_host(&HostRequest::new(context))
            })
            .await
            .unwrap()
            .unwrap();

        assert!(wait_until(&runtime, move |o| o.host(id).is_some_and(|h| h.is_ready())).await);
        assert_eq!(launcher.launch_count(), 1);
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_bad_message_reported_from_io_thread() {
        let (runtime, launcher) = start(&Config::default());
        let id = runtime
            .call(|o| {
                let context = o.create_context();
                o.get_process_host(&HostRequest::new(context))
            })
            .await
            .unwrap()
            .unwrap();
        assert!(wait_until(&runtime, move |o| o.host(id).is_some_and(|h| h.is_ready())).await);

        let handle = runtime.call(move |o| o.host(id).map(|h| h.handle())).await.unwrap().unwrap();
        let reporter = runtime.bad_message_reporter(handle);
        runtime
            .executor()
            .post_task(TaskTraits::io(), move || reporter.report("bogus frame"));

        assert!(
            wait_until(&runtime, move |o| o
                .host(id)
                .is_some_and(|h| h.last_bad_message().is_some()))
            .await
        );
        let record = launcher.for_host(id).unwrap();
        assert_eq!(
            record.process.terminated_with(),
            Some(crate::host::RESULT_CODE_KILLED_BAD_MESSAGE)
        );
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_startup_services_bound_before_deferred_tasks() {
        let mut config = Config::default();
        config.services.push(ServiceConfig {
            name: "network".to_string(),
            policy: ServicePolicyKind::Dedicated,
            startup: true,
            ..ServiceConfig::default()
        });
        let (runtime, launcher) = start(&config);

        let (tx, rx) = oneshot::channel();
        let target = runtime.orchestrator().downgrade();
        runtime.executor().post_after_startup_task(TaskTraits::ui(), move || {
            if let Some(o) = target.upgrade() {
                let _ = tx.send(o.with(|o| o.children().len()));
            }
        });

        assert_eq!(rx.await.unwrap(), 1);
        assert!(runtime.executor().is_startup_complete());
        assert_eq!(launcher.launch_count(), 1);
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let (runtime, _) = start(&Config::default());
        let orchestrator = runtime.orchestrator().clone();
        let threads = runtime.threads().clone();
        runtime.shutdown();

        assert!(!threads.is_running(ThreadId::Ui));
        assert!(!orchestrator.post(|_| {}));
    }
}

//! UI-side owner of every host, context and child.
//!
//! The [`Orchestrator`] is a plain `&mut self` state machine. It lives on
//! the UI sequence; events produced on the IO side reach it through
//! [`Orchestrator::handle_event`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::child::{ChildProcessObserver, ChildProcessRegistry};
use crate::error::{HostError, Result};
use crate::host::{
    BadMessageReport, CleanupOutcome, Context, ContextId, HostEvent, HostHandle, HostNotice, HostRegistry,
    HostServices, HostUpdate, KeepAliveClientType, Listener, ObserverId, PriorityClient, PriorityClientId,
    ProcessHost, ProcessHostObserver,
};
use crate::channel::ChannelMessage;
use crate::service::{BindOutcome, ServiceDirectory};
use crate::spare::{SpareConfig, SpareProcessManager};
use crate::threading::Task;

/// What a caller wants a host for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRequest {
    pub context: ContextId,
    pub site: Option<String>,
    /// Must not share a process with anything else, spare included.
    pub exclusive: bool,
}

impl HostRequest {
    pub fn new(context: ContextId) -> Self {
        Self {
            context,
            site: None,
            exclusive: false,
        }
    }

    pub fn with_site(mut self, site: &str) -> Self {
        self.site = Some(site.to_string());
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}

pub struct Orchestrator {
    services: Arc<HostServices>,
    registry: HostRegistry,
    spare: SpareProcessManager,
    contexts: BTreeMap<ContextId, Context>,
    children: ChildProcessRegistry,
    directory: ServiceDirectory,
}

impl Orchestrator {
    pub fn new(services: Arc<HostServices>, spare_config: SpareConfig) -> Self {
        Self {
            registry: HostRegistry::new(services.clone()),
            spare: SpareProcessManager::new(spare_config),
            contexts: BTreeMap::new(),
            children: ChildProcessRegistry::new(services.clone()),
            directory: ServiceDirectory::new(),
            services,
        }
    }

    pub fn with_directory(mut self, directory: ServiceDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn spare(&self) -> &SpareProcessManager {
        &self.spare
    }

    pub fn children(&self) -> &ChildProcessRegistry {
        &self.children
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut ServiceDirectory {
        &mut self.directory
    }

    pub fn host(&self, id: i32) -> Option<&ProcessHost> {
        self.registry.get(id)
    }

    pub fn host_count(&self) -> usize {
        self.registry.len()
    }

    pub fn create_context(&mut self) -> ContextId {
        let id = ContextId::generate();
        self.add_context(id.clone());
        id
    }

    pub fn add_context(&mut self, id: ContextId) {
        debug!("Context {} created", id);
        self.contexts.entry(id.clone()).or_insert_with(|| Context::new(id));
    }

    pub fn context(&self, id: &ContextId) -> Option<&Context> {
        self.contexts.get(id)
    }

    /// Drop a context. Every host bound to it loses its keep-alive.
    pub fn destroy_context(&mut self, id: &ContextId) -> Result<()> {
        if !self.contexts.contains_key(id) {
            return Err(HostError::InvalidState(format!("unknown context {}", id)));
        }
        self.spare.discard_for_context(&mut self.registry, id);
        for host in self.registry.ids_in_context(id) {
            let _ = self
                .registry
                .with_host(host, |h| ((), HostUpdate::cleanup(h.disable_keep_alive_ref_count())));
        }
        self.contexts.remove(id);
        self.process_notices();
        info!("Context {} destroyed", id);
        Ok(())
    }

    /// Find or create a host for `request` and make sure it is launched.
    pub fn get_process_host(&mut self, request: &HostRequest) -> Result<i32> {
        if !self.contexts.contains_key(&request.context) {
            return Err(HostError::InvalidState(format!("unknown context {}", request.context)));
        }
        let per_site = self.services.config.process_per_site;

        let mut chosen = None;
        if per_site {
            if let Some(site) = &request.site {
                chosen = self
                    .contexts
                    .get(&request.context)
                    .and_then(|context| context.find_process(site))
                    .filter(|id| self.registry.get(*id).is_some_and(|h| h.may_reuse_host()));
            }
        }
        if chosen.is_none() && !request.exclusive && self.registry.should_try_to_use_existing() {
            chosen = self.registry.find_existing_host(&request.context);
        }
        if chosen.is_none() {
            chosen = self
                .spare
                .take_or_discard(&mut self.registry, &request.context, request.exclusive)
                .taken();
        }
        let id = match chosen {
            Some(id) => id,
            None => self.registry.create_host(request.context.clone()),
        };

        if per_site {
            if let (Some(site), Some(context)) = (&request.site, self.contexts.get_mut(&request.context)) {
                context.register_process(site, id);
            }
        }
        self.spare.prepare_for_future_requests(&mut self.registry, &request.context);

        let result = self.registry.with_host(id, |host| {
            host.set_is_used();
            (host.init(), HostUpdate::default())
        });
        self.process_notices();
        result??;
        tracing::debug!(host_id = id, context = %request.context, "Host assigned");
        Ok(id)
    }

    pub fn warmup_spare(&mut self, context: &ContextId) -> Option<i32> {
        let id = self.spare.warmup(&mut self.registry, context);
        self.process_notices();
        id
    }

    pub fn spare_host(&self) -> Option<i32> {
        self.spare.spare_host()
    }

    /// Override the live host limit. Discards the spare when over it.
    pub fn set_max_process_count(&mut self, count: usize) {
        self.registry.set_max_process_count(count);
        if self.registry.len() > self.registry.max_process_count() {
            self.spare.discard(&mut self.registry);
            self.process_notices();
        }
        info!("Max process count set to {}", self.registry.max_process_count());
    }

    pub fn max_process_count(&self) -> usize {
        self.registry.max_process_count()
    }

    /// Relaunch a host whose process died.
    pub fn init_host(&mut self, id: i32) -> Result<()> {
        self.registry.with_host(id, |h| (h.init(), HostUpdate::default()))?
    }

    pub fn add_observer(&mut self, id: i32, observer: Arc<dyn ProcessHostObserver>) -> Result<ObserverId> {
        self.registry.with_host(id, |h| (h.add_observer(observer), HostUpdate::default()))
    }

    pub fn add_child_observer(&mut self, observer: Arc<dyn ChildProcessObserver>) -> ObserverId {
        self.children.add_observer(observer)
    }

    pub fn add_route(&mut self, id: i32, routing_id: i32, listener: Arc<dyn Listener>) -> Result<()> {
        self.registry
            .with_host(id, |h| (h.add_route(routing_id, listener), HostUpdate::default()))
    }

    pub fn remove_route(&mut self, id: i32, routing_id: i32) -> Result<CleanupOutcome> {
        self.with_cleanup(id, |h| h.remove_route(routing_id))
    }

    pub fn increment_keep_alive(&mut self, id: i32, client: KeepAliveClientType) -> Result<()> {
        self.registry
            .with_host(id, |h| (h.increment_keep_alive_ref_count(client), HostUpdate::default()))
    }

    pub fn decrement_keep_alive(&mut self, id: i32, client: KeepAliveClientType) -> Result<CleanupOutcome> {
        self.with_cleanup(id, |h| h.decrement_keep_alive_ref_count(client))
    }

    pub fn disable_keep_alive(&mut self, id: i32) -> Result<CleanupOutcome> {
        self.with_cleanup(id, |h| h.disable_keep_alive_ref_count())
    }

    pub fn delay_process_shutdown_for_unload(&mut self, id: i32, timeout: Duration) -> Result<bool> {
        self.registry.with_host(id, |h| {
            (h.delay_process_shutdown_for_unload(timeout), HostUpdate::default())
        })
    }

    pub fn cleanup(&mut self, id: i32) -> Result<CleanupOutcome> {
        self.with_cleanup(id, |h| h.cleanup())
    }

    pub fn add_priority_client(&mut self, id: i32, client: Arc<dyn PriorityClient>) -> Result<PriorityClientId> {
        self.registry
            .with_host(id, |h| (h.add_priority_client(client), HostUpdate::default()))
    }

    pub fn remove_priority_client(&mut self, id: i32, client: PriorityClientId) -> Result<bool> {
        self.registry
            .with_host(id, |h| (h.remove_priority_client(client), HostUpdate::default()))
    }

    pub fn update_client_priority(&mut self, id: i32) -> Result<()> {
        self.registry
            .with_host(id, |h| (h.update_client_priority(), HostUpdate::default()))
    }

    pub fn send(&mut self, id: i32, message: &ChannelMessage) -> Result<bool> {
        self.registry.with_host(id, |h| (h.send(message), HostUpdate::default()))
    }

    pub fn shutdown(&mut self, id: i32, exit_code: i32) -> Result<bool> {
        self.registry.with_host(id, |h| (h.shutdown(exit_code), HostUpdate::default()))
    }

    pub fn shutdown_for_bad_message(&mut self, id: i32, reason: &str) -> Result<Option<BadMessageReport>> {
        self.registry
            .with_host(id, |h| (h.shutdown_for_bad_message(reason), HostUpdate::default()))
    }

    /// Returns whether the host was shut down.
    pub fn fast_shutdown_if_possible(&mut self, id: i32, skip_unload: bool) -> Result<bool> {
        let result = self.registry.with_host(id, |h| match h.fast_shutdown_if_possible(skip_unload) {
            Some(update) => (true, update),
            None => (false, HostUpdate::default()),
        });
        self.process_notices();
        result
    }

    pub fn set_never_reusable(&mut self, id: i32) -> Result<()> {
        self.registry
            .with_host(id, |h| (h.set_never_reusable(), HostUpdate::default()))
    }

    /// Run `task` once host `id` is ready. False if the host is gone.
    pub fn post_task_when_process_is_ready(&mut self, id: i32, task: Task) -> bool {
        match self.registry.get_mut(id) {
            Some(host) => host.post_task_when_ready(task),
            None => false,
        }
    }

    pub fn bind_service(&mut self, name: &str) -> Result<BindOutcome> {
        self.directory.bind(&mut self.children, name)
    }

    /// Bind every service marked for startup. Failures are logged.
    pub fn launch_startup_services(&mut self) -> Vec<(String, BindOutcome)> {
        let mut bound = Vec::new();
        for name in self.directory.startup_services() {
            match self.bind_service(&name) {
                Ok(outcome) => bound.push((name, outcome)),
                Err(e) => warn!("Startup service '{}' failed: {}", name, e),
            }
        }
        bound
    }

    /// Report a malformed message from the IO side.
    pub fn report_bad_message(&mut self, host: HostHandle, reason: &str) {
        self.handle_event(HostEvent::BadMessage {
            host,
            reason: reason.to_string(),
        });
    }

    /// Apply one event from the IO side.
    pub fn handle_event(&mut self, event: HostEvent) {
        let name = event.name();
        match event.host() {
            Some(handle) => tracing::trace!(host_id = handle.id, launch = handle.launch, event = name, "Host event"),
            None => tracing::trace!(event = name, "Host event"),
        }

        let claimed = match event.host() {
            Some(handle) if !self.registry.contains(handle.id) && self.children.is_alive(handle.id) => {
                self.children.handle_event(event)
            }
            _ => self.registry.handle_event(event),
        };
        if !claimed {
            debug!("No host for {} event", name);
        }
        self.process_notices();
    }

    pub fn run_deferred_deletions(&mut self) -> usize {
        self.registry.run_deferred_deletions()
    }

    /// Kill every process. Used on runtime shutdown.
    pub fn terminate_all(&mut self) {
        self.spare.discard(&mut self.registry);
        for id in self.registry.ids() {
            let _ = self.registry.with_host(id, |h| {
                h.shutdown(crate::host::RESULT_CODE_NORMAL_EXIT);
                ((), HostUpdate::default())
            });
        }
        self.children.terminate_all();
        self.process_notices();
    }

    fn with_cleanup(&mut self, id: i32, f: impl FnOnce(&mut ProcessHost) -> CleanupOutcome) -> Result<CleanupOutcome> {
        let result = self.registry.with_host(id, |h| {
            let outcome = f(h);
            (outcome, HostUpdate::cleanup(outcome))
        });
        self.process_notices();
        result
    }

    fn process_notices(&mut self) {
        loop {
            let notices = self.registry.take_notices();
            if notices.is_empty() {
                break;
            }
            for notice in notices {
                match notice {
                    HostNotice::Exited(id, info) => {
                        tracing::info!(host_id = id, status = ?info.status, exit_code = info.exit_code, "Host exited");
                        self.spare.on_host_exited(&mut self.registry, id);
                    }
                    HostNotice::Destroyed(id) => {
                        tracing::debug!(host_id = id, "Host destroyed");
                        self.spare.on_host_destroyed(id);
                        for context in self.contexts.values_mut() {
                            context.remove_process(id);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BootstrapBroker;
    use crate::host::{
        ClientPriority, HostConfig, QueuedEventSink, TerminationInfo, TerminationStatus,
    };
    use crate::testing::{FakeLauncher, ObservedEvent, RecordingListener, RecordingObserver, StaticPriorityClient};

    struct Harness {
        sink: Arc<QueuedEventSink>,
        launcher: Arc<FakeLauncher>,
        orchestrator: Orchestrator,
    }

    impl Harness {
        fn new(config: HostConfig, spare: SpareConfig) -> Self {
            let sink = Arc::new(QueuedEventSink::new());
            let broker = Arc::new(BootstrapBroker::new());
            let launcher = FakeLauncher::auto(broker.clone());
            let services = Arc::new(HostServices::new(config, launcher.clone(), broker, sink.clone()));
            Self {
                sink,
                launcher,
                orchestrator: Orchestrator::new(services, spare),
            }
        }

        fn pump(&mut self) {
            while let Some(event) = self.sink.pop() {
                self.orchestrator.handle_event(event);
            }
        }
    }

    fn default_harness() -> Harness {
        Harness::new(HostConfig::default(), SpareConfig::default())
    }

    #[test]
    fn test_request_without_spare_creates_host() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let id = h.orchestrator.get_process_host(&HostRequest::new(context)).unwrap();
        h.pump();

        let host = h.orchestrator.host(id).unwrap();
        assert!(host.is_ready());
        assert!(!host.is_unused());
        assert_eq!(h.launcher.launch_count(), 1);
        assert_eq!(h.orchestrator.spare().stats().missed, 1);
    }

    #[test]
    fn test_launch_failure_never_ready() {
        let sink = Arc::new(QueuedEventSink::new());
        let broker = Arc::new(BootstrapBroker::new());
        let launcher = FakeLauncher::new();
        let services = Arc::new(HostServices::new(HostConfig::default(), launcher.clone(), broker, sink.clone()));
        let mut orchestrator = Orchestrator::new(services, SpareConfig::default());
        let context = orchestrator.create_context();

        let id = orchestrator.get_process_host(&HostRequest::new(context)).unwrap();
        let observer = RecordingObserver::new();
        orchestrator.add_observer(id, observer.clone()).unwrap();
        launcher.last().unwrap().reporter.launch_failed(1);
        while let Some(event) = sink.pop() {
            orchestrator.handle_event(event);
        }

        assert_eq!(
            observer.events(),
            vec![ObservedEvent::Exited(id, TerminationStatus::LaunchFailed)]
        );
        assert_eq!(orchestrator.host(id).unwrap().state(), crate::host::HostState::Dead);
    }

    #[test]
    fn test_spare_used_for_matching_context() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let spare = h.orchestrator.warmup_spare(&context).unwrap();
        h.pump();

        let id = h.orchestrator.get_process_host(&HostRequest::new(context)).unwrap();
        assert_eq!(id, spare);
        assert_eq!(h.launcher.launch_count(), 1);
        assert_eq!(h.orchestrator.spare_host(), None);
    }

    #[test]
    fn test_spare_for_other_context_discarded() {
        let mut h = default_harness();
        let a = h.orchestrator.create_context();
        let b = h.orchestrator.create_context();
        let spare = h.orchestrator.warmup_spare(&a).unwrap();

        let id = h.orchestrator.get_process_host(&HostRequest::new(b.clone())).unwrap();
        assert_ne!(id, spare);
        assert!(h.orchestrator.host(spare).is_none());
        assert_eq!(h.orchestrator.host(id).unwrap().context(), &b);
        h.pump();
        assert_eq!(h.orchestrator.registry().pending_deletion_count(), 0);
    }

    #[test]
    fn test_keep_spare_rewarms_after_request() {
        let mut h = Harness::new(HostConfig::default(), SpareConfig::default().with_keep_spare_at_all_times(true));
        let context = h.orchestrator.create_context();
        let id = h.orchestrator.get_process_host(&HostRequest::new(context.clone())).unwrap();

        let spare = h.orchestrator.spare_host().unwrap();
        assert_ne!(spare, id);
        assert_eq!(h.orchestrator.spare().spare_context(), Some(&context));
    }

    #[test]
    fn test_process_per_site_reuses_site_host() {
        let mut h = Harness::new(HostConfig::default().with_process_per_site(true), SpareConfig::default());
        let context = h.orchestrator.create_context();
        let request = HostRequest::new(context.clone()).with_site("https://example.com");
        let first = h.orchestrator.get_process_host(&request).unwrap();
        let second = h.orchestrator.get_process_host(&request).unwrap();
        let other = h
            .orchestrator
            .get_process_host(&HostRequest::new(context.clone()).with_site("https://other.org"))
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(h.orchestrator.context(&context).unwrap().site_count(), 2);
    }

    #[test]
    fn test_existing_host_reused_at_limit() {
        let mut h = default_harness();
        h.orchestrator.set_max_process_count(3);
        let context = h.orchestrator.create_context();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(h.orchestrator.get_process_host(&HostRequest::new(context.clone())).unwrap());
        }
        h.pump();

        let reused = h.orchestrator.get_process_host(&HostRequest::new(context.clone())).unwrap();
        assert!(ids.contains(&reused));
        assert_eq!(h.orchestrator.host_count(), 3);

        let exclusive = h
            .orchestrator
            .get_process_host(&HostRequest::new(context).with_exclusive(true))
            .unwrap();
        assert!(!ids.contains(&exclusive));
    }

    #[test]
    fn test_lowering_limit_discards_spare() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        for _ in 0..3 {
            h.orchestrator.get_process_host(&HostRequest::new(context.clone())).unwrap();
        }
        h.orchestrator.warmup_spare(&context).unwrap();
        h.orchestrator.set_max_process_count(3);
        assert_eq!(h.orchestrator.spare_host(), None);
        assert_eq!(h.orchestrator.host_count(), 3);
    }

    #[test]
    fn test_destroy_context_releases_keep_alive() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let id = h.orchestrator.get_process_host(&HostRequest::new(context.clone())).unwrap();
        h.orchestrator
            .increment_keep_alive(id, KeepAliveClientType::ServiceWorker)
            .unwrap();
        h.pump();

        h.orchestrator.destroy_context(&context).unwrap();
        assert!(h.orchestrator.host(id).is_none());
        assert!(h.orchestrator.context(&context).is_none());
        assert!(h.orchestrator.destroy_context(&context).is_err());
        assert!(h.orchestrator.get_process_host(&HostRequest::new(context)).is_err());
    }

    #[test]
    fn test_route_lifecycle_and_teardown() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let id = h.orchestrator.get_process_host(&HostRequest::new(context)).unwrap();
        h.pump();

        let listener = RecordingListener::new();
        h.orchestrator.add_route(id, 10, listener.clone()).unwrap();
        let client = StaticPriorityClient::new(ClientPriority::visible(0));
        let client_id = h.orchestrator.add_priority_client(id, client).unwrap();
        assert!(!h.orchestrator.host(id).unwrap().priority().is_background());
        h.orchestrator.remove_priority_client(id, client_id).unwrap();

        let handle = h.orchestrator.host(id).unwrap().handle();
        h.orchestrator.handle_event(HostEvent::MessageReceived {
            host: handle,
            message: ChannelMessage::new(10, "paint"),
        });
        assert_eq!(listener.messages().len(), 1);

        assert_eq!(h.orchestrator.remove_route(id, 10).unwrap(), CleanupOutcome::DeleteSoon);
        assert!(h.orchestrator.host(id).is_none());
        assert!(matches!(h.orchestrator.remove_route(id, 10), Err(HostError::HostNotFound(_))));
    }

    #[test]
    fn test_spare_death_drops_spare() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let spare = h.orchestrator.warmup_spare(&context).unwrap();
        h.pump();

        let handle = h.orchestrator.host(spare).unwrap().handle();
        h.orchestrator.handle_event(HostEvent::ProcessExited {
            host: handle,
            info: TerminationInfo::new(TerminationStatus::ProcessCrashed, 1),
        });
        assert_eq!(h.orchestrator.spare_host(), None);
        assert!(h.orchestrator.host(spare).is_none());
    }

    #[test]
    fn test_respawn_after_death() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let id = h.orchestrator.get_process_host(&HostRequest::new(context)).unwrap();
        h.orchestrator.add_route(id, 1, RecordingListener::new()).unwrap();
        h.pump();

        let handle = h.orchestrator.host(id).unwrap().handle();
        h.orchestrator.handle_event(HostEvent::ChannelError { host: handle });
        assert!(!h.orchestrator.host(id).unwrap().is_initialized_and_not_dead());

        h.orchestrator.init_host(id).unwrap();
        h.pump();
        assert!(h.orchestrator.host(id).unwrap().is_ready());
        assert_eq!(h.launcher.launch_count(), 2);
    }

    #[test]
    fn test_post_task_when_process_is_ready() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let id = h.orchestrator.get_process_host(&HostRequest::new(context)).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        assert!(h.orchestrator.post_task_when_process_is_ready(id, Box::new(move || tx.send(()).unwrap())));
        assert!(rx.try_recv().is_err());
        h.pump();
        assert!(rx.try_recv().is_ok());
        assert!(!h.orchestrator.post_task_when_process_is_ready(999, Box::new(|| {})));
    }

    #[test]
    fn test_fast_shutdown_through_orchestrator() {
        let mut h = default_harness();
        let context = h.orchestrator.create_context();
        let id = h.orchestrator.get_process_host(&HostRequest::new(context)).unwrap();
        h.pump();
        assert!(h.orchestrator.fast_shutdown_if_possible(id, false).unwrap());
        assert!(!h.orchestrator.host(id).unwrap().is_initialized_and_not_dead());
    }
}

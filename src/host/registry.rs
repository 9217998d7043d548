//! The id → host table.
//!
//! [`HostRegistry`] owns every live [`ProcessHost`]. Hosts that finish
//! cleanup are unregistered right away and parked until a
//! [`HostEvent::DeferredDeletion`] task drops them, so nothing is destroyed
//! inside a call that started on the host itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use rand::seq::IndexedRandom;

use super::config::MIN_PROCESS_COUNT;
use super::context::ContextId;
use super::events::HostEvent;
use super::process_host::{CleanupOutcome, HostUpdate, ProcessHost};
use super::services::HostServices;
use super::state::TerminationInfo;
use crate::error::{HostError, Result};

/// Something the registry's owner should react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostNotice {
    Exited(i32, TerminationInfo),
    /// Unregistered and waiting to be dropped.
    Destroyed(i32),
}

pub struct HostRegistry {
    services: Arc<HostServices>,
    hosts: BTreeMap<i32, ProcessHost>,
    pending_deletion: Vec<ProcessHost>,
    max_process_count: usize,
    notices: Vec<HostNotice>,
}

impl HostRegistry {
    pub fn new(services: Arc<HostServices>) -> Self {
        let max_process_count = services.config.max_process_count.max(MIN_PROCESS_COUNT);
        Self {
            services,
            hosts: BTreeMap::new(),
            pending_deletion: Vec::new(),
            max_process_count,
            notices: Vec::new(),
        }
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    /// Construct and register a host. It is not launched.
    pub fn create_host(&mut self, context: ContextId) -> i32 {
        let id = self.services.ids.next_id();
        debug!("Creating host {} in context {}", id, context);
        self.hosts.insert(id, ProcessHost::new(id, context, self.services.clone()));
        id
    }

    pub fn get(&self, id: i32) -> Option<&ProcessHost> {
        self.hosts.get(&id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut ProcessHost> {
        self.hosts.get_mut(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.hosts.contains_key(&id)
    }

    /// Number of registered hosts, spare included.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.hosts.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessHost> {
        self.hosts.values()
    }

    pub fn ids_in_context(&self, context: &ContextId) -> Vec<i32> {
        self.hosts
            .values()
            .filter(|host| host.context() == context)
            .map(|host| host.id())
            .collect()
    }

    /// Run `f` on host `id` and apply whatever it reports.
    pub fn with_host<R>(&mut self, id: i32, f: impl FnOnce(&mut ProcessHost) -> (R, HostUpdate)) -> Result<R> {
        let host = self.hosts.get_mut(&id).ok_or(HostError::HostNotFound(id))?;
        let (value, update) = f(host);
        self.apply(id, update);
        Ok(value)
    }

    /// Act on a host's report: record an exit, unregister on delete-soon.
    pub fn apply(&mut self, id: i32, update: HostUpdate) {
        if let Some(info) = update.exited {
            self.notices.push(HostNotice::Exited(id, info));
        }
        if update.cleanup == CleanupOutcome::DeleteSoon {
            if let Some(host) = self.hosts.remove(&id) {
                debug!("Host {} unregistered; deletion deferred", id);
                self.pending_deletion.push(host);
                self.notices.push(HostNotice::Destroyed(id));
                self.services.sink.post(HostEvent::DeferredDeletion);
            }
        }
    }

    /// Hand `event` to its host. Returns false if no live host claims it.
    pub fn handle_event(&mut self, event: HostEvent) -> bool {
        if let HostEvent::DeferredDeletion = event {
            self.run_deferred_deletions();
            return true;
        }
        let Some(handle) = event.host() else {
            return false;
        };
        match self.hosts.get_mut(&handle.id) {
            Some(host) => {
                let update = host.handle_event(event);
                self.apply(handle.id, update);
                true
            }
            None => {
                if self.pending_deletion.iter().any(|h| h.id() == handle.id) {
                    debug!("Dropping {} for host {} pending deletion", event.name(), handle.id);
                    if let HostEvent::ChannelConnected { mut transport, .. } = event {
                        transport.close();
                    }
                    return true;
                }
                false
            }
        }
    }

    /// Drop every host that finished cleanup.
    pub fn run_deferred_deletions(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_deletion);
        let count = pending.len();
        for mut host in pending {
            host.finalize();
        }
        count
    }

    pub fn pending_deletion_count(&self) -> usize {
        self.pending_deletion.len()
    }

    pub fn take_notices(&mut self) -> Vec<HostNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn max_process_count(&self) -> usize {
        self.max_process_count
    }

    /// Override the live host limit. Never below [`MIN_PROCESS_COUNT`].
    pub fn set_max_process_count(&mut self, count: usize) {
        self.max_process_count = count.max(MIN_PROCESS_COUNT);
    }

    /// Whether new requests should share an existing host.
    pub fn should_try_to_use_existing(&self) -> bool {
        self.services.config.single_process || self.hosts.len() >= self.max_process_count
    }

    /// A live, reusable, non-spare host in `context`, picked at random.
    pub fn find_existing_host(&self, context: &ContextId) -> Option<i32> {
        let candidates: Vec<i32> = self
            .hosts
            .values()
            .filter(|host| {
                host.context() == context
                    && host.is_initialized_and_not_dead()
                    && !host.is_spare()
                    && host.may_reuse_host()
            })
            .map(|host| host.id())
            .collect();
        candidates.choose(&mut rand::rng()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BootstrapBroker;
    use crate::host::{HostConfig, QueuedEventSink, TerminationStatus};
    use crate::testing::FakeLauncher;

    fn registry(config: HostConfig) -> (HostRegistry, Arc<QueuedEventSink>, Arc<FakeLauncher>) {
        let sink = Arc::new(QueuedEventSink::new());
        let broker = Arc::new(BootstrapBroker::new());
        let launcher = FakeLauncher::auto(broker.clone());
        let services = Arc::new(HostServices::new(config, launcher.clone(), broker, sink.clone()));
        (HostRegistry::new(services), sink, launcher)
    }

    fn pump(registry: &mut HostRegistry, sink: &QueuedEventSink) {
        while let Some(event) = sink.pop() {
            registry.handle_event(event);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let (mut registry, _, _) = registry(HostConfig::default());
        let context = ContextId::new("a");
        let first = registry.create_host(context.clone());
        let second = registry.create_host(context.clone());
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids_in_context(&context), vec![first, second]);
    }

    #[test]
    fn test_cleanup_defers_deletion() {
        let (mut registry, sink, _) = registry(HostConfig::default());
        let id = registry.create_host(ContextId::new("a"));
        registry.with_host(id, |h| ((), HostUpdate::cleanup(h.cleanup()))).unwrap();

        assert!(!registry.contains(id));
        assert_eq!(registry.pending_deletion_count(), 1);
        assert_eq!(registry.take_notices(), vec![HostNotice::Destroyed(id)]);

        pump(&mut registry, &sink);
        assert_eq!(registry.pending_deletion_count(), 0);
    }

    #[test]
    fn test_events_routed_by_handle() {
        let (mut registry, sink, _) = registry(HostConfig::default());
        let id = registry.create_host(ContextId::new("a"));
        registry.get_mut(id).unwrap().init().unwrap();
        pump(&mut registry, &sink);
        assert!(registry.get(id).unwrap().is_ready());

        let handle = registry.get(id).unwrap().handle();
        assert!(registry.handle_event(HostEvent::ProcessExited {
            host: handle,
            info: TerminationInfo::new(TerminationStatus::ProcessCrashed, 11),
        }));
        assert!(matches!(
            registry.take_notices().as_slice(),
            [HostNotice::Exited(_, info)] if info.status == TerminationStatus::ProcessCrashed
        ));
        assert!(!registry.handle_event(HostEvent::ChannelError {
            host: crate::host::HostHandle::new(999, 1)
        }));
    }

    #[test]
    fn test_unknown_host_is_not_found() {
        let (mut registry, _, _) = registry(HostConfig::default());
        let result = registry.with_host(42, |h| (h.id(), HostUpdate::default()));
        assert!(matches!(result, Err(HostError::HostNotFound(42))));
    }

    #[test]
    fn test_should_try_existing_at_limit() {
        let (mut registry, _, _) = registry(HostConfig::default());
        registry.set_max_process_count(0);
        assert_eq!(registry.max_process_count(), MIN_PROCESS_COUNT);
        for _ in 0..MIN_PROCESS_COUNT {
            assert!(!registry.should_try_to_use_existing());
            registry.create_host(ContextId::new("a"));
        }
        assert!(registry.should_try_to_use_existing());

        let (single, _, _) = registry_single();
        assert!(single.should_try_to_use_existing());
    }

    fn registry_single() -> (HostRegistry, Arc<QueuedEventSink>, Arc<FakeLauncher>) {
        registry(HostConfig::default().with_single_process(true))
    }

    #[test]
    fn test_find_existing_skips_spare_and_dead() {
        let (mut registry, sink, _) = registry(HostConfig::default());
        let context = ContextId::new("a");
        let live = registry.create_host(context.clone());
        let spare = registry.create_host(context.clone());
        let unlaunched = registry.create_host(context.clone());
        let other = registry.create_host(ContextId::new("b"));
        for id in [live, spare, other] {
            registry.get_mut(id).unwrap().init().unwrap();
        }
        registry.get_mut(spare).unwrap().set_is_spare(true);
        pump(&mut registry, &sink);

        assert_eq!(registry.find_existing_host(&context), Some(live));
        assert!(!registry.get(unlaunched).unwrap().is_initialized_and_not_dead());

        registry.get_mut(live).unwrap().set_never_reusable();
        assert_eq!(registry.find_existing_host(&context), None);
    }
}

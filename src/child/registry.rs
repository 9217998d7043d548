//! Every live child host, plus the process-wide child observer list.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use super::data::{ChildProcessHostDelegate, ChildProcessObserver};
use super::generic_host::GenericChildProcessHost;
use crate::error::{HostError, Result};
use crate::host::{HostEvent, HostServices, ObserverId, ObserverList, RESULT_CODE_NORMAL_EXIT};

pub struct ChildProcessRegistry {
    services: Arc<HostServices>,
    children: BTreeMap<i32, GenericChildProcessHost>,
    observers: ObserverList<dyn ChildProcessObserver>,
}

impl ChildProcessRegistry {
    pub fn new(services: Arc<HostServices>) -> Self {
        Self {
            services,
            children: BTreeMap::new(),
            observers: ObserverList::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ChildProcessObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Register a child for `service_name`. It is not launched.
    pub fn create(
        &mut self,
        service_name: &str,
        display_name: &str,
        delegate: Arc<dyn ChildProcessHostDelegate>,
    ) -> i32 {
        let id = self.services.ids.next_id();
        let host = GenericChildProcessHost::new(id, service_name, display_name, self.services.clone(), delegate);
        for observer in self.observers.snapshot() {
            observer.host_created(host.data());
        }
        debug!("Created child {} for {}", id, host.identity());
        self.children.insert(id, host);
        id
    }

    pub fn launch(&mut self, id: i32) -> Result<()> {
        self.from_id_mut(id)?.launch()
    }

    pub fn bind_service(&mut self, id: i32, service_name: &str) -> Result<bool> {
        Ok(self.from_id_mut(id)?.bind_service(service_name))
    }

    pub fn from_id(&self, id: i32) -> Option<&GenericChildProcessHost> {
        self.children.get(&id)
    }

    fn from_id_mut(&mut self, id: i32) -> Result<&mut GenericChildProcessHost> {
        self.children.get_mut(&id).ok_or(HostError::HostNotFound(id))
    }

    pub fn is_alive(&self, id: i32) -> bool {
        self.children.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GenericChildProcessHost> {
        self.children.values()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Route `event` to its child. Returns false if no child claims it.
    pub fn handle_event(&mut self, event: HostEvent) -> bool {
        let Some(handle) = event.host() else {
            return false;
        };
        let observers = self.observers.snapshot();
        let Some(child) = self.children.get_mut(&handle.id) else {
            return false;
        };
        if child.handle() != handle {
            debug!("Child {} dropping stale {}", handle.id, event.name());
            return true;
        }
        if child.handle_event(event, &observers) {
            self.children.remove(&handle.id);
            debug!("Child {} removed", handle.id);
        }
        true
    }

    /// Kill every child and forget them. No exit notifications are sent.
    pub fn terminate_all(&mut self) -> usize {
        let count = self.children.len();
        for (_, mut child) in std::mem::take(&mut self.children) {
            child.terminate(RESULT_CODE_NORMAL_EXIT);
            child.shutdown();
        }
        if count > 0 {
            info!("Terminated {} child processes", count);
        }
        count
    }
}

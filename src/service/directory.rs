//! Service name → launch policy.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::launcher::OutOfProcessLauncher;
use crate::child::ChildProcessRegistry;
use crate::config::ServiceConfig;
use crate::error::{HostError, Result};

/// Where a service runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchPolicy {
    /// In the host process, through a registered factory.
    Embedded,
    /// In a child of its own.
    Dedicated,
    /// In a child shared with every service of the same group.
    Shared { process_group: String },
}

impl fmt::Display for LaunchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchPolicy::Embedded => f.write_str("embedded"),
            LaunchPolicy::Dedicated => f.write_str("dedicated"),
            LaunchPolicy::Shared { process_group } => write!(f, "shared({})", process_group),
        }
    }
}

/// Result of binding a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Embedded,
    Launched(i32),
    Reused(i32),
}

impl BindOutcome {
    pub fn child_id(&self) -> Option<i32> {
        match self {
            BindOutcome::Embedded => None,
            BindOutcome::Launched(id) | BindOutcome::Reused(id) => Some(*id),
        }
    }
}

/// Builds an embedded service when it is bound.
pub type EmbeddedServiceFactory = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct ServiceEntry {
    pub name: String,
    pub display_name: String,
    pub policy: LaunchPolicy,
    pub startup: bool,
    factory: Option<EmbeddedServiceFactory>,
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("policy", &self.policy)
            .field("startup", &self.startup)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ServiceDirectory {
    entries: BTreeMap<String, ServiceEntry>,
    launcher: OutOfProcessLauncher,
}

impl ServiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from configured declarations.
    ///
    /// Embedded declarations have no factory until one is registered.
    pub fn from_config(services: &[ServiceConfig]) -> Result<Self> {
        let mut directory = Self::new();
        for service in services {
            if service.name.is_empty() {
                return Err(HostError::Config("service without a name".to_string()));
            }
            let policy = service.launch_policy()?;
            directory.insert(ServiceEntry {
                name: service.name.clone(),
                display_name: service.display_name().to_string(),
                policy,
                startup: service.startup,
                factory: None,
            });
        }
        Ok(directory)
    }

    pub fn register_embedded(&mut self, name: &str, factory: EmbeddedServiceFactory) {
        let entry = self.entries.entry(name.to_string()).or_insert_with(|| ServiceEntry {
            name: name.to_string(),
            display_name: name.to_string(),
            policy: LaunchPolicy::Embedded,
            startup: false,
            factory: None,
        });
        entry.policy = LaunchPolicy::Embedded;
        entry.factory = Some(factory);
    }

    pub fn register_out_of_process(&mut self, name: &str, display_name: &str, policy: LaunchPolicy) {
        self.insert(ServiceEntry {
            name: name.to_string(),
            display_name: display_name.to_string(),
            policy,
            startup: false,
            factory: None,
        });
    }

    /// Mark `name` for launch at startup.
    pub fn set_startup(&mut self, name: &str, startup: bool) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.startup = startup;
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, entry: ServiceEntry) {
        debug!("Registered service '{}' as {}", entry.name, entry.policy);
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&ServiceEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind `name`, launching or reusing a child if it runs out of process.
    pub fn bind(&mut self, children: &mut ChildProcessRegistry, name: &str) -> Result<BindOutcome> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| HostError::ServiceNotFound(name.to_string()))?;
        match &entry.policy {
            LaunchPolicy::Embedded => {
                let factory = entry
                    .factory
                    .as_ref()
                    .ok_or_else(|| HostError::ServiceNotFound(format!("{} (no embedded factory)", name)))?;
                factory(name);
                info!("Bound embedded service '{}'", name);
                Ok(BindOutcome::Embedded)
            }
            policy => {
                let outcome = self.launcher.launch(children, &entry.name, &entry.display_name, policy)?;
                info!("Bound service '{}': {:?}", name, outcome);
                Ok(outcome)
            }
        }
    }

    pub fn has_valid_process_for_group(&self, children: &ChildProcessRegistry, group: &str) -> bool {
        self.launcher.has_valid_process_for_group(children, group)
    }

    /// Names of services marked for launch at startup, in name order.
    pub fn startup_services(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.startup)
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Dedicated services take their process down with them.
    pub fn should_terminate_on_service_quit(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(entry) if entry.policy == LaunchPolicy::Dedicated)
    }
}

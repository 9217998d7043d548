//! Starting out-of-process services on child hosts.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};

use super::directory::{BindOutcome, LaunchPolicy};
use crate::child::{ChildProcessRegistry, NoopDelegate};
use crate::error::Result;

/// Launches dedicated and shared service children.
///
/// Shared services are multiplexed by process group. The group table only
/// names a child id; whether that child is still alive is checked against
/// the registry on every lookup.
#[derive(Debug, Default)]
pub struct OutOfProcessLauncher {
    process_groups: HashMap<String, i32>,
}

impl OutOfProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launch(
        &mut self,
        children: &mut ChildProcessRegistry,
        service_name: &str,
        display_name: &str,
        policy: &LaunchPolicy,
    ) -> Result<BindOutcome> {
        match policy {
            LaunchPolicy::Embedded => Ok(BindOutcome::Embedded),
            LaunchPolicy::Dedicated => {
                let id = Self::start_child(children, service_name, display_name)?;
                children.bind_service(id, service_name)?;
                Ok(BindOutcome::Launched(id))
            }
            LaunchPolicy::Shared { process_group } => {
                if let Some(id) = self.live_group_host(children, process_group) {
                    debug!("Reusing child {} of group '{}' for {}", id, process_group, service_name);
                    children.bind_service(id, service_name)?;
                    return Ok(BindOutcome::Reused(id));
                }
                let id = Self::start_child(children, process_group, display_name)?;
                children.bind_service(id, service_name)?;
                self.process_groups.insert(process_group.clone(), id);
                info!("Child {} now hosts group '{}'", id, process_group);
                Ok(BindOutcome::Launched(id))
            }
        }
    }

    /// Whether `group` currently maps to a live child.
    pub fn has_valid_process_for_group(&self, children: &ChildProcessRegistry, group: &str) -> bool {
        self.process_groups
            .get(group)
            .is_some_and(|id| children.is_alive(*id))
    }

    fn live_group_host(&mut self, children: &ChildProcessRegistry, group: &str) -> Option<i32> {
        match self.process_groups.get(group) {
            Some(id) if children.is_alive(*id) => Some(*id),
            Some(_) => {
                self.process_groups.remove(group);
                None
            }
            None => None,
        }
    }

    fn start_child(children: &mut ChildProcessRegistry, service_name: &str, display_name: &str) -> Result<i32> {
        let id = children.create(service_name, display_name, Arc::new(NoopDelegate));
        children.launch(id)?;
        Ok(id)
    }
}

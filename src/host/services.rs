//! Collaborators every host is constructed with.

use std::sync::Arc;

use super::config::HostConfig;
use super::events::{HostEventSink, HostHandle};
use super::policy::{DefaultEmbedderPolicy, EmbedderPolicy};
use crate::channel::BootstrapBroker;
use crate::id::IdGenerator;
use crate::launch::{ProcessLauncher, ProcessReporter};

pub struct HostServices {
    pub config: HostConfig,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub broker: Arc<BootstrapBroker>,
    pub sink: Arc<dyn HostEventSink>,
    pub policy: Arc<dyn EmbedderPolicy>,
    /// Shared by worker and child hosts so ids never collide.
    pub ids: Arc<IdGenerator>,
}

impl HostServices {
    pub fn new(
        config: HostConfig,
        launcher: Arc<dyn ProcessLauncher>,
        broker: Arc<BootstrapBroker>,
        sink: Arc<dyn HostEventSink>,
    ) -> Self {
        Self {
            config,
            launcher,
            broker,
            sink,
            policy: Arc::new(DefaultEmbedderPolicy),
            ids: Arc::new(IdGenerator::new()),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn EmbedderPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn reporter(&self, handle: HostHandle) -> ProcessReporter {
        ProcessReporter::new(handle, self.sink.clone())
    }
}

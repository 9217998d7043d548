//! The pre-warmed spare host.

use log::{debug, info, warn};

use crate::host::{ContextId, HostRegistry, HostUpdate};

/// Spare pool policy.
#[derive(Debug, Clone)]
pub struct SpareConfig {
    /// When false, no spare is ever warmed.
    pub enabled: bool,

    /// Re-warm after every request and keep a mismatched spare while under
    /// the process limit.
    pub keep_spare_at_all_times: bool,
}

impl Default for SpareConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_spare_at_all_times: false,
        }
    }
}

impl SpareConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_keep_spare_at_all_times(mut self, keep: bool) -> Self {
        self.keep_spare_at_all_times = keep;
        self
    }
}

/// Counters for how the spare has been used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpareStats {
    /// Spares created and launched.
    pub warmed: usize,

    /// Spares handed to a request.
    pub taken: usize,

    /// Spares thrown away without being used.
    pub discarded: usize,

    /// Requests that found no spare at all.
    pub missed: usize,
}

impl SpareStats {
    /// Fraction of warmed spares that were used.
    pub fn hit_rate(&self) -> f64 {
        if self.warmed == 0 {
            0.0
        } else {
            self.taken as f64 / self.warmed as f64
        }
    }
}

/// What [`SpareProcessManager::take_or_discard`] did with a mismatched spare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpareTakeAction {
    Taken(i32),
    NoSpare,
    Discarded,
    Kept,
}

impl SpareTakeAction {
    pub fn taken(&self) -> Option<i32> {
        match self {
            SpareTakeAction::Taken(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Spare {
    host: i32,
    context: ContextId,
}

/// Keeps at most one unused, launched host ready for the next request.
#[derive(Debug)]
pub struct SpareProcessManager {
    config: SpareConfig,
    spare: Option<Spare>,
    stats: SpareStats,
}

impl SpareProcessManager {
    pub fn new(config: SpareConfig) -> Self {
        Self {
            config,
            spare: None,
            stats: SpareStats::default(),
        }
    }

    pub fn config(&self) -> &SpareConfig {
        &self.config
    }

    pub fn stats(&self) -> &SpareStats {
        &self.stats
    }

    pub fn spare_host(&self) -> Option<i32> {
        self.spare.as_ref().map(|s| s.host)
    }

    /// Context the current spare was warmed for.
    pub fn spare_context(&self) -> Option<&ContextId> {
        self.spare.as_ref().map(|s| &s.context)
    }

    /// Make sure a spare exists for `context`.
    pub fn warmup(&mut self, registry: &mut HostRegistry, context: &ContextId) -> Option<i32> {
        if let Some(spare) = &self.spare {
            if spare.context == *context {
                return Some(spare.host);
            }
        }
        self.discard(registry);

        if !self.config.enabled
            || registry.services().config.single_process
            || registry.len() >= registry.max_process_count()
        {
            return None;
        }

        let id = registry.create_host(context.clone());
        let launched = registry.with_host(id, |host| {
            host.set_is_spare(true);
            match host.init() {
                Ok(()) => (true, HostUpdate::default()),
                Err(e) => {
                    warn!("Spare host {} failed to launch: {}", id, e);
                    (false, HostUpdate::cleanup(host.cleanup()))
                }
            }
        });
        if !matches!(launched, Ok(true)) {
            return None;
        }

        info!("Warmed spare host {} for context {}", id, context);
        self.stats.warmed += 1;
        self.spare = Some(Spare {
            host: id,
            context: context.clone(),
        });
        Some(id)
    }

    /// Hand out the spare if it fits the request; otherwise drop or keep it.
    ///
    /// # Panics
    ///
    /// If the spare handed out has already been used.
    pub fn take_or_discard(
        &mut self,
        registry: &mut HostRegistry,
        context: &ContextId,
        exclusive: bool,
    ) -> SpareTakeAction {
        let Some(spare) = self.spare.take() else {
            self.stats.missed += 1;
            return SpareTakeAction::NoSpare;
        };

        let allowed = registry.services().policy.allows_spare(context);
        let usable = registry
            .get(spare.host)
            .is_some_and(|host| host.is_initialized_and_not_dead() && !host.is_deleting_soon());
        if spare.context == *context && !exclusive && allowed && usable {
            if let Some(host) = registry.get_mut(spare.host) {
                assert!(host.host_has_not_been_used(), "spare host {} was already used", spare.host);
                host.set_is_spare(false);
                debug!("Took spare host {} for context {}", spare.host, context);
                self.stats.taken += 1;
                return SpareTakeAction::Taken(spare.host);
            }
        }

        if self.config.keep_spare_at_all_times && usable && registry.len() <= registry.max_process_count() {
            debug!("Keeping mismatched spare host {}", spare.host);
            self.spare = Some(spare);
            return SpareTakeAction::Kept;
        }
        self.spare = Some(spare);
        self.discard(registry);
        SpareTakeAction::Discarded
    }

    /// Called after every request has been served.
    pub fn prepare_for_future_requests(&mut self, registry: &mut HostRegistry, context: &ContextId) {
        if self.config.keep_spare_at_all_times {
            self.warmup(registry, context);
        } else {
            self.discard(registry);
        }
    }

    /// Tear down the spare, if any.
    pub fn discard(&mut self, registry: &mut HostRegistry) -> bool {
        let Some(spare) = self.spare.take() else {
            return false;
        };
        debug!("Discarding spare host {}", spare.host);
        self.stats.discarded += 1;
        let _ = registry.with_host(spare.host, |host| {
            host.set_is_spare(false);
            ((), HostUpdate::cleanup(host.cleanup()))
        });
        true
    }

    /// Discard the spare if it was warmed for `context`.
    pub fn discard_for_context(&mut self, registry: &mut HostRegistry, context: &ContextId) -> bool {
        if self.spare_context() == Some(context) {
            self.discard(registry)
        } else {
            false
        }
    }

    /// The spare died before anyone took it.
    pub fn on_host_exited(&mut self, registry: &mut HostRegistry, id: i32) {
        if self.spare_host() == Some(id) {
            info!("Spare host {} died; discarding", id);
            self.discard(registry);
        }
    }

    /// The spare was destroyed from elsewhere.
    pub fn on_host_destroyed(&mut self, id: i32) {
        if self.spare_host() == Some(id) {
            self.spare = None;
        }
    }
}

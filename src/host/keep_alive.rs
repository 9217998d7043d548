//! Keep-alive reference counts.
//!
//! Besides routes, a host stays alive while any client type holds a
//! keep-alive count on it. Counts can be disabled once, when the host is
//! about to go away; after that nothing may hold it open.

use std::fmt;
use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepAliveClientType {
    ServiceWorker,
    SharedWorker,
    Fetch,
    Unload,
}

impl KeepAliveClientType {
    pub const COUNT: usize = 4;

    pub const ALL: [KeepAliveClientType; KeepAliveClientType::COUNT] = [
        KeepAliveClientType::ServiceWorker,
        KeepAliveClientType::SharedWorker,
        KeepAliveClientType::Fetch,
        KeepAliveClientType::Unload,
    ];

    pub fn index(self) -> usize {
        match self {
            KeepAliveClientType::ServiceWorker => 0,
            KeepAliveClientType::SharedWorker => 1,
            KeepAliveClientType::Fetch => 2,
            KeepAliveClientType::Unload => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KeepAliveClientType::ServiceWorker => "service_worker",
            KeepAliveClientType::SharedWorker => "shared_worker",
            KeepAliveClientType::Fetch => "fetch",
            KeepAliveClientType::Unload => "unload",
        }
    }
}

impl fmt::Display for KeepAliveClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Default)]
pub struct KeepAliveCounts {
    counts: [u32; KeepAliveClientType::COUNT],
    held_since: [Option<Instant>; KeepAliveClientType::COUNT],
    disabled: bool,
}

impl KeepAliveCounts {
    pub fn increment(&mut self, client: KeepAliveClientType) {
        debug_assert!(!self.disabled, "keep-alive increment after disable");
        if self.disabled {
            return;
        }
        let i = client.index();
        if self.counts[i] == 0 {
            self.held_since[i] = Some(Instant::now());
        }
        self.counts[i] += 1;
    }

    /// Returns true when this drop released the last count of any type.
    pub fn decrement(&mut self, client: KeepAliveClientType) -> bool {
        debug_assert!(!self.disabled, "keep-alive decrement after disable");
        let i = client.index();
        debug_assert!(self.counts[i] > 0, "keep-alive count for {} underflow", client);
        if self.disabled || self.counts[i] == 0 {
            return false;
        }
        self.counts[i] -= 1;
        if self.counts[i] == 0 {
            if let Some(since) = self.held_since[i].take() {
                debug!("{} keep-alive held for {:?}", client, since.elapsed());
            }
        }
        self.total() == 0
    }

    /// Zero every count and latch. Returns false if already disabled.
    pub fn disable(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        self.disabled = true;
        self.counts = [0; KeepAliveClientType::COUNT];
        self.held_since = [None; KeepAliveClientType::COUNT];
        true
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn count(&self, client: KeepAliveClientType) -> u32 {
        self.counts[client.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

//! Browsing contexts and their site-to-process maps.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::generate_context_id;

/// Identifies one context. Hosts never cross contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn generate() -> Self {
        Self(generate_context_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct Context {
    id: ContextId,
    site_process_map: HashMap<String, i32>,
}

impl Context {
    pub fn new(id: ContextId) -> Self {
        Self {
            id,
            site_process_map: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Record `host` for `site` unless the site already has one.
    pub fn register_process(&mut self, site: &str, host: i32) -> i32 {
        *self.site_process_map.entry(site.to_string()).or_insert(host)
    }

    pub fn find_process(&self, site: &str) -> Option<i32> {
        self.site_process_map.get(site).copied()
    }

    /// Forget every site mapped to `host`.
    pub fn remove_process(&mut self, host: i32) -> usize {
        let before = self.site_process_map.len();
        self.site_process_map.retain(|_, id| *id != host);
        before - self.site_process_map.len()
    }

    pub fn site_count(&self) -> usize {
        self.site_process_map.len()
    }
}

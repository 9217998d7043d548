//! Records kept when a worker is killed for misbehaving.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a worker was terminated for a bad message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadMessageReport {
    pub host_id: i32,
    pub pid: Option<u32>,
    pub reason: String,
    pub reported_at: DateTime<Utc>,
}

impl BadMessageReport {
    pub fn new(host_id: i32, pid: Option<u32>, reason: &str) -> Self {
        Self {
            host_id,
            pid,
            reason: reason.to_string(),
            reported_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

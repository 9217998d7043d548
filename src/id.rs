//! ID generation utilities for prochost
//!
//! Host ids are small integers handed out by an injected [`IdGenerator`];
//! bootstrap tokens and context ids are random hex strings.

use std::sync::atomic::{AtomicI32, Ordering};

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Source of process-wide unique host ids.
///
/// Worker hosts and generic child hosts draw from the same generator so an
/// id identifies exactly one host object for its whole lifetime.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI32,
}

impl IdGenerator {
    /// Create a generator whose first id is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }

    /// Hand out the next id.
    pub fn next_id(&self) -> i32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an opaque handshake token
///
/// Format: 32 hex chars (128 random bits)
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Generate a context ID
///
/// Format: `ctx-{timestamp_ms}-{random_hex}`
pub fn generate_context_id() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("ctx-{}-{:08x}", timestamp, random)
}

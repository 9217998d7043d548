//! Channel bootstrap handshake.
//!
//! Before launch, the host registers an invitation with the
//! [`BootstrapBroker`] and gets back a one-shot [`BootstrapToken`]. The
//! token goes on the worker's command line. When the worker connects back
//! and presents it, the broker consumes the invitation and hands the
//! worker's transport to the host through the stored callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, warn};

use super::transport::Transport;
use crate::error::{HostError, Result};
use crate::id::generate_token;
use crate::service::ServiceIdentity;

/// Opaque handshake token, unique per launch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapToken(String);

impl BootstrapToken {
    pub fn generate() -> Self {
        Self(generate_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BootstrapToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Called once with the joined transport and the peer's pid.
pub type ConnectCallback = Box<dyn FnOnce(Box<dyn Transport>, u32) + Send>;

struct Invitation {
    identity: ServiceIdentity,
    on_connect: ConnectCallback,
    created_at: Instant,
}

/// Matches connecting workers to the hosts that launched them.
///
/// Invitations are created on the UI thread and accepted on the IO thread,
/// so the table is behind a mutex.
pub struct BootstrapBroker {
    pending: Mutex<HashMap<BootstrapToken, Invitation>>,
}

impl BootstrapBroker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register an invitation for `identity` and return its token.
    pub fn invite(&self, identity: ServiceIdentity, on_connect: ConnectCallback) -> BootstrapToken {
        let token = BootstrapToken::generate();
        debug!("Bootstrap invitation {} for {}", token, identity);
        self.lock().insert(
            token.clone(),
            Invitation {
                identity,
                on_connect,
                created_at: Instant::now(),
            },
        );
        token
    }

    /// Consume the invitation for `token` and join `transport` to it.
    ///
    /// Each token can be accepted at most once.
    pub fn accept(&self, token: &str, transport: Box<dyn Transport>, peer_pid: u32) -> Result<ServiceIdentity> {
        let key = BootstrapToken(token.to_string());
        let invitation = self.lock().remove(&key);
        match invitation {
            Some(invitation) => {
                debug!(
                    "Bootstrap {} accepted by pid {} after {:?}",
                    token,
                    peer_pid,
                    invitation.created_at.elapsed()
                );
                (invitation.on_connect)(transport, peer_pid);
                Ok(invitation.identity)
            }
            None => {
                warn!("Bootstrap token {} is unknown or already used", token);
                Err(HostError::Channel(format!("unknown bootstrap token {}", token)))
            }
        }
    }

    /// Drop an invitation that will never be accepted.
    pub fn revoke(&self, token: &BootstrapToken) -> bool {
        self.lock().remove(token).is_some()
    }

    pub fn is_pending(&self, token: &BootstrapToken) -> bool {
        self.lock().contains_key(token)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BootstrapToken, Invitation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for BootstrapBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryTransport;
    use std::sync::Arc;

    #[test]
    fn test_tokens_are_unique() {
        let broker = BootstrapBroker::new();
        let a = broker.invite(ServiceIdentity::new("worker", "1_0"), Box::new(|_, _| {}));
        let b = broker.invite(ServiceIdentity::new("worker", "1_1"), Box::new(|_, _| {}));
        assert_ne!(a, b);
        assert_eq!(broker.pending_count(), 2);
    }

    #[test]
    fn test_accept_consumes_token_once() {
        let broker = BootstrapBroker::new();
        let joined = Arc::new(Mutex::new(None));
        let joined_clone = joined.clone();
        let token = broker.invite(
            ServiceIdentity::new("worker", "1_0"),
            Box::new(move |_, pid| *joined_clone.lock().unwrap() = Some(pid)),
        );

        let identity = broker
            .accept(token.as_str(), Box::new(MemoryTransport::new()), 4242)
            .unwrap();
        assert_eq!(identity.instance, "1_0");
        assert_eq!(*joined.lock().unwrap(), Some(4242));
        assert!(!broker.is_pending(&token));

        let again = broker.accept(token.as_str(), Box::new(MemoryTransport::new()), 4242);
        assert!(matches!(again, Err(HostError::Channel(_))));
    }

    #[test]
    fn test_revoked_token_cannot_be_accepted() {
        let broker = BootstrapBroker::new();
        let token = broker.invite(ServiceIdentity::new("worker", "2_0"), Box::new(|_, _| {}));
        assert!(broker.revoke(&token));
        assert!(!broker.revoke(&token));
        assert!(broker.accept(token.as_str(), Box::new(MemoryTransport::new()), 1).is_err());
    }
}

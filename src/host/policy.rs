//! Embedder hooks consulted by hosts.

use super::context::ContextId;
use super::observer::HostSnapshot;
use crate::channel::ChannelMessage;
use crate::launch::CommandLine;

/// Decisions the embedding application gets a say in.
///
/// Every hook has a permissive default.
pub trait EmbedderPolicy: Send + Sync {
    fn may_reuse_host(&self, _host: &HostSnapshot) -> bool {
        true
    }

    fn allows_spare(&self, _context: &ContextId) -> bool {
        true
    }

    /// Messages queued ahead of launch; they reach the worker first.
    fn will_launch(&self, _host: &HostSnapshot) -> Vec<ChannelMessage> {
        Vec::new()
    }

    /// Messages sent once launch completes, ahead of anything queued.
    fn launch_preamble(&self, _host: &HostSnapshot) -> Vec<ChannelMessage> {
        Vec::new()
    }

    fn append_extra_switches(&self, _command_line: &mut CommandLine) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEmbedderPolicy;

impl EmbedderPolicy for DefaultEmbedderPolicy {}

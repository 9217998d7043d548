//! The host side of a worker channel.

use bytes::Bytes;
use log::{debug, warn};

use super::bootstrap::BootstrapToken;
use super::codec::MessageCodec;
use super::message::ChannelMessage;
use super::queue::{QueueState, SendQueue};
use super::transport::Transport;
use crate::error::{HostError, Result};
use crate::service::ServiceIdentity;

/// Where frames go once they leave the send queue.
#[derive(Debug)]
enum Endpoint {
    /// Not joined yet; frames wait here in order.
    Pending(Vec<Bytes>),
    Joined(Box<dyn Transport>),
    Closed,
}

/// Outbound half of a channel to one worker.
///
/// Two layers of ordering apply. The send queue holds messages while the
/// host keeps the channel paused around launch. Frames that leave the
/// queue before the worker has connected wait on the pending endpoint and
/// are written, in order, when the transport is joined.
#[derive(Debug)]
pub struct Channel {
    token: BootstrapToken,
    identity: ServiceIdentity,
    queue: SendQueue<Bytes>,
    endpoint: Endpoint,
    peer_pid: Option<u32>,
    codec: MessageCodec,
}

impl Channel {
    /// A fresh channel: paused, not joined.
    pub fn new(token: BootstrapToken, identity: ServiceIdentity) -> Self {
        Self {
            token,
            identity,
            queue: SendQueue::new(),
            endpoint: Endpoint::Pending(Vec::new()),
            peer_pid: None,
            codec: MessageCodec::new(),
        }
    }

    pub fn bootstrap_token(&self) -> &BootstrapToken {
        &self.token
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn state(&self) -> QueueState {
        self.queue.state()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.endpoint, Endpoint::Joined(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.endpoint, Endpoint::Closed)
    }

    pub fn peer_pid(&self) -> Option<u32> {
        self.peer_pid
    }

    /// Messages held by the paused queue.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Frames released by the queue but waiting for the worker to connect.
    pub fn pending_len(&self) -> usize {
        match &self.endpoint {
            Endpoint::Pending(frames) => frames.len(),
            _ => 0,
        }
    }

    pub fn send(&mut self, message: &ChannelMessage) -> Result<()> {
        if self.is_closed() {
            return Err(HostError::Channel("send on closed channel".to_string()));
        }
        let frame = self.codec.encode_frame(message)?;
        match self.queue.push(frame) {
            Some(frame) => self.deliver(frame),
            None => Ok(()),
        }
    }

    pub fn pause(&mut self) {
        self.queue.pause();
    }

    /// Flush the queue in order and leave it open.
    pub fn open(&mut self) -> Result<usize> {
        self.open_with_preamble(Vec::new())
    }

    /// Deliver `preamble` ahead of everything queued, then flush and open.
    pub fn open_with_preamble(&mut self, preamble: Vec<ChannelMessage>) -> Result<usize> {
        let mut first_error = None;
        let mut delivered = 0;

        for message in &preamble {
            let result = self.codec.encode_frame(message).and_then(|frame| self.deliver(frame));
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        self.queue.begin_flush();
        while let Some(frame) = self.queue.next_flushed() {
            match self.deliver(frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        self.queue.finish_flush();

        match first_error {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }

    /// Attach the worker's transport and write any frames waiting for it.
    ///
    /// If a waiting frame cannot be written the transport is closed and the
    /// channel is left closed.
    pub fn join(&mut self, mut transport: Box<dyn Transport>, peer_pid: u32) -> Result<usize> {
        let waiting = match std::mem::replace(&mut self.endpoint, Endpoint::Closed) {
            Endpoint::Pending(frames) => frames,
            Endpoint::Joined(previous) => {
                self.endpoint = Endpoint::Joined(previous);
                transport.close();
                return Err(HostError::Channel(format!("{} joined twice", self.identity)));
            }
            Endpoint::Closed => {
                transport.close();
                return Err(HostError::Channel(format!("{} is closed", self.identity)));
            }
        };

        let count = waiting.len();
        for frame in waiting {
            if let Err(e) = transport.send_frame(frame) {
                transport.close();
                return Err(e);
            }
        }
        debug!("Channel {} joined by pid {}; wrote {} waiting frames", self.identity, peer_pid, count);
        self.endpoint = Endpoint::Joined(transport);
        self.peer_pid = Some(peer_pid);
        Ok(count)
    }

    /// Close the transport and drop anything not yet written.
    pub fn close(&mut self) {
        let dropped = self.queue.clear() + self.pending_len();
        if dropped > 0 {
            warn!("Channel {} closed with {} unsent messages", self.identity, dropped);
        }
        if let Endpoint::Joined(transport) = &mut self.endpoint {
            transport.close();
        }
        self.endpoint = Endpoint::Closed;
    }

    fn deliver(&mut self, frame: Bytes) -> Result<()> {
        match &mut self.endpoint {
            Endpoint::Pending(frames) => {
                frames.push(frame);
                Ok(())
            }
            Endpoint::Joined(transport) => transport.send_frame(frame),
            Endpoint::Closed => Err(HostError::Channel("send on closed channel".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryTransport;

    fn channel() -> Channel {
        Channel::new(BootstrapToken::generate(), ServiceIdentity::new("worker", "1_0"))
    }

    fn msg(name: &str) -> ChannelMessage {
        ChannelMessage::new(1, name)
    }

    #[test]
    fn test_new_channel_is_paused_and_unjoined() {
        let channel = channel();
        assert_eq!(channel.state(), QueueState::Paused);
        assert!(!channel.is_connected());
    }

    #[test]
    fn test_sends_before_join_are_kept_in_order() {
        let mut channel = channel();
        channel.send(&msg("a")).unwrap();
        channel.send(&msg("b")).unwrap();
        assert_eq!(channel.queued_len(), 2);

        channel.open().unwrap();
        assert_eq!(channel.queued_len(), 0);
        assert_eq!(channel.pending_len(), 2);
        channel.send(&msg("c")).unwrap();

        let transport = MemoryTransport::new();
        assert_eq!(channel.join(Box::new(transport.clone()), 77).unwrap(), 3);
        channel.send(&msg("d")).unwrap();

        assert_eq!(transport.message_names(), vec!["a", "b", "c", "d"]);
        assert_eq!(channel.peer_pid(), Some(77));
    }

    #[test]
    fn test_join_while_paused_keeps_queue_held() {
        let mut channel = channel();
        let transport = MemoryTransport::new();
        channel.join(Box::new(transport.clone()), 1).unwrap();

        channel.send(&msg("held")).unwrap();
        assert!(transport.messages().is_empty());

        channel.open().unwrap();
        assert_eq!(transport.message_names(), vec!["held"]);
    }

    #[test]
    fn test_preamble_goes_first() {
        let mut channel = channel();
        let transport = MemoryTransport::new();
        channel.join(Box::new(transport.clone()), 1).unwrap();
        channel.send(&msg("queued")).unwrap();

        channel.open_with_preamble(vec![msg("init")]).unwrap();
        assert_eq!(transport.message_names(), vec!["init", "queued"]);
    }

    #[test]
    fn test_failed_join_closes_channel_and_transport() {
        let mut channel = channel();
        channel.open().unwrap();
        channel.send(&msg("waiting")).unwrap();

        let transport = MemoryTransport::new();
        transport.clone().close();
        assert!(channel.join(Box::new(transport.clone()), 3).is_err());
        assert!(channel.is_closed());
        assert!(transport.is_closed());
        assert!(channel.send(&msg("after")).is_err());
    }

    #[test]
    fn test_second_join_is_rejected_and_closed() {
        let mut channel = channel();
        let first = MemoryTransport::new();
        let second = MemoryTransport::new();
        channel.join(Box::new(first.clone()), 1).unwrap();

        assert!(channel.join(Box::new(second.clone()), 2).is_err());
        assert!(channel.is_connected());
        assert!(second.is_closed());
        assert!(!first.is_closed());
    }

    #[test]
    fn test_closed_channel_rejects_sends() {
        let mut channel = channel();
        let transport = MemoryTransport::new();
        channel.join(Box::new(transport.clone()), 1).unwrap();
        channel.close();

        assert!(transport.is_closed());
        assert!(channel.send(&msg("late")).is_err());
        assert!(channel.join(Box::new(MemoryTransport::new()), 2).is_err());
    }

    #[test]
    fn test_double_join_rejected() {
        let mut channel = channel();
        channel.join(Box::new(MemoryTransport::new()), 1).unwrap();
        assert!(channel.join(Box::new(MemoryTransport::new()), 1).is_err());
        assert!(channel.is_connected());
    }
}

//! Worker channels.
//!
//! A channel is created before its worker exists. Outbound messages are
//! queued until the worker connects back through the bootstrap broker with
//! the token it was launched with.

pub mod bootstrap;
pub mod host_channel;
pub mod codec;
pub mod message;
pub mod queue;
pub mod transport;

pub use bootstrap::{BootstrapBroker, BootstrapToken, ConnectCallback};
pub use host_channel::Channel;
pub use codec::MessageCodec;
pub use message::{ChannelMessage, ControlMessage, MSG_ROUTING_CONTROL, MSG_ROUTING_NONE};
pub use queue::{QueueState, SendQueue};
pub use transport::{Incoming, MemoryTransport, StreamTransport, Transport, pump_incoming};

//! Transports a joined channel writes frames to.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use super::codec::MessageCodec;
use super::message::ChannelMessage;
use crate::error::{HostError, Result};

/// The far side of a joined channel.
pub trait Transport: Send + fmt::Debug {
    fn send_frame(&mut self, frame: Bytes) -> Result<()>;

    fn close(&mut self) {}
}

/// In-memory transport that records every frame.
///
/// Clones share the same buffer, so a test can keep one clone and hand the
/// other to a channel.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    frames: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Decoded messages, in the order they were written.
    pub fn messages(&self) -> Vec<ChannelMessage> {
        let codec = MessageCodec::new();
        self.frames()
            .iter()
            .filter_map(|frame| codec.decode_frame(frame).ok())
            .collect()
    }

    /// Names of the decoded messages, in order.
    pub fn message_names(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.name).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(HostError::Channel("transport closed".to_string()));
        }
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport backed by an async writer, drained by a spawned task.
pub struct StreamTransport {
    sender: Option<mpsc::UnboundedSender<Bytes>>,
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("open", &self.sender.is_some())
            .finish()
    }
}

impl StreamTransport {
    /// Spawn a writer task on the current tokio runtime.
    pub fn spawn<W>(mut writer: W) -> (Self, JoinHandle<std::io::Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Bytes>();
        let handle = tokio::spawn(async move {
            while let Some(frame) = receiver.recv().await {
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
            writer.shutdown().await
        });
        (Self { sender: Some(sender) }, handle)
    }
}

impl Transport for StreamTransport {
    fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        match &self.sender {
            Some(sender) => sender
                .send(frame)
                .map_err(|_| HostError::Channel("writer task has stopped".to_string())),
            None => Err(HostError::Channel("transport closed".to_string())),
        }
    }

    fn close(&mut self) {
        self.sender = None;
    }
}

/// What the read side of a stream produced.
#[derive(Debug)]
pub enum Incoming {
    Message(ChannelMessage),
    /// The peer sent something undecodable; reading stops.
    BadMessage(String),
    /// End of stream or read error.
    Closed,
}

/// Read frames from `reader` until it closes or misbehaves.
pub async fn pump_incoming<R, F>(reader: R, mut on_incoming: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(Incoming),
{
    let mut framed = FramedRead::new(reader, MessageCodec::new());
    while let Some(item) = framed.next().await {
        match item {
            Ok(message) => on_incoming(Incoming::Message(message)),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                on_incoming(Incoming::BadMessage(e.to_string()));
                return;
            }
            Err(e) => {
                log::debug!("channel read error: {}", e);
                break;
            }
        }
    }
    on_incoming(Incoming::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_memory_transport_records_frames() {
        let codec = MessageCodec::new();
        let observer = MemoryTransport::new();
        let mut transport = observer.clone();

        transport
            .send_frame(codec.encode_frame(&ChannelMessage::new(1, "hello")).unwrap())
            .unwrap();
        assert_eq!(observer.message_names(), vec!["hello"]);

        transport.close();
        assert!(observer.is_closed());
        assert!(transport.send_frame(Bytes::from_static(b"x")).is_err());
    }

    #[tokio::test]
    async fn test_stream_transport_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut transport, writer) = StreamTransport::spawn(client);
        let codec = MessageCodec::new();

        transport
            .send_frame(codec.encode_frame(&ChannelMessage::new(3, "ping")).unwrap())
            .unwrap();
        transport.close();
        writer.await.unwrap().unwrap();

        let mut seen = Vec::new();
        pump_incoming(server, |incoming| seen.push(incoming)).await;

        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], Incoming::Message(m) if m.name == "ping"));
        assert!(matches!(seen[1], Incoming::Closed));
    }

    #[tokio::test]
    async fn test_pump_reports_bad_message() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 3, b'x', b'y', b'z']).await.unwrap();
        drop(client);

        let mut seen = Vec::new();
        pump_incoming(server, |incoming| seen.push(incoming)).await;

        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Incoming::BadMessage(_)));
    }
}

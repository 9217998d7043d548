//! Wire framing for channel messages.
//!
//! Each frame is a big-endian u32 length followed by that many bytes of
//! JSON. A frame that cannot be decoded is a protocol violation by the peer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::ChannelMessage;
use crate::error::{HostError, Result};

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_length: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            max_length: MAX_FRAME_LENGTH,
        }
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Encode one message into a standalone frame.
    pub fn encode_frame(&self, message: &ChannelMessage) -> Result<Bytes> {
        let json = serde_json::to_vec(message)?;
        if json.len() > self.max_length {
            return Err(HostError::Channel(format!(
                "Message too large: {} > {}",
                json.len(),
                self.max_length
            )));
        }
        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + json.len());
        frame.put_u32(json.len() as u32);
        frame.put_slice(&json);
        Ok(frame.freeze())
    }

    /// Decode one complete frame. Anything malformed is a bad message.
    pub fn decode_frame(&self, frame: &[u8]) -> Result<ChannelMessage> {
        if frame.len() < LENGTH_PREFIX {
            return Err(HostError::BadMessage("frame shorter than length prefix".to_string()));
        }
        let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        if frame.len() != LENGTH_PREFIX + length {
            return Err(HostError::BadMessage(format!(
                "frame length {} does not match prefix {}",
                frame.len() - LENGTH_PREFIX,
                length
            )));
        }
        serde_json::from_slice(&frame[LENGTH_PREFIX..])
            .map_err(|e| HostError::BadMessage(format!("undecodable payload: {}", e)))
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

impl Decoder for MessageCodec {
    type Item = ChannelMessage;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_length {
            return Err(invalid_data(format!("Message too large: {} > {}", length, self.max_length)));
        }

        if src.len() < LENGTH_PREFIX + length {
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let data = src.split_to(length);
        serde_json::from_slice(&data).map_err(|e| invalid_data(format!("JSON error: {}", e)))
    }
}

impl Encoder<ChannelMessage> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: ChannelMessage, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let frame = self.encode_frame(&item).map_err(|e| invalid_data(e.to_string()))?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_then_stream_decode() {
        let codec = MessageCodec::new();
        let first = ChannelMessage::new(1, "first");
        let second = ChannelMessage::new(2, "second").with_payload(serde_json::json!({"n": 2}));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&codec.encode_frame(&first).unwrap());
        buf.extend_from_slice(&codec.encode_frame(&second).unwrap());

        let mut decoder = MessageCodec::new();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), second);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut decoder = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_slice(&[b'{'; 10]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = MessageCodec::with_max_length(8);
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        assert!(decoder.decode(&mut buf).is_err());

        let codec = MessageCodec::with_max_length(8);
        assert!(codec.encode_frame(&ChannelMessage::new(1, "too-long-for-eight")).is_err());
    }

    #[test]
    fn test_garbage_payload_is_bad_message() {
        let codec = MessageCodec::new();
        let mut frame = BytesMut::new();
        frame.put_u32(3);
        frame.put_slice(b"{{{");
        assert!(matches!(codec.decode_frame(&frame), Err(HostError::BadMessage(_))));

        let mut decoder = MessageCodec::new();
        assert!(decoder.decode(&mut frame).is_err());
    }

    #[test]
    fn test_truncated_frame_is_bad_message() {
        let codec = MessageCodec::new();
        let frame = codec.encode_frame(&ChannelMessage::new(1, "x")).unwrap();
        assert!(codec.decode_frame(&frame[..frame.len() - 1]).is_err());
        assert!(codec.decode_frame(&frame[..2]).is_err());
    }
}

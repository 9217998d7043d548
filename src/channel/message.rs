//! Messages carried over a host channel.

use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Routing id addressed to the host itself rather than a listener.
pub const MSG_ROUTING_CONTROL: i32 = i32::MAX;

/// Routing id meaning "no route".
pub const MSG_ROUTING_NONE: i32 = -2;

const CONTROL_NAME: &str = "control";
const ERROR_REPLY_NAME: &str = "error_reply";

/// One framed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub routing_id: i32,
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// The sender blocks waiting for a reply.
    #[serde(default)]
    pub sync: bool,
}

impl ChannelMessage {
    pub fn new(routing_id: i32, name: &str) -> Self {
        Self {
            routing_id,
            name: name.to_string(),
            payload: serde_json::Value::Null,
            sync: false,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn is_control(&self) -> bool {
        self.routing_id == MSG_ROUTING_CONTROL
    }

    /// Reply sent for a sync message nobody could handle.
    pub fn error_reply(&self) -> Self {
        Self::new(self.routing_id, ERROR_REPLY_NAME)
            .with_payload(serde_json::json!({ "request": self.name }))
    }

    pub fn is_error_reply(&self) -> bool {
        self.name == ERROR_REPLY_NAME
    }
}

/// Messages exchanged on the control route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Worker handshake: first message on a stream transport.
    Hello { token: String, pid: u32 },
    /// Host tells the worker whether it has been backgrounded.
    SetProcessBackgrounded { backgrounded: bool },
    /// Worker reports whether it may be killed without running unload handlers.
    SuddenTerminationChanged { allowed: bool },
    /// Worker asks to exit.
    ShutdownRequest,
    /// Host acknowledges a shutdown request.
    Shutdown,
    /// Host asks a child to start serving a named service.
    BindService { service_name: String },
}

impl ControlMessage {
    pub fn to_message(&self) -> Result<ChannelMessage> {
        Ok(ChannelMessage::new(MSG_ROUTING_CONTROL, CONTROL_NAME).with_payload(serde_json::to_value(self)?))
    }

    /// Parse a control-routed message. Failure means the peer misbehaved.
    pub fn from_message(message: &ChannelMessage) -> Result<Self> {
        if !message.is_control() || message.name != CONTROL_NAME {
            return Err(HostError::BadMessage(format!(
                "'{}' on route {} is not a control message",
                message.name, message.routing_id
            )));
        }
        serde_json::from_value(message.payload.clone())
            .map_err(|e| HostError::BadMessage(format!("malformed control message: {}", e)))
    }
}

use serde_json::Value;
use strum::FromRepr;

use crate::constants::DEFAULT_NAMESPACE;

/// Outer (engine) packet type, the first digit of every frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum EngineType {
    Open = 0,
    Close = 1,
    Ping = 2,
    Pong = 3,
    Message = 4,
    Upgrade = 5,
    Noop = 6,
}

/// Inner (message) packet type, the second digit of `Message` frames.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum MessageType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    Error = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl MessageType {
    /// Binary variants carry an attachment count before the payload.
    pub const fn is_binary(self) -> bool {
        matches!(self, MessageType::BinaryEvent | MessageType::BinaryAck)
    }
}

/// A decoded (or to-be-encoded) frame.
///
/// `message` is only meaningful when `engine == EngineType::Message`;
/// `attachments` only for the binary message variants.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub engine: EngineType,
    pub message: Option<MessageType>,
    pub attachments: u32,
    pub namespace: String,
    /// Correlation id; present only on packets that expect or answer an ack.
    pub id: Option<u64>,
    pub data: Option<Value>,
}

impl Packet {
    /// A bare control frame (`open`, `close`, `ping`, `pong`, ...).
    pub fn control(engine: EngineType) -> Self {
        Self {
            engine,
            message: None,
            attachments: 0,
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            data: None,
        }
    }

    /// A `Message` frame of the given kind. A JSON `null` payload is
    /// normalized to "no payload", matching what the encoder emits.
    pub fn message(message: MessageType, data: Option<Value>) -> Self {
        Self {
            engine: EngineType::Message,
            message: Some(message),
            attachments: 0,
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            data: data.filter(|v| !v.is_null()),
        }
    }

    /// Acknowledgement for the packet carrying correlation id `id`.
    pub fn ack(id: u64, data: Value) -> Self {
        Self::message(MessageType::Ack, Some(data)).with_id(Some(id))
    }

    pub fn with_id(mut self, id: Option<u64>) -> Self {
        self.id = id;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_attachments(mut self, attachments: u32) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn is_message(&self, kind: MessageType) -> bool {
        self.engine == EngineType::Message && self.message == Some(kind)
    }
}

//! Consumed record wrapper.
//!
//! The serde layer only ever looks at payload bytes. Everything else a broker
//! hands back (topic, partition, offset, key, headers) travels next to the
//! decoded payload untouched.

use crate::proto::ProtoMessage;

/// A decoded record with its transport metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Decoded message payload
    pub payload: Payload,
    /// Topic name
    pub topic: String,
    /// Partition number
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
    /// Record headers, in the order the broker returned them
    pub headers: Vec<MessageHeader>,
}

/// A single record header. Header values are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl MessageHeader {
    pub fn new(key: impl Into<String>, value: Option<&[u8]>) -> Self {
        Self {
            key: key.into(),
            value: value.map(|v| v.to_vec()),
        }
    }
}

/// Message payload variants.
///
/// Only schema-registry framed protobuf is produced by the deserializer today.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Protobuf message decoded through the schema registry
    Protobuf(ProtoMessage),
}

impl Message {
    /// Returns the decoded protobuf payload.
    pub fn protobuf(&self) -> &ProtoMessage {
        match &self.payload {
            Payload::Protobuf(message) => message,
        }
    }

    /// Looks up the first header with the given key.
    pub fn header(&self, key: &str) -> Option<&MessageHeader> {
        self.headers.iter().find(|h| h.key == key)
    }
}

//! Blocking wrappers around the async serializer and deserializer.
//!
//! Each wrapper owns a current-thread tokio runtime and drives the async call
//! to completion with `block_on`. Calling them from inside a tokio runtime
//! panics; async callers should use the async types directly, which can also
//! be cancelled by dropping the future.

use crate::deserializer::{ProtobufDeserializer, RecordMetadata};
use crate::error::{Error, Result};
use crate::serializer::ProtobufSerializer;
use schema_registry_types::{Message, ProtoMessage};
use tokio::runtime::{Builder, Runtime};

fn runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("Failed to start blocking runtime: {e}")))
}

pub struct BlockingSerializer {
    inner: ProtobufSerializer,
    runtime: Runtime,
}

impl BlockingSerializer {
    pub fn new(inner: ProtobufSerializer) -> Result<Self> {
        Ok(Self {
            inner,
            runtime: runtime()?,
        })
    }

    pub fn serialize(&self, topic: &str, message: &ProtoMessage) -> Result<Vec<u8>> {
        self.runtime.block_on(self.inner.serialize(topic, message))
    }
}

pub struct BlockingDeserializer {
    inner: ProtobufDeserializer,
    runtime: Runtime,
}

impl BlockingDeserializer {
    pub fn new(inner: ProtobufDeserializer) -> Result<Self> {
        Ok(Self {
            inner,
            runtime: runtime()?,
        })
    }

    pub fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<ProtoMessage> {
        self.runtime.block_on(self.inner.deserialize(topic, bytes))
    }

    pub fn deserialize_record(
        &self,
        topic: &str,
        bytes: &[u8],
        metadata: RecordMetadata,
    ) -> Result<Message> {
        self.runtime
            .block_on(self.inner.deserialize_record(topic, bytes, metadata))
    }
}

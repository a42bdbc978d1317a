use crate::config::DeserializerConfig;
use crate::error::{Error, Result};
use crate::proto::ProtoDecoder;
use crate::registry::SchemaRegistryClient;
use crate::type_registry::TypeRegistry;
use crate::wire::{WireEnvelope, HEADER_LEN};
use schema_registry_types::{Message, MessageHeader, Payload, ProtoMessage};
use std::sync::Arc;
use tracing::debug;

/// Broker metadata of a consumed record, carried through untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
    pub headers: Vec<MessageHeader>,
}

/// Turns registry-framed bytes back into [`ProtoMessage`]s
///
/// The envelope names its schema id, so decoding needs nothing but registry
/// access. `Any` fields are resolved through the [`TypeRegistry`].
#[derive(Debug, Clone)]
pub struct ProtobufDeserializer {
    client: SchemaRegistryClient,
    types: Arc<TypeRegistry>,
    config: DeserializerConfig,
}

impl ProtobufDeserializer {
    pub fn new(
        client: SchemaRegistryClient,
        types: Arc<TypeRegistry>,
        config: DeserializerConfig,
    ) -> Self {
        Self {
            client,
            types,
            config,
        }
    }

    pub fn client(&self) -> &SchemaRegistryClient {
        &self.client
    }

    /// Decode a payload consumed from `topic`.
    ///
    /// A malformed envelope fails before any registry request. Either the
    /// whole message decodes or an error is returned.
    pub async fn deserialize(&self, topic: &str, bytes: &[u8]) -> Result<ProtoMessage> {
        let envelope = WireEnvelope::parse(bytes)?;
        let descriptor = self.client.lookup(envelope.schema_id).await?;

        let message_descriptor = descriptor
            .parsed
            .message_by_index_path(&envelope.message_indexes)
            .ok_or_else(|| Error::Decode {
                schema_id: Some(envelope.schema_id),
                message_type: descriptor.parsed.file_name.clone(),
                offset: HEADER_LEN,
                message: format!(
                    "no message at index path {:?}",
                    envelope.message_indexes
                ),
            })?;

        let message = ProtoDecoder::new(&descriptor.parsed)
            .with_type_registry(&self.types)
            .with_schema_id(envelope.schema_id)
            .with_base_offset(envelope.payload_offset)
            .decode_descriptor(message_descriptor, envelope.payload)?;

        // Subject naming may need the message type, which is only known now.
        let subject = self
            .config
            .subject_name_strategy
            .subject(topic, self.config.serde_type, &message.message_type)
            .unwrap_or_else(|_| topic.to_string());
        debug!(
            "Deserialized {} from {subject} with schema id {}",
            message.message_type, envelope.schema_id
        );
        Ok(message)
    }

    /// Decode a consumed record, passing its metadata through.
    pub async fn deserialize_record(
        &self,
        topic: &str,
        bytes: &[u8],
        metadata: RecordMetadata,
    ) -> Result<Message> {
        let message = self.deserialize(topic, bytes).await?;
        Ok(Message {
            payload: Payload::Protobuf(message),
            topic: topic.to_string(),
            partition: metadata.partition,
            offset: metadata.offset,
            key: metadata.key,
            timestamp: metadata.timestamp,
            headers: metadata.headers,
        })
    }
}

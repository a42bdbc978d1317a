use crate::config::SerializerConfig;
use crate::error::{Error, Result};
use crate::proto::{is_well_known_import, ProtoEncoder};
use crate::registry::{RegistrySchema, SchemaDescriptor, SchemaReference, SchemaRegistryClient};
use crate::type_registry::TypeRegistry;
use crate::wire::encode_envelope;
use futures::future::BoxFuture;
use schema_registry_types::{ProtoMessage, ProtoSchema};
use std::sync::Arc;
use tracing::debug;

/// Turns [`ProtoMessage`]s into registry-framed bytes
///
/// The message's type must be registered in the [`TypeRegistry`]: its schema
/// is what gets registered (or looked up) under the subject, and its position
/// in that schema becomes the envelope's message-index path.
#[derive(Debug, Clone)]
pub struct ProtobufSerializer {
    client: SchemaRegistryClient,
    types: Arc<TypeRegistry>,
    config: SerializerConfig,
}

impl ProtobufSerializer {
    pub fn new(client: SchemaRegistryClient, types: Arc<TypeRegistry>, config: SerializerConfig) -> Self {
        Self {
            client,
            types,
            config,
        }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    pub fn client(&self) -> &SchemaRegistryClient {
        &self.client
    }

    /// Serialize `message` for `topic`.
    ///
    /// Output is byte-identical for the same schema id and message content.
    /// With `auto_register_schemas` this may register a new schema version.
    pub async fn serialize(&self, topic: &str, message: &ProtoMessage) -> Result<Vec<u8>> {
        let registered = self.types.resolve(&message.message_type)?;
        if !registered.is_root_type() {
            return Err(Error::Config(format!(
                "{} is only known through an import of {}; register the schema that defines it",
                message.message_type, registered.schema.file_name
            )));
        }

        let subject = self.config.subject_name_strategy.subject(
            topic,
            self.config.serde_type,
            &message.message_type,
        )?;

        let (schema_id, message_indexes) = if let Some(id) = self.config.use_schema_id {
            let descriptor = self.client.lookup(id).await?;
            (id, index_path_in(&descriptor, &message.message_type)?)
        } else if self.config.use_latest_version {
            let descriptor = self.client.latest(&subject).await?;
            (descriptor.id, index_path_in(&descriptor, &message.message_type)?)
        } else {
            let schema = self.registry_schema(&registered.schema).await?;
            let id = if self.config.auto_register_schemas {
                self.client
                    .register(&subject, &schema, self.config.normalize_schemas)
                    .await?
            } else {
                self.client
                    .lookup_id(&subject, &schema, self.config.normalize_schemas)
                    .await?
                    .id
            };
            (id, registered.descriptor.index_path.clone())
        };

        let payload = ProtoEncoder::encode(message)?;
        debug!(
            "Serialized {} for {subject} with schema id {schema_id} ({} payload bytes)",
            message.message_type,
            payload.len()
        );
        encode_envelope(schema_id, &message_indexes, &payload)
    }

    /// The registry form of a local schema, with its imports resolved to
    /// registered references.
    async fn registry_schema(&self, schema: &ProtoSchema) -> Result<RegistrySchema> {
        let references = self.references(schema, &schema.file_name).await?;
        Ok(RegistrySchema::protobuf(schema.source.clone(), references))
    }

    /// References for the imports of `file`, each registered under a subject
    /// named after its import path.
    fn references<'a>(
        &'a self,
        schema: &'a ProtoSchema,
        file: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SchemaReference>>> {
        Box::pin(async move {
            let mut references = Vec::new();
            for import in schema.imports_of(file) {
                if is_well_known_import(import) {
                    continue;
                }
                let dependency = schema
                    .dependencies
                    .iter()
                    .find(|d| &d.name == import)
                    .ok_or_else(|| {
                        Error::Encode(format!("No source for import {import} of {file}"))
                    })?;

                let nested = self.references(schema, import).await?;
                let dependency_schema = RegistrySchema::protobuf(dependency.source.clone(), nested);
                let normalize = self.config.normalize_schemas;
                if self.config.auto_register_schemas {
                    self.client
                        .register(import, &dependency_schema, normalize)
                        .await?;
                }
                let found = self
                    .client
                    .lookup_id(import, &dependency_schema, normalize)
                    .await?;
                let version = found.version.ok_or_else(|| {
                    Error::SchemaNotFound {
                        what: format!("version of {import}"),
                        error_code: None,
                    }
                })?;
                references.push(SchemaReference {
                    name: import.clone(),
                    subject: import.clone(),
                    version,
                });
            }
            Ok(references)
        })
    }
}

/// Index path of `message_type` within a schema that came from the registry.
fn index_path_in(descriptor: &SchemaDescriptor, message_type: &str) -> Result<Vec<i32>> {
    descriptor
        .parsed
        .get_message(message_type)
        .filter(|m| m.file == descriptor.parsed.file_name)
        .map(|m| m.index_path.clone())
        .ok_or_else(|| {
            Error::Encode(format!(
                "Schema id {} does not define {message_type}",
                descriptor.id
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SchemaCache;
    use crate::config::SubjectNameStrategy;
    use crate::proto::ProtoParser;
    use crate::registry::InMemoryRegistry;
    use crate::wire::WireEnvelope;
    use schema_registry_types::{ProtoDependency, ProtoFieldValue};

    const ORDERS: &str = r#"syntax = "proto3";
package shop;
message Order {
  string id = 1;
  int64 quantity = 2;
  message Line { string sku = 1; }
}
message Refund { string order_id = 1; }
"#;

    fn setup(config: SerializerConfig) -> (ProtobufSerializer, Arc<InMemoryRegistry>, Arc<ProtoSchema>) {
        let registry = Arc::new(InMemoryRegistry::new());
        let client = SchemaRegistryClient::with_transport(registry.clone(), SchemaCache::unbounded());
        let schema = Arc::new(ProtoParser::parse_str(ORDERS).unwrap());
        let mut types = TypeRegistry::new();
        types.register_schema(schema.clone());
        (
            ProtobufSerializer::new(client, Arc::new(types), config),
            registry,
            schema,
        )
    }

    fn order(schema: &ProtoSchema) -> ProtoMessage {
        ProtoMessage::new(schema.get_message("shop.Order").unwrap())
            .with_field("id", ProtoFieldValue::String("o-1".to_string()))
            .unwrap()
            .with_field("quantity", ProtoFieldValue::Int64(3))
            .unwrap()
    }

    #[tokio::test]
    async fn test_auto_register_frames_payload() {
        let (serializer, registry, schema) = setup(SerializerConfig::default());
        let bytes = serializer.serialize("orders", &order(&schema)).await.unwrap();

        let envelope = WireEnvelope::parse(&bytes).unwrap();
        assert_eq!(envelope.schema_id, 1);
        assert_eq!(envelope.message_indexes, vec![0]);
        assert_eq!(&bytes[..6], &[0, 0, 0, 0, 1, 0]);
        assert_eq!(envelope.payload, ProtoEncoder::encode(&order(&schema)).unwrap().as_slice());

        // The second call is served from the cache.
        let again = serializer.serialize("orders", &order(&schema)).await.unwrap();
        assert_eq!(bytes, again);
        assert_eq!(registry.requests().register, 1);
    }

    #[tokio::test]
    async fn test_nested_and_second_messages_carry_index_path() {
        let (serializer, _registry, schema) = setup(SerializerConfig::default());

        let refund = ProtoMessage::new(schema.get_message("shop.Refund").unwrap());
        let bytes = serializer.serialize("orders", &refund).await.unwrap();
        assert_eq!(WireEnvelope::parse(&bytes).unwrap().message_indexes, vec![1]);

        let line = ProtoMessage::new(schema.get_message("shop.Order.Line").unwrap());
        let bytes = serializer.serialize("orders", &line).await.unwrap();
        assert_eq!(WireEnvelope::parse(&bytes).unwrap().message_indexes, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_without_auto_register_missing_schema_is_fatal() {
        let config = SerializerConfig {
            auto_register_schemas: false,
            ..Default::default()
        };
        let (serializer, registry, schema) = setup(config);
        let err = serializer.serialize("orders", &order(&schema)).await.unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { .. }));
        assert_eq!(registry.requests().register, 0);

        registry
            .insert_with_id("orders-value", 12, RegistrySchema::protobuf(ORDERS, vec![]))
            .unwrap();
        let bytes = serializer.serialize("orders", &order(&schema)).await.unwrap();
        assert_eq!(WireEnvelope::parse(&bytes).unwrap().schema_id, 12);
    }

    #[tokio::test]
    async fn test_pinned_schema_id() {
        let config = SerializerConfig {
            use_schema_id: Some(40),
            ..Default::default()
        };
        let (serializer, registry, schema) = setup(config);
        registry
            .insert_with_id("anything", 40, RegistrySchema::protobuf(ORDERS, vec![]))
            .unwrap();

        let refund = ProtoMessage::new(schema.get_message("shop.Refund").unwrap());
        let bytes = serializer.serialize("orders", &refund).await.unwrap();
        let envelope = WireEnvelope::parse(&bytes).unwrap();
        assert_eq!((envelope.schema_id, envelope.message_indexes), (40, vec![1]));
        assert_eq!(registry.requests().register, 0);
    }

    #[tokio::test]
    async fn test_latest_version_must_define_type() {
        let config = SerializerConfig {
            use_latest_version: true,
            ..Default::default()
        };
        let (serializer, registry, schema) = setup(config);
        registry
            .insert_with_id(
                "orders-value",
                5,
                RegistrySchema::protobuf("syntax = \"proto3\";\nmessage Other { int32 x = 1; }\n", vec![]),
            )
            .unwrap();

        let err = serializer.serialize("orders", &order(&schema)).await.unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[tokio::test]
    async fn test_record_name_subject() {
        let config = SerializerConfig {
            subject_name_strategy: SubjectNameStrategy::RecordName,
            ..Default::default()
        };
        let (serializer, registry, schema) = setup(config);
        serializer.serialize("orders", &order(&schema)).await.unwrap();
        assert_eq!(registry.versions("shop.Order"), 1);
        assert_eq!(registry.versions("orders-value"), 0);
    }

    #[tokio::test]
    async fn test_unregistered_type() {
        let (serializer, _registry, _schema) = setup(SerializerConfig::default());
        let other = ProtoParser::parse_str("syntax = \"proto3\";\nmessage Stray { int32 x = 1; }\n").unwrap();
        let stray = ProtoMessage::new(other.get_message("Stray").unwrap());
        let err = serializer.serialize("orders", &stray).await.unwrap_err();
        assert!(matches!(err, Error::UnregisteredType(_)));
    }

    #[tokio::test]
    async fn test_imports_are_registered_as_references() {
        let address = "syntax = \"proto3\";\npackage common;\nmessage Address { string city = 1; }\n";
        let person = ProtoParser::parse_file_set(
            "person.proto",
            "syntax = \"proto3\";\npackage people;\nimport \"common/address.proto\";\nmessage Person { common.Address home = 1; }\n",
            &[ProtoDependency {
                name: "common/address.proto".to_string(),
                source: address.to_string(),
            }],
        )
        .unwrap();
        let person = Arc::new(person);

        let registry = Arc::new(InMemoryRegistry::new());
        let client = SchemaRegistryClient::with_transport(registry.clone(), SchemaCache::unbounded());
        let mut types = TypeRegistry::new();
        types.register_schema(person.clone());
        let serializer = ProtobufSerializer::new(client, Arc::new(types), SerializerConfig::default());

        let message = ProtoMessage::new(person.get_message("people.Person").unwrap());
        let bytes = serializer.serialize("people", &message).await.unwrap();

        // Address registered first (id 1), then the person schema (id 2).
        assert_eq!(WireEnvelope::parse(&bytes).unwrap().schema_id, 2);
        assert_eq!(registry.versions("common/address.proto"), 1);
        assert_eq!(registry.requests().register, 2);
    }
}

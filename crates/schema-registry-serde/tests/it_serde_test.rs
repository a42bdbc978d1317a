//! Serializer and deserializer behaviour against the in-memory registry

use schema_registry_serde::{
    pack_any, DeserializerConfig, Error, InMemoryRegistry, ProtoFieldValue, ProtoMessage,
    ProtoParser, ProtoSchema, ProtobufDeserializer, ProtobufSerializer, RegistrySchema,
    SchemaCache, SchemaRegistryClient, SerializerConfig, TypeRegistry,
};
use std::sync::Arc;
use std::time::Duration;

const USER_PROTO: &str = r#"syntax = "proto3";
package io.confluent.demo;

import "google/protobuf/any.proto";

message User {
  string name = 1;
  int64 favorite_number = 2;
  string favorite_color = 3;
  google.protobuf.Any extra_data = 4;
  repeated int32 lucky = 5;
}

message Preferences {
  string language = 1;
  bool dark_mode = 2;
}
"#;

struct Harness {
    registry: Arc<InMemoryRegistry>,
    schema: Arc<ProtoSchema>,
    serializer: ProtobufSerializer,
    deserializer: ProtobufDeserializer,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let schema = Arc::new(ProtoParser::parse_str(USER_PROTO).expect("Failed to parse proto"));
        let mut types = TypeRegistry::new();
        types.register_schema(schema.clone());
        let types = Arc::new(types);

        Self {
            serializer: ProtobufSerializer::new(
                SchemaRegistryClient::with_transport(registry.clone(), SchemaCache::unbounded()),
                types.clone(),
                SerializerConfig::default(),
            ),
            deserializer: ProtobufDeserializer::new(
                SchemaRegistryClient::with_transport(registry.clone(), SchemaCache::unbounded()),
                types,
                DeserializerConfig::default(),
            ),
            registry,
            schema,
        }
    }

    fn user(&self) -> ProtoMessage {
        let preferences = ProtoMessage::new(self.schema.get_message("Preferences").unwrap())
            .with_field("language", ProtoFieldValue::String("en".to_string()))
            .unwrap()
            .with_field("dark_mode", ProtoFieldValue::Bool(true))
            .unwrap();
        ProtoMessage::new(self.schema.get_message("User").unwrap())
            .with_field("name", ProtoFieldValue::String("First user".to_string()))
            .unwrap()
            .with_field("favorite_number", ProtoFieldValue::Int64(42))
            .unwrap()
            .with_field("favorite_color", ProtoFieldValue::String("blue".to_string()))
            .unwrap()
            .with_field("extra_data", pack_any(&preferences))
            .unwrap()
            .with_field(
                "lucky",
                ProtoFieldValue::Repeated(vec![
                    ProtoFieldValue::Int32(7),
                    ProtoFieldValue::Int32(-3),
                ]),
            )
            .unwrap()
    }
}

#[tokio::test]
async fn round_trip_preserves_message() {
    //* Given
    let harness = Harness::new();
    let user = harness.user();

    //* When
    let bytes = harness.serializer.serialize("users", &user).await.unwrap();
    let decoded = harness.deserializer.deserialize("users", &bytes).await.unwrap();

    //* Then
    assert_eq!(decoded, user);
    assert_eq!(bytes[0], 0);
}

#[tokio::test]
async fn serialization_is_deterministic() {
    //* Given
    let harness = Harness::new();

    //* When
    let first = harness.serializer.serialize("users", &harness.user()).await.unwrap();
    let second = harness.serializer.serialize("users", &harness.user()).await.unwrap();

    //* Then
    assert_eq!(first, second);
}

#[tokio::test]
async fn corrupted_magic_byte_never_reaches_registry() {
    //* Given
    let harness = Harness::new();
    let mut bytes = harness.serializer.serialize("users", &harness.user()).await.unwrap();
    let before = harness.registry.requests();

    //* When
    let mut errors = Vec::new();
    for magic in [1u8, 0x7f, 0xff] {
        bytes[0] = magic;
        errors.push(harness.deserializer.deserialize("users", &bytes).await.unwrap_err());
    }

    //* Then
    assert!(errors
        .iter()
        .all(|e| matches!(e, Error::Format { offset: 0, .. })));
    assert_eq!(harness.registry.requests(), before);
}

#[tokio::test]
async fn schema_id_is_fetched_once() {
    //* Given
    let harness = Harness::new();
    harness
        .registry
        .insert_with_id("users-value", 7, RegistrySchema::protobuf(USER_PROTO, vec![]))
        .unwrap();
    // id 7, index [1] (Preferences), then language = "de"
    let bytes = [0, 0, 0, 0, 7, 2, 2, 0x0a, 2, b'd', b'e'];

    //* When
    for _ in 0..5 {
        let decoded = harness.deserializer.deserialize("users", &bytes).await.unwrap();
        assert_eq!(decoded.message_type, "io.confluent.demo.Preferences");
    }

    //* Then
    assert_eq!(harness.registry.lookups_for_id(7), 1);
}

#[tokio::test]
async fn unregistered_any_type_fails_without_touching_cache() {
    //* Given
    let harness = Harness::new();
    let bytes = harness.serializer.serialize("users", &harness.user()).await.unwrap();

    let mut reader_types = TypeRegistry::new();
    reader_types
        .register_message(harness.schema.clone(), "io.confluent.demo.User")
        .unwrap();
    let reader_client =
        SchemaRegistryClient::with_transport(harness.registry.clone(), SchemaCache::unbounded());
    let reader = ProtobufDeserializer::new(
        reader_client.clone(),
        Arc::new(reader_types),
        DeserializerConfig::default(),
    );
    reader_client.lookup(1).await.unwrap();
    let cached = format!("{:?}", reader_client.cache());

    //* When
    let err = reader.deserialize("users", &bytes).await.unwrap_err();

    //* Then
    assert!(
        matches!(err, Error::UnregisteredType(ref name) if name == "type.googleapis.com/io.confluent.demo.Preferences")
    );
    assert_eq!(format!("{:?}", reader_client.cache()), cached);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_converge_on_one_descriptor() {
    //* Given
    let harness = Harness::new();
    let bytes = harness.serializer.serialize("users", &harness.user()).await.unwrap();
    harness.registry.set_latency(Duration::from_millis(25));
    let client = SchemaRegistryClient::with_transport(harness.registry.clone(), SchemaCache::unbounded());

    //* When
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.lookup(1).await })
        })
        .collect();
    let mut descriptors = Vec::new();
    for handle in handles {
        descriptors.push(handle.await.unwrap().unwrap());
    }

    //* Then
    let cached = client.cache().get(1).unwrap();
    assert!(descriptors.iter().all(|d| Arc::ptr_eq(d, &cached)));
    assert_eq!(harness.registry.lookups_for_id(1), 1);
    assert_eq!(client.pending_lookups(), 0);
    assert!(!bytes.is_empty());
}

#[tokio::test]
async fn abandoned_deserialize_releases_lookup() {
    //* Given
    let harness = Harness::new();
    let bytes = harness.serializer.serialize("users", &harness.user()).await.unwrap();
    harness.registry.set_latency(Duration::from_millis(500));

    //* When
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        harness.deserializer.deserialize("users", &bytes),
    )
    .await;

    //* Then
    assert!(abandoned.is_err());
    assert_eq!(harness.deserializer.client().pending_lookups(), 0);
    assert!(harness.deserializer.client().cache().is_empty());

    harness.registry.set_latency(Duration::ZERO);
    let decoded = harness.deserializer.deserialize("users", &bytes).await.unwrap();
    assert_eq!(decoded, harness.user());
}

#[tokio::test]
async fn headers_pass_through_untouched() {
    //* Given
    let harness = Harness::new();
    let bytes = harness.serializer.serialize("users", &harness.user()).await.unwrap();
    let headers = vec![
        schema_registry_serde::MessageHeader::new("myTestHeader", Some(b"header values are binary")),
        schema_registry_serde::MessageHeader::new("trace", Some(&[0xff, 0x00, 0x10])),
    ];

    //* When
    let record = harness
        .deserializer
        .deserialize_record(
            "users",
            &bytes,
            schema_registry_serde::RecordMetadata {
                headers: headers.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    //* Then
    assert_eq!(record.headers, headers);
    assert_eq!(record.protobuf(), &harness.user());
}

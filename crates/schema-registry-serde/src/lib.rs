//! Schema-registry-aware Protobuf serialization for Kafka payloads.
//!
//! This crate provides:
//! - A cache-first schema registry client (HTTP, or in memory for `mock://` urls)
//! - The wire envelope shared with other registry-aware clients
//! - Runtime Protobuf encoding and decoding, without code generation
//! - A serializer and deserializer built on the above, async and blocking
//!
//! # Features
//!
//! - Schema Cache: resolved schemas are kept by id, subject/version and
//!   fingerprint, and concurrent misses converge on one entry
//! - Schema References: imports are registered and resolved as registry references
//! - Message Indexes: any message of a schema file can be framed, not only the first
//! - `Any` Resolution: boxed sub-messages are decoded through a [`TypeRegistry`]
//!
//! # Dependency Direction
//!
//! Message and schema values are defined in `schema-registry-types` and
//! re-exported here.

pub mod blocking;
pub mod cache;
pub mod config;
pub mod deserializer;
pub mod error;
pub mod proto;

/// Registry client and transports
///
/// The client consults the cache before every request and fills it from
/// successful responses.
pub mod registry;
pub mod serializer;
pub mod type_registry;
pub mod wire;

pub use schema_registry_types::{
    Message, MessageHeader, Payload, ProtoDependency, ProtoFieldDescriptor, ProtoFieldValue,
    ProtoMessage, ProtoMessageDescriptor, ProtoSchema, ProtoType,
};

pub use cache::SchemaCache;
pub use config::{
    BasicAuth, DeserializerConfig, RegistryConfig, SerdeType, SerializerConfig,
    SubjectNameStrategy,
};
pub use deserializer::{ProtobufDeserializer, RecordMetadata};
pub use error::{Error, Result};
pub use proto::{pack_any, ProtoDecoder, ProtoEncoder, ProtoParser};
pub use registry::{
    InMemoryRegistry, RegistrySchema, SchemaDescriptor, SchemaReference, SchemaRegistryClient,
};
pub use serializer::ProtobufSerializer;
pub use type_registry::TypeRegistry;
pub use wire::WireEnvelope;

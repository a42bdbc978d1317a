//! Shared types for the schema-registry serde layer.
//!
//! This crate defines the runtime representation of protobuf schemas and
//! messages. No code generation is involved: schemas are parsed from `.proto`
//! text at runtime (see `schema-registry-serde`), and messages are plain
//! values that carry their own descriptor.
//!
//! # Modules
//!
//! - [`proto`] - schema descriptors and decoded message values
//! - [`message`] - transport-level wrapper for consumed records
//! - [`error`] - errors raised while building messages by hand
//!
//! # Example
//!
//! ```ignore
//! use schema_registry_types::{ProtoFieldValue, ProtoMessage};
//!
//! let descriptor = schema.get_message("User").unwrap();
//! let user = ProtoMessage::new(descriptor)
//!     .with_field("name", ProtoFieldValue::String("First user".to_string()))?
//!     .with_field("favorite_number", ProtoFieldValue::Int64(42))?;
//! ```

pub mod error;
pub mod message;
pub mod proto;

pub use error::{Result, SchemaTypesError};
pub use message::{Message, MessageHeader, Payload};
pub use proto::{
    ProtoDependency, ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor,
    ProtoSchema, ProtoType, ANY_TYPE_NAME, ANY_TYPE_URL_PREFIX,
};

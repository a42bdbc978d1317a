//! Schema registry access.
//!
//! [`SchemaRegistryClient`] is the cache-first client used by the serializer
//! and deserializer. It talks to the registry through a [`RegistryTransport`]:
//! [`HttpTransport`] for a real registry, [`InMemoryRegistry`] for `mock://`
//! URLs and tests.

pub mod client;
pub mod http;
pub mod memory;

pub use client::SchemaRegistryClient;
pub use http::HttpTransport;
pub use memory::InMemoryRegistry;

use crate::error::Result;
use async_trait::async_trait;
use schema_registry_types::ProtoSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

pub const PROTOBUF_SCHEMA_TYPE: &str = "PROTOBUF";

/// A reference from one registered schema to another (an `import`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaReference {
    /// Import path as written in the referencing schema
    pub name: String,
    pub subject: String,
    pub version: i32,
}

/// Schema text as stored by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySchema {
    pub schema: String,
    /// Absent for Avro, which is the registry default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub references: Vec<SchemaReference>,
}

impl RegistrySchema {
    pub fn protobuf(schema: impl Into<String>, references: Vec<SchemaReference>) -> Self {
        Self {
            schema: schema.into(),
            schema_type: Some(PROTOBUF_SCHEMA_TYPE.to_string()),
            references,
        }
    }

    pub fn is_protobuf(&self) -> bool {
        self.schema_type.as_deref() == Some(PROTOBUF_SCHEMA_TYPE)
    }

    /// Hex SHA-256 over type, text and references.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.schema_type.as_deref().unwrap_or("AVRO").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.schema.as_bytes());
        for reference in &self.references {
            hasher.update([0u8]);
            hasher.update(reference.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(reference.subject.as_bytes());
            hasher.update(reference.version.to_be_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// A schema as registered under a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSchema {
    pub subject: String,
    pub id: u32,
    pub version: i32,
    #[serde(flatten)]
    pub schema: RegistrySchema,
}

/// Version selector of `/subjects/{subject}/versions/{version}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    Number(i32),
    Latest,
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVersion::Number(v) => write!(f, "{v}"),
            SchemaVersion::Latest => write!(f, "latest"),
        }
    }
}

/// A resolved, immutable schema
///
/// Built once when a registry response is first cached and shared as
/// `Arc<SchemaDescriptor>` afterwards.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    pub id: u32,
    /// Known when the schema was reached through a subject
    pub subject: Option<String>,
    pub version: Option<i32>,
    pub schema: RegistrySchema,
    pub fingerprint: String,
    /// The schema text with its references, parsed
    pub parsed: Arc<ProtoSchema>,
}

/// Raw registry operations, without caching
///
/// Errors follow the registry status mapping: 401/403 are `Auth`, 404 is
/// `SchemaNotFound`, transport failures are `Network`, and anything else
/// unsuccessful is `Registry`.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// `GET /schemas/ids/{id}`
    async fn schema_by_id(&self, id: u32) -> Result<RegistrySchema>;

    /// `GET /subjects/{subject}/versions/{version}`
    async fn subject_version(&self, subject: &str, version: SchemaVersion) -> Result<SubjectSchema>;

    /// `POST /subjects/{subject}/versions`, returning the schema id
    async fn register(&self, subject: &str, schema: &RegistrySchema, normalize: bool) -> Result<u32>;

    /// `POST /subjects/{subject}`
    async fn lookup_schema(
        &self,
        subject: &str,
        schema: &RegistrySchema,
        normalize: bool,
    ) -> Result<SubjectSchema>;

    /// `POST /compatibility/subjects/{subject}/versions/latest`
    async fn check_compatibility(&self, subject: &str, schema: &RegistrySchema) -> Result<bool>;
}

//! Error types for schema-registry-types crate.

use crate::proto::ProtoType;
use thiserror::Error;

/// Errors raised when a message is assembled by hand against its descriptor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaTypesError {
    #[error("Field '{field}' not found in message {message_type}")]
    FieldNotFound { message_type: String, field: String },

    #[error("Invalid value for field '{field}': expected {expected}, got {actual}")]
    InvalidFieldType {
        field: String,
        expected: ProtoType,
        actual: ProtoType,
    },
}

/// Result type alias for schema-registry-types operations.
pub type Result<T> = std::result::Result<T, SchemaTypesError>;

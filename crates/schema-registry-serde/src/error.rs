use schema_registry_types::SchemaTypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema registry unreachable at {url}: {message}")]
    Network { url: String, message: String },

    #[error("Schema registry rejected credentials (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Malformed wire envelope at byte {offset}: {message}")]
    Format { offset: usize, message: String },

    #[error("Schema not found: {what} (registry error code {error_code:?})")]
    SchemaNotFound {
        what: String,
        error_code: Option<u32>,
    },

    #[error("Failed to decode {message_type} with schema id {schema_id:?} at byte {offset}: {message}")]
    Decode {
        schema_id: Option<u32>,
        message_type: String,
        offset: usize,
        message: String,
    },

    #[error("Protobuf encode error: {0}")]
    Encode(String),

    #[error("Message type not registered: {0}")]
    UnregisteredType(String),

    #[error("Protobuf parse error: {0}")]
    SchemaParse(String),

    #[error("Schema registry error (status {status}, code {error_code:?}): {message}")]
    Registry {
        status: u16,
        error_code: Option<u32>,
        message: String,
    },
}

impl Error {
    /// Whether a caller may retry the failed call unchanged.
    ///
    /// There is no retry built into this crate; this only classifies.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } => true,
            Error::Registry { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn decode(
        schema_id: Option<u32>,
        message_type: &str,
        offset: u64,
        message: impl std::fmt::Display,
    ) -> Self {
        Error::Decode {
            schema_id,
            message_type: message_type.to_string(),
            offset: offset as usize,
            message: message.to_string(),
        }
    }
}

impl From<SchemaTypesError> for Error {
    fn from(err: SchemaTypesError) -> Self {
        Error::Encode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let network = Error::Network {
            url: "http://registry".to_string(),
            message: "timed out".to_string(),
        };
        assert!(network.is_retryable());

        let auth = Error::Auth {
            status: 401,
            message: "Unauthorized".to_string(),
        };
        assert!(!auth.is_retryable());

        let unavailable = Error::Registry {
            status: 503,
            error_code: None,
            message: "unavailable".to_string(),
        };
        assert!(unavailable.is_retryable());

        let incompatible = Error::Registry {
            status: 409,
            error_code: Some(409),
            message: "incompatible".to_string(),
        };
        assert!(!incompatible.is_retryable());
    }

    #[test]
    fn test_display_carries_context() {
        let err = Error::decode(Some(7), "example.User", 12, "truncated varint");
        let text = err.to_string();
        assert!(text.contains("example.User"));
        assert!(text.contains("Some(7)"));
        assert!(text.contains("byte 12"));
    }
}

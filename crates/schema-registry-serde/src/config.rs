use crate::error::{Error, Result};
use std::num::NonZeroUsize;
use std::time::Duration;

/// URL scheme that selects the in-process registry instead of HTTP.
pub const MOCK_SCHEME: &str = "mock://";

/// Basic-auth credentials for the schema registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse the registry's `USER_INFO` form, `"key:secret"`.
    ///
    /// Only the first `:` separates the two parts, so secrets may contain `:`.
    pub fn from_user_info(user_info: &str) -> Result<Self> {
        let (username, password) = user_info.split_once(':').ok_or_else(|| {
            Error::Config("basic auth user info must have the form <key>:<secret>".to_string())
        })?;
        if username.is_empty() {
            return Err(Error::Config(
                "basic auth user info has an empty key".to_string(),
            ));
        }
        Ok(Self::new(username, password))
    }
}

/// Configuration for the schema registry client
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry base URL, e.g. `https://psrc-xxxx.confluent.cloud`
    ///
    /// A `mock://<scope>` URL selects the in-memory registry.
    pub url: String,
    /// Credentials sent with every request
    pub basic_auth: Option<BasicAuth>,
    /// Per-request timeout, covering connect and body
    pub request_timeout: Duration,
    /// Upper bound on cached schemas per index
    ///
    /// `None` keeps every schema ever resolved, which is the usual choice:
    /// schemas are small and a process only sees a handful of them.
    pub cache_capacity: Option<NonZeroUsize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
            basic_auth: None,
            request_timeout: Duration::from_secs(30),
            cache_capacity: None,
        }
    }
}

impl RegistryConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth::new(username, password));
        self
    }

    pub fn is_mock(&self) -> bool {
        self.url.starts_with(MOCK_SCHEME)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("schema registry url is empty".to_string()));
        }
        if !self.is_mock() && !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(Error::Config(format!(
                "schema registry url must start with http://, https:// or {MOCK_SCHEME}: {}",
                self.url
            )));
        }
        if let Some(auth) = &self.basic_auth {
            if auth.username.is_empty() {
                return Err(Error::Config(
                    "schema registry api key is empty".to_string(),
                ));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "schema registry request timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether a payload is a record key or a record value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerdeType {
    Key,
    #[default]
    Value,
}

impl SerdeType {
    pub fn suffix(&self) -> &'static str {
        match self {
            SerdeType::Key => "key",
            SerdeType::Value => "value",
        }
    }
}

/// How a registry subject is derived from a topic and a message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubjectNameStrategy {
    /// `{topic}-key` / `{topic}-value`
    #[default]
    TopicName,
    /// `{fully.qualified.Message}`
    RecordName,
    /// `{topic}-{fully.qualified.Message}`
    TopicRecordName,
}

impl SubjectNameStrategy {
    pub fn subject(&self, topic: &str, serde_type: SerdeType, message_type: &str) -> Result<String> {
        let message_type = message_type.trim_start_matches('.');
        let needs_topic = !matches!(self, SubjectNameStrategy::RecordName);
        if needs_topic && topic.is_empty() {
            return Err(Error::Config(format!(
                "{self:?} subject naming needs a topic"
            )));
        }
        if !matches!(self, SubjectNameStrategy::TopicName) && message_type.is_empty() {
            return Err(Error::Config(format!(
                "{self:?} subject naming needs a message type"
            )));
        }
        Ok(match self {
            SubjectNameStrategy::TopicName => format!("{topic}-{}", serde_type.suffix()),
            SubjectNameStrategy::RecordName => message_type.to_string(),
            SubjectNameStrategy::TopicRecordName => format!("{topic}-{message_type}"),
        })
    }
}

/// Configuration for the protobuf serializer
#[derive(Debug, Clone)]
pub struct SerializerConfig {
    /// Register the message's schema when the subject does not have it yet
    ///
    /// This mutates registry state. With it off, a schema missing from the
    /// subject is a `SchemaNotFound` error.
    pub auto_register_schemas: bool,
    /// Encode with the subject's latest version instead of the local schema
    pub use_latest_version: bool,
    /// Always encode with this schema id
    pub use_schema_id: Option<u32>,
    /// Ask the registry to normalize schemas on registration
    pub normalize_schemas: bool,
    pub subject_name_strategy: SubjectNameStrategy,
    pub serde_type: SerdeType,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            auto_register_schemas: true,
            use_latest_version: false,
            use_schema_id: None,
            normalize_schemas: false,
            subject_name_strategy: SubjectNameStrategy::default(),
            serde_type: SerdeType::default(),
        }
    }
}

/// Configuration for the protobuf deserializer
///
/// The envelope is self-describing, so the subject is only derived for
/// log and error context.
#[derive(Debug, Clone, Default)]
pub struct DeserializerConfig {
    pub subject_name_strategy: SubjectNameStrategy,
    pub serde_type: SerdeType,
}

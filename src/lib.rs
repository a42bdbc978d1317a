//! Kafka Protobuf Schema Registry examples
//!
//! Two small programs around the `schema-registry-serde` crate:
//!
//! - `produce` serializes one example `User` record and sends it to Kafka
//! - `consume` reads records from one or more topics and prints them decoded
//!
//! # CLI Usage
//!
//! ```bash
//! # Produce one record
//! kafka-protobuf-sr produce --bootstrap-servers broker:9092 --topic users \
//!   --schema-registry-url https://registry.example.com
//!
//! # Consume until SIGINT/SIGTERM
//! kafka-protobuf-sr consume --bootstrap-servers broker:9092 --topics users,other \
//!   --group-id readers
//! ```
//!
//! Every option can also be set through the environment variable named in
//! its help text, or through a `.env` file in the working directory.

use anyhow::{bail, Result};
use clap::Parser;
use rdkafka::ClientConfig;
use schema_registry_serde::RegistryConfig;

pub mod consumer;
pub mod producer;
pub mod user;

/// Broker connection options shared by both programs
#[derive(Parser, Clone, Debug)]
pub struct KafkaOpts {
    /// Kafka bootstrap servers (comma-separated host:port list)
    #[arg(long, env = "BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: Option<String>,

    /// Kafka API key (SASL username)
    #[arg(long, env = "KAFKA_API_KEY")]
    pub kafka_api_key: Option<String>,

    /// Kafka API secret (SASL password)
    #[arg(long, env = "KAFKA_API_SECRET", hide_env_values = true)]
    pub kafka_api_secret: Option<String>,

    /// Kafka security protocol
    #[arg(long, default_value = "SASL_SSL", env = "KAFKA_SECURITY_PROTOCOL")]
    pub security_protocol: String,

    /// SASL mechanism
    #[arg(long, default_value = "PLAIN", env = "KAFKA_SASL_MECHANISM")]
    pub sasl_mechanism: String,
}

impl KafkaOpts {
    fn uses_sasl(&self) -> bool {
        self.security_protocol.to_ascii_uppercase().starts_with("SASL")
    }

    fn missing(&self, missing: &mut Vec<&'static str>) {
        if is_blank(&self.bootstrap_servers) {
            missing.push("BOOTSTRAP_SERVERS");
        }
        if self.uses_sasl() {
            if is_blank(&self.kafka_api_key) {
                missing.push("KAFKA_API_KEY");
            }
            if is_blank(&self.kafka_api_secret) {
                missing.push("KAFKA_API_SECRET");
            }
        }
    }

    /// librdkafka settings for these options. Call after validation.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set(
                "bootstrap.servers",
                self.bootstrap_servers.as_deref().unwrap_or_default(),
            )
            .set("security.protocol", &self.security_protocol);
        if self.uses_sasl() {
            config
                .set("sasl.mechanism", &self.sasl_mechanism)
                .set("sasl.username", self.kafka_api_key.as_deref().unwrap_or_default())
                .set(
                    "sasl.password",
                    self.kafka_api_secret.as_deref().unwrap_or_default(),
                );
        }
        config
    }
}

/// Schema registry options shared by both programs
#[derive(Parser, Clone, Debug)]
pub struct SchemaRegistryOpts {
    /// Schema registry URL (`mock://` selects an in-process registry)
    #[arg(long, env = "SCHEMA_REGISTRY_URL")]
    pub schema_registry_url: Option<String>,

    /// Schema registry API key
    #[arg(long, env = "SCHEMA_REGISTRY_API_KEY")]
    pub schema_registry_api_key: Option<String>,

    /// Schema registry API secret
    #[arg(long, env = "SCHEMA_REGISTRY_API_SECRET", hide_env_values = true)]
    pub schema_registry_api_secret: Option<String>,

    /// Registry request timeout in seconds
    #[arg(long, default_value = "30", env = "SCHEMA_REGISTRY_TIMEOUT_SECS")]
    pub schema_registry_timeout_secs: u64,
}

impl SchemaRegistryOpts {
    fn is_mock(&self) -> bool {
        self.schema_registry_url
            .as_deref()
            .is_some_and(|url| url.starts_with(schema_registry_serde::config::MOCK_SCHEME))
    }

    fn missing(&self, missing: &mut Vec<&'static str>) {
        if is_blank(&self.schema_registry_url) {
            missing.push("SCHEMA_REGISTRY_URL");
        }
        // The in-process registry takes no credentials.
        if !self.is_mock() {
            if is_blank(&self.schema_registry_api_key) {
                missing.push("SCHEMA_REGISTRY_API_KEY");
            }
            if is_blank(&self.schema_registry_api_secret) {
                missing.push("SCHEMA_REGISTRY_API_SECRET");
            }
        }
    }

    /// Registry client configuration. Call after validation.
    pub fn registry_config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::new(self.schema_registry_url.clone().unwrap_or_default());
        config.request_timeout = std::time::Duration::from_secs(self.schema_registry_timeout_secs);
        if let (Some(key), Some(secret)) = (
            &self.schema_registry_api_key,
            &self.schema_registry_api_secret,
        ) {
            config = config.with_basic_auth(key.clone(), secret.clone());
        }
        config
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Fail with every missing required setting named, not just the first.
pub fn require_all(missing: Vec<&'static str>) -> Result<()> {
    if missing.is_empty() {
        return Ok(());
    }
    bail!(
        "Missing required environment variable(s): {}",
        missing.join(", ")
    )
}

/// Load `.env` from the working directory if there is one.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {
            tracing::info!("No .env file found, continuing with system environment variables")
        }
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {e}"),
    }
}

//! `produce`: serialize the example user and send it with a header.

use crate::user::{example_user, message_to_json, user_schema, user_types};
use crate::{require_all, KafkaOpts, SchemaRegistryOpts};
use anyhow::{Context, Result};
use clap::Parser;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use schema_registry_serde::{ProtobufSerializer, SchemaRegistryClient, SerializerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const HEADER_KEY: &str = "myTestHeader";
pub const HEADER_VALUE: &[u8] = b"header values are binary";

#[derive(Parser, Clone, Debug)]
pub struct ProduceArgs {
    /// Topic to produce to
    #[arg(long, env = "TOPIC_NAME")]
    pub topic: Option<String>,

    #[command(flatten)]
    pub kafka: KafkaOpts,

    #[command(flatten)]
    pub registry: SchemaRegistryOpts,

    /// Register the schema when the subject does not have it yet
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "AUTO_REGISTER_SCHEMAS")]
    pub auto_register_schemas: bool,

    /// Seconds to wait for the delivery report
    #[arg(long, default_value = "30")]
    pub delivery_timeout_secs: u64,
}

impl ProduceArgs {
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        self.kafka.missing(&mut missing);
        if self.topic.as_deref().map_or(true, |t| t.trim().is_empty()) {
            missing.push("TOPIC_NAME");
        }
        self.registry.missing(&mut missing);
        require_all(missing)
    }
}

pub async fn run_produce(args: ProduceArgs) -> Result<()> {
    args.validate()?;
    let topic = args.topic.clone().unwrap_or_default();

    let producer: FutureProducer = args
        .kafka
        .client_config()
        .set("message.timeout.ms", (args.delivery_timeout_secs * 1000).to_string())
        .create()
        .context("Failed to create Kafka producer")?;
    info!("Created Kafka producer for {topic}");

    let schema = user_schema()?;
    let types = Arc::new(user_types(&schema)?);
    let client = SchemaRegistryClient::new(args.registry.registry_config())
        .context("Failed to create schema registry client")?;
    let serializer = ProtobufSerializer::new(
        client,
        types,
        SerializerConfig {
            auto_register_schemas: args.auto_register_schemas,
            ..Default::default()
        },
    );

    let user = example_user(&schema)?;
    let payload = serializer
        .serialize(&topic, &user)
        .await
        .context("Failed to serialize payload")?;
    info!("Serialized {} ({} bytes)", message_to_json(&user), payload.len());

    let headers = OwnedHeaders::new().insert(Header {
        key: HEADER_KEY,
        value: Some(HEADER_VALUE),
    });
    let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&topic)
        .payload(payload.as_slice())
        .headers(headers);

    match producer
        .send(record, Duration::from_secs(args.delivery_timeout_secs))
        .await
    {
        Ok(delivery) => {
            info!("Delivered message to topic {topic}: {delivery:?}");
            Ok(())
        }
        Err((e, _message)) => {
            error!("Delivery failed: {e}");
            Err(e).context(format!("Failed to deliver message to {topic}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(topic: Option<&str>) -> ProduceArgs {
        ProduceArgs::parse_from(
            [
                "produce",
                "--bootstrap-servers",
                "broker:9092",
                "--kafka-api-key",
                "key",
                "--kafka-api-secret",
                "secret",
                "--schema-registry-url",
                "mock://produce",
            ]
            .into_iter()
            .chain(topic.into_iter().flat_map(|t| ["--topic", t])),
        )
    }

    #[test]
    fn test_validate_requires_topic() {
        let err = args(None).validate().unwrap_err().to_string();
        assert!(err.contains("TOPIC_NAME"));
        assert!(args(Some("users")).validate().is_ok());
    }

    #[test]
    fn test_auto_register_defaults_on() {
        let parsed = args(Some("users"));
        assert!(parsed.auto_register_schemas);
        assert_eq!(parsed.delivery_timeout_secs, 30);
        assert_eq!(parsed.kafka.security_protocol, "SASL_SSL");
    }
}

//! `consume`: decode records from one or more topics until interrupted.

use crate::user::{message_to_json, user_schema, user_types};
use crate::{require_all, KafkaOpts, SchemaRegistryOpts};
use anyhow::{Context, Result};
use clap::Parser;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use schema_registry_serde::{
    DeserializerConfig, MessageHeader, ProtobufDeserializer, RecordMetadata, SchemaRegistryClient,
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

#[derive(Parser, Clone, Debug)]
pub struct ConsumeArgs {
    /// Comma-separated topics to subscribe to
    #[arg(long, env = "TOPIC_NAMES")]
    pub topics: Option<String>,

    /// Consumer group id
    #[arg(long, env = "CONSUMER_GROUP_ID")]
    pub group_id: Option<String>,

    /// Where to start without a committed offset ("earliest" or "latest")
    #[arg(long, default_value = "earliest", env = "CONSUMER_AUTO_OFFSET")]
    pub auto_offset_reset: String,

    /// Consumer session timeout in milliseconds
    #[arg(long, default_value = "10000")]
    pub session_timeout_ms: u32,

    #[command(flatten)]
    pub kafka: KafkaOpts,

    #[command(flatten)]
    pub registry: SchemaRegistryOpts,
}

impl ConsumeArgs {
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        self.kafka.missing(&mut missing);
        if self.topic_list().is_empty() {
            missing.push("TOPIC_NAMES");
        }
        self.registry.missing(&mut missing);
        if self.group_id.as_deref().map_or(true, |g| g.trim().is_empty()) {
            missing.push("CONSUMER_GROUP_ID");
        }
        require_all(missing)
    }

    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub async fn run_consume(args: ConsumeArgs) -> Result<()> {
    args.validate()?;
    let topics = args.topic_list();

    let consumer: StreamConsumer = args
        .kafka
        .client_config()
        .set("group.id", args.group_id.clone().unwrap_or_default())
        .set("session.timeout.ms", args.session_timeout_ms.to_string())
        .set("auto.offset.reset", &args.auto_offset_reset)
        .create()
        .context("Failed to create Kafka consumer")?;

    let schema = user_schema()?;
    let types = Arc::new(user_types(&schema)?);
    let client = SchemaRegistryClient::new(args.registry.registry_config())
        .context("Failed to create schema registry client")?;
    let deserializer = ProtobufDeserializer::new(client, types, DeserializerConfig::default());

    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
    consumer
        .subscribe(&topic_refs)
        .context("Failed to subscribe to topics")?;
    info!("Subscribed to {}", topics.join(", "));

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Caught SIGINT: terminating");
                break;
            }
            _ = sigterm.recv() => {
                info!("Caught SIGTERM: terminating");
                break;
            }
            received = consumer.recv() => match received {
                Ok(message) => handle_message(&deserializer, &message).await,
                // The client recovers on its own; errors are informational.
                Err(e) => error!("Kafka error: {e}"),
            },
        }
    }

    info!("Closing consumer");
    consumer.unsubscribe();
    Ok(())
}

async fn handle_message(deserializer: &ProtobufDeserializer, message: &BorrowedMessage<'_>) {
    let Some(payload) = message.payload() else {
        warn!(
            "Skipping record without payload on {} [{}] at offset {}",
            message.topic(),
            message.partition(),
            message.offset()
        );
        return;
    };

    match deserializer
        .deserialize_record(message.topic(), payload, record_metadata(message))
        .await
    {
        Ok(record) => {
            println!(
                "% Message on {} [{}] at offset {}:\n{}",
                record.topic,
                record.partition,
                record.offset,
                message_to_json(record.protobuf())
            );
            if !record.headers.is_empty() {
                println!("% Headers: {}", format_headers(&record.headers));
            }
        }
        Err(e) => error!("Failed to deserialize payload: {e}"),
    }
}

fn record_metadata(message: &BorrowedMessage<'_>) -> RecordMetadata {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| MessageHeader::new(h.key, h.value))
                .collect()
        })
        .unwrap_or_default();
    RecordMetadata {
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        timestamp: message.timestamp().to_millis(),
        headers,
    }
}

pub fn format_headers(headers: &[MessageHeader]) -> String {
    let rendered: Vec<String> = headers
        .iter()
        .map(|h| match &h.value {
            Some(value) => format!("{}=\"{}\"", h.key, String::from_utf8_lossy(value)),
            None => format!("{}=<null>", h.key),
        })
        .collect();
    format!("[{}]", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ConsumeArgs {
        let base = [
            "consume",
            "--bootstrap-servers",
            "broker:9092",
            "--security-protocol",
            "PLAINTEXT",
            "--schema-registry-url",
            "mock://consume",
        ];
        ConsumeArgs::parse_from(base.iter().chain(extra.iter()))
    }

    #[test]
    fn test_topic_list_splits_and_trims() {
        let parsed = args(&["--topics", "users, orders,,audit", "--group-id", "g"]);
        assert_eq!(parsed.topic_list(), vec!["users", "orders", "audit"]);
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.session_timeout_ms, 10000);
    }

    #[test]
    fn test_validate_names_group_and_topics() {
        let err = args(&[]).validate().unwrap_err().to_string();
        assert!(err.contains("TOPIC_NAMES"));
        assert!(err.contains("CONSUMER_GROUP_ID"));
    }

    #[test]
    fn test_format_headers() {
        let headers = vec![
            MessageHeader::new("myTestHeader", Some(b"header values are binary")),
            MessageHeader::new("empty", None),
        ];
        assert_eq!(
            format_headers(&headers),
            "[myTestHeader=\"header values are binary\", empty=<null>]"
        );
    }
}

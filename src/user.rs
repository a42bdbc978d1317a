//! The example `User` record produced and consumed by the CLI.

use anyhow::{Context, Result};
use base64::Engine;
use schema_registry_serde::{
    pack_any, ProtoFieldValue, ProtoMessage, ProtoParser, ProtoSchema, TypeRegistry,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// `user.proto`, registered with the schema registry as-is.
pub const USER_PROTO: &str = include_str!("../proto/user.proto");

pub const USER_TYPE: &str = "io.confluent.examples.protobuf.User";
pub const PREFERENCES_TYPE: &str = "io.confluent.examples.protobuf.Preferences";

pub fn user_schema() -> Result<Arc<ProtoSchema>> {
    let schema = ProtoParser::parse_file_set("user.proto", USER_PROTO, &[])
        .context("Failed to parse user.proto")?;
    Ok(Arc::new(schema))
}

/// Type registry holding `User` and `Preferences`.
pub fn user_types(schema: &Arc<ProtoSchema>) -> Result<TypeRegistry> {
    let mut types = TypeRegistry::new();
    types.register_message(schema.clone(), USER_TYPE)?;
    types.register_message(schema.clone(), PREFERENCES_TYPE)?;
    Ok(types)
}

/// The record the producer sends: a user with their preferences packed into
/// `extra_data`.
pub fn example_user(schema: &ProtoSchema) -> Result<ProtoMessage> {
    let preferences = ProtoMessage::new(
        schema
            .get_message(PREFERENCES_TYPE)
            .context("user.proto lacks Preferences")?,
    )
    .with_field("language", ProtoFieldValue::String("en".to_string()))?
    .with_field("dark_mode", ProtoFieldValue::Bool(true))?;

    let user = ProtoMessage::new(schema.get_message(USER_TYPE).context("user.proto lacks User")?)
        .with_field("name", ProtoFieldValue::String("First user".to_string()))?
        .with_field("favorite_number", ProtoFieldValue::Int64(42))?
        .with_field("favorite_color", ProtoFieldValue::String("blue".to_string()))?
        .with_field("extra_data", pack_any(&preferences))?;
    Ok(user)
}

/// Render a decoded message as JSON for printing.
///
/// Fields come out in definition order; unset fields are omitted.
pub fn message_to_json(message: &ProtoMessage) -> Value {
    let mut object = Map::new();
    object.insert("@type".to_string(), Value::String(message.message_type.clone()));
    for name in message.descriptor.list_fields() {
        if let Some(value) = message.get(name) {
            object.insert(name.clone(), field_to_json(value));
        }
    }
    Value::Object(object)
}

fn field_to_json(value: &ProtoFieldValue) -> Value {
    match value {
        ProtoFieldValue::Double(v) => json!(v),
        ProtoFieldValue::Float(v) => json!(v),
        ProtoFieldValue::Int32(v) => json!(v),
        // 64-bit integers are strings in the protobuf JSON mapping
        ProtoFieldValue::Int64(v) => json!(v.to_string()),
        ProtoFieldValue::Uint32(v) => json!(v),
        ProtoFieldValue::Uint64(v) => json!(v.to_string()),
        ProtoFieldValue::Bool(v) => json!(v),
        ProtoFieldValue::String(v) => json!(v),
        ProtoFieldValue::Bytes(v) => json!(base64::engine::general_purpose::STANDARD.encode(v)),
        ProtoFieldValue::Message(m) => message_to_json(m),
        ProtoFieldValue::Any { type_url, message } => {
            let mut rendered = message_to_json(message);
            if let Value::Object(object) = &mut rendered {
                object.insert("@type".to_string(), Value::String(type_url.clone()));
            }
            rendered
        }
        ProtoFieldValue::Repeated(values) => Value::Array(values.iter().map(field_to_json).collect()),
        ProtoFieldValue::Null => Value::Null,
    }
}

//! Integration tests for the registry HTTP contract

use mockito::{Matcher, Server};
use schema_registry_serde::{
    DeserializerConfig, Error, ProtoFieldValue, ProtoMessage, ProtoParser, ProtobufDeserializer,
    ProtobufSerializer, RegistryConfig, RegistrySchema, SchemaRegistryClient, SerializerConfig,
    TypeRegistry,
};
use serde_json::json;
use std::sync::Arc;

const AUTHORIZATION: &str = "Basic a2V5OnNlY3JldA==";
const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

const ORDER_PROTO: &str = "syntax = \"proto3\";\npackage shop;\nmessage Order {\n  string id = 1;\n  int64 quantity = 2;\n}\n";

fn client(server: &Server) -> SchemaRegistryClient {
    SchemaRegistryClient::new(RegistryConfig::new(server.url()).with_basic_auth("key", "secret"))
        .expect("Failed to build client")
}

fn types() -> (Arc<TypeRegistry>, Arc<schema_registry_serde::ProtoSchema>) {
    let schema = Arc::new(ProtoParser::parse_str(ORDER_PROTO).expect("Failed to parse proto"));
    let mut types = TypeRegistry::new();
    types.register_schema(schema.clone());
    (Arc::new(types), schema)
}

fn schema_body() -> String {
    json!({ "schema": ORDER_PROTO, "schemaType": "PROTOBUF" }).to_string()
}

#[tokio::test]
async fn lookup_by_id_hits_registry_once() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/schemas/ids/7")
        .match_header("authorization", AUTHORIZATION)
        .match_header("accept", CONTENT_TYPE)
        .with_status(200)
        .with_header("content-type", CONTENT_TYPE)
        .with_body(schema_body())
        .expect(1)
        .create_async()
        .await;
    let client = client(&server);

    //* When
    let first = client.lookup(7).await.expect("Failed to look up schema");
    let second = client.lookup(7).await.expect("Failed to look up schema");

    //* Then
    mock.assert_async().await;
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.parsed.get_message("shop.Order").is_some());
}

#[tokio::test]
async fn deserialize_resolves_schema_over_http() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/schemas/ids/7")
        .match_header("authorization", AUTHORIZATION)
        .with_status(200)
        .with_body(schema_body())
        .expect(1)
        .create_async()
        .await;
    let (types, _schema) = types();
    let deserializer =
        ProtobufDeserializer::new(client(&server), types, DeserializerConfig::default());
    // id 7, index [0], then field 2 = 5
    let bytes = [0, 0, 0, 0, 7, 0, 0x10, 0x05];

    //* When
    let first = deserializer.deserialize("orders", &bytes).await;
    let second = deserializer.deserialize("orders", &bytes).await;

    //* Then
    mock.assert_async().await;
    let first = first.expect("Failed to deserialize");
    assert_eq!(first.message_type, "shop.Order");
    assert_eq!(first.get("quantity"), Some(&ProtoFieldValue::Int64(5)));
    assert_eq!(first, second.expect("Failed to deserialize"));
}

#[tokio::test]
async fn serialize_registers_schema_with_normalize() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/subjects/orders-value/versions")
        .match_query(Matcher::UrlEncoded("normalize".into(), "true".into()))
        .match_header("authorization", AUTHORIZATION)
        .match_header("content-type", CONTENT_TYPE)
        .match_body(Matcher::PartialJson(json!({
            "schema": ORDER_PROTO,
            "schemaType": "PROTOBUF",
            "references": []
        })))
        .with_status(200)
        .with_body(r#"{"id": 3}"#)
        .expect(1)
        .create_async()
        .await;
    let (types, schema) = types();
    let config = SerializerConfig {
        normalize_schemas: true,
        ..Default::default()
    };
    let serializer = ProtobufSerializer::new(client(&server), types, config);
    let order = ProtoMessage::new(schema.get_message("shop.Order").unwrap())
        .with_field("quantity", ProtoFieldValue::Int64(5))
        .unwrap();

    //* When
    let first = serializer.serialize("orders", &order).await.expect("Failed to serialize");
    let second = serializer.serialize("orders", &order).await.expect("Failed to serialize");

    //* Then
    mock.assert_async().await;
    assert_eq!(first, vec![0, 0, 0, 0, 3, 0, 0x10, 0x05]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn serialize_without_auto_register_looks_up_subject() {
    //* Given
    let mut server = Server::new_async().await;
    let lookup = server
        .mock("POST", "/subjects/orders-value")
        .match_header("authorization", AUTHORIZATION)
        .with_status(200)
        .with_body(
            json!({
                "subject": "orders-value",
                "id": 11,
                "version": 4,
                "schema": ORDER_PROTO,
                "schemaType": "PROTOBUF"
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let register = server
        .mock("POST", "/subjects/orders-value/versions")
        .expect(0)
        .create_async()
        .await;
    let (types, schema) = types();
    let config = SerializerConfig {
        auto_register_schemas: false,
        ..Default::default()
    };
    let serializer = ProtobufSerializer::new(client(&server), types, config);
    let order = ProtoMessage::new(schema.get_message("shop.Order").unwrap());

    //* When
    let bytes = serializer.serialize("orders", &order).await.expect("Failed to serialize");

    //* Then
    lookup.assert_async().await;
    register.assert_async().await;
    assert_eq!(&bytes[..5], &[0, 0, 0, 0, 11]);
}

#[tokio::test]
async fn latest_version_is_fetched_every_time() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/subjects/orders-value/versions/latest")
        .with_status(200)
        .with_body(
            json!({
                "subject": "orders-value",
                "id": 11,
                "version": 4,
                "schema": ORDER_PROTO,
                "schemaType": "PROTOBUF"
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;
    let client = client(&server);

    //* When
    let latest = client.latest("orders-value").await.expect("Failed to fetch latest");
    client.latest("orders-value").await.expect("Failed to fetch latest");

    //* Then
    mock.assert_async().await;
    assert_eq!((latest.id, latest.version), (11, Some(4)));
    assert!(client.cache().get(11).is_some());
    assert!(client.cache().get_by_subject_version("orders-value", 4).is_some());
}

#[tokio::test]
async fn compatibility_is_never_cached() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/compatibility/subjects/orders-value/versions/latest")
        .match_header("authorization", AUTHORIZATION)
        .match_body(Matcher::PartialJson(json!({ "schemaType": "PROTOBUF" })))
        .with_status(200)
        .with_body(r#"{"is_compatible": true}"#)
        .expect(2)
        .create_async()
        .await;
    let client = client(&server);
    let schema = RegistrySchema::protobuf(ORDER_PROTO, vec![]);

    //* When
    let first = client.check_compatibility("orders-value", &schema).await;
    let second = client.check_compatibility("orders-value", &schema).await;

    //* Then
    mock.assert_async().await;
    assert!(first.expect("Failed to check compatibility"));
    assert!(second.expect("Failed to check compatibility"));
}

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/schemas/ids/7")
        .with_status(401)
        .with_body(r#"{"error_code": 401, "message": "Unauthorized"}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client(&server);

    //* When
    let err = client.lookup(7).await.unwrap_err();

    //* Then
    mock.assert_async().await;
    assert!(matches!(err, Error::Auth { status: 401, .. }));
    assert!(!err.is_retryable());
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn not_found_carries_registry_error_code() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/schemas/ids/404")
        .with_status(404)
        .with_body(r#"{"error_code": 40403, "message": "Schema 404 not found"}"#)
        .expect(2)
        .create_async()
        .await;
    let client = client(&server);

    //* When
    let first = client.lookup(404).await.unwrap_err();
    let second = client.lookup(404).await.unwrap_err();

    //* Then
    // Failures are not cached.
    mock.assert_async().await;
    assert!(matches!(
        first,
        Error::SchemaNotFound { error_code: Some(40403), .. }
    ));
    assert!(matches!(second, Error::SchemaNotFound { .. }));
}

#[tokio::test]
async fn server_error_is_retryable_registry_error() {
    //* Given
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/subjects/orders-value/versions/1")
        .with_status(503)
        .with_body("upstream unavailable")
        .expect(1)
        .create_async()
        .await;
    let client = client(&server);

    //* When
    let err = client
        .lookup_by_subject_version("orders-value", 1)
        .await
        .unwrap_err();

    //* Then
    mock.assert_async().await;
    assert!(matches!(err, Error::Registry { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_registry_is_network_error() {
    //* Given
    let client = SchemaRegistryClient::new(RegistryConfig::new("http://127.0.0.1:1"))
        .expect("Failed to build client");

    //* When
    let err = client.lookup(1).await.unwrap_err();

    //* Then
    assert!(matches!(err, Error::Network { .. }));
    assert!(err.is_retryable());
    assert_eq!(client.pending_lookups(), 0);
}

//! Protobuf type definitions.
//!
//! These are the shared data structures for runtime protobuf handling:
//!
//! ```text
//! ProtoSchema            one parsed .proto file (plus the imports it needs)
//!   └─ ProtoMessageDescriptor   one message type, with its message-index path
//!        └─ ProtoFieldDescriptor   one field
//!
//! ProtoMessage           a message value, carrying its descriptor
//!   └─ ProtoFieldValue      one field value
//! ```
//!
//! The parser, encoder and decoder live in `schema-registry-serde`; this
//! crate only holds the values they exchange.

use crate::error::{Result, SchemaTypesError};
use std::collections::{BTreeSet, HashMap};

/// Fully qualified name of the well-known `Any` envelope.
pub const ANY_TYPE_NAME: &str = "google.protobuf.Any";

/// Type URL prefix used when packing a message into `Any`.
pub const ANY_TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Represents a field value in a protobuf message.
///
/// Signed variants (`sint32`, `sfixed32`) and enums all surface as `Int32`,
/// unsigned fixed variants as `Uint32`/`Uint64`; the descriptor decides the
/// wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtoFieldValue {
    Double(f64),
    Float(f32),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Message(Box<ProtoMessage>),
    /// A `google.protobuf.Any` whose payload was resolved to a concrete type.
    Any {
        type_url: String,
        message: Box<ProtoMessage>,
    },
    Repeated(Vec<ProtoFieldValue>),
    Null,
}

impl ProtoFieldValue {
    /// Get the type descriptor for this field value.
    pub fn proto_field_type(&self) -> ProtoType {
        match self {
            ProtoFieldValue::Double(_) => ProtoType::Double,
            ProtoFieldValue::Float(_) => ProtoType::Float,
            ProtoFieldValue::Int32(_) => ProtoType::Int32,
            ProtoFieldValue::Int64(_) => ProtoType::Int64,
            ProtoFieldValue::Uint32(_) => ProtoType::Uint32,
            ProtoFieldValue::Uint64(_) => ProtoType::Uint64,
            ProtoFieldValue::Bool(_) => ProtoType::Bool,
            ProtoFieldValue::String(_) => ProtoType::String,
            ProtoFieldValue::Bytes(_) => ProtoType::Bytes,
            ProtoFieldValue::Message(msg) => ProtoType::Message(msg.message_type.clone()),
            ProtoFieldValue::Any { .. } => ProtoType::Message(ANY_TYPE_NAME.to_string()),
            ProtoFieldValue::Repeated(values) => ProtoType::Repeated(Box::new(
                values
                    .first()
                    .map(ProtoFieldValue::proto_field_type)
                    .unwrap_or(ProtoType::Null),
            )),
            ProtoFieldValue::Null => ProtoType::Null,
        }
    }

    /// Whether this value is the proto3 default for its type.
    ///
    /// Default values of implicit-presence fields are never written on the
    /// wire, so they are indistinguishable from an unset field.
    pub fn is_default(&self) -> bool {
        match self {
            ProtoFieldValue::Double(v) => *v == 0.0 && v.is_sign_positive(),
            ProtoFieldValue::Float(v) => *v == 0.0 && v.is_sign_positive(),
            ProtoFieldValue::Int32(v) => *v == 0,
            ProtoFieldValue::Int64(v) => *v == 0,
            ProtoFieldValue::Uint32(v) => *v == 0,
            ProtoFieldValue::Uint64(v) => *v == 0,
            ProtoFieldValue::Bool(v) => !*v,
            ProtoFieldValue::String(v) => v.is_empty(),
            ProtoFieldValue::Bytes(v) => v.is_empty(),
            ProtoFieldValue::Repeated(v) => v.is_empty(),
            ProtoFieldValue::Null => true,
            ProtoFieldValue::Message(_) | ProtoFieldValue::Any { .. } => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ProtoFieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&ProtoMessage> {
        match self {
            ProtoFieldValue::Message(m) | ProtoFieldValue::Any { message: m, .. } => Some(m),
            _ => None,
        }
    }
}

/// Represents a protobuf message value.
///
/// Contains the message type name, field values and the descriptor the
/// message was built or decoded against.
#[derive(Debug, Clone)]
pub struct ProtoMessage {
    /// Fully qualified message type name (e.g., "mypackage.MyMessage")
    pub message_type: String,
    /// Field values by field name
    pub fields: HashMap<String, ProtoFieldValue>,
    /// Schema reference for field introspection and encoding
    pub descriptor: ProtoMessageDescriptor,
}

impl ProtoMessage {
    /// Create an empty message of the given type.
    pub fn new(descriptor: &ProtoMessageDescriptor) -> Self {
        Self {
            message_type: descriptor.name.clone(),
            fields: HashMap::new(),
            descriptor: descriptor.clone(),
        }
    }

    /// Set a field, checking the value against the field's declared type.
    pub fn set(&mut self, name: &str, value: ProtoFieldValue) -> Result<()> {
        let field = self.descriptor.get_field(name).ok_or_else(|| {
            SchemaTypesError::FieldNotFound {
                message_type: self.message_type.clone(),
                field: name.to_string(),
            }
        })?;

        if !field.accepts(&value) {
            let expected = if field.is_repeated {
                ProtoType::Repeated(Box::new(field.field_type.clone()))
            } else {
                field.field_type.clone()
            };
            return Err(SchemaTypesError::InvalidFieldType {
                field: name.to_string(),
                expected,
                actual: value.proto_field_type(),
            });
        }

        self.fields.insert(name.to_string(), value);
        Ok(())
    }

    /// Builder form of [`ProtoMessage::set`].
    pub fn with_field(mut self, name: &str, value: ProtoFieldValue) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Get a field value by name.
    pub fn get(&self, name: &str) -> Option<&ProtoFieldValue> {
        self.fields.get(name)
    }

    /// The value as it would survive an encode/decode cycle.
    fn effective(&self, name: &str) -> Option<&ProtoFieldValue> {
        let value = self.fields.get(name)?;
        let has_presence = self
            .descriptor
            .get_field(name)
            .map(|f| f.has_presence && !f.is_repeated)
            .unwrap_or(true);
        if !has_presence && value.is_default() {
            return None;
        }
        if matches!(value, ProtoFieldValue::Null) {
            return None;
        }
        Some(value)
    }
}

/// Two messages are equal when they would encode to the same bytes: an
/// implicit-presence field holding its default equals an unset field.
impl PartialEq for ProtoMessage {
    fn eq(&self, other: &Self) -> bool {
        if self.message_type != other.message_type {
            return false;
        }
        let names: BTreeSet<&String> = self.fields.keys().chain(other.fields.keys()).collect();
        names
            .into_iter()
            .all(|name| self.effective(name) == other.effective(name))
    }
}

/// Protobuf field type enumeration.
///
/// Represents all possible protobuf scalar and composite types.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtoType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Message(String),
    Enum(String),
    Repeated(Box<ProtoType>),
    Null,
}

impl std::fmt::Display for ProtoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

impl ProtoType {
    /// Get the human-readable type name.
    pub fn type_name(&self) -> String {
        match self {
            ProtoType::Double => "double".to_string(),
            ProtoType::Float => "float".to_string(),
            ProtoType::Int32 => "int32".to_string(),
            ProtoType::Int64 => "int64".to_string(),
            ProtoType::Uint32 => "uint32".to_string(),
            ProtoType::Uint64 => "uint64".to_string(),
            ProtoType::Sint32 => "sint32".to_string(),
            ProtoType::Sint64 => "sint64".to_string(),
            ProtoType::Fixed32 => "fixed32".to_string(),
            ProtoType::Fixed64 => "fixed64".to_string(),
            ProtoType::Sfixed32 => "sfixed32".to_string(),
            ProtoType::Sfixed64 => "sfixed64".to_string(),
            ProtoType::Bool => "bool".to_string(),
            ProtoType::String => "string".to_string(),
            ProtoType::Bytes => "bytes".to_string(),
            ProtoType::Message(name) => format!("message:{name}"),
            ProtoType::Enum(name) => format!("enum:{name}"),
            ProtoType::Repeated(inner) => format!("repeated<{}>", inner.type_name()),
            ProtoType::Null => "null".to_string(),
        }
    }

    /// Scalar numeric types, which proto3 packs when repeated.
    pub fn is_packable(&self) -> bool {
        !matches!(
            self,
            ProtoType::String
                | ProtoType::Bytes
                | ProtoType::Message(_)
                | ProtoType::Repeated(_)
                | ProtoType::Null
        )
    }

    /// Whether this is the well-known `google.protobuf.Any` message.
    pub fn is_any(&self) -> bool {
        matches!(self, ProtoType::Message(name) if name.trim_start_matches('.') == ANY_TYPE_NAME)
    }

    /// Whether a single (non-repeated) value fits this type.
    pub fn accepts(&self, value: &ProtoFieldValue) -> bool {
        match (self, value) {
            (_, ProtoFieldValue::Null) => true,
            (ProtoType::Double, ProtoFieldValue::Double(_))
            | (ProtoType::Float, ProtoFieldValue::Float(_))
            | (ProtoType::Bool, ProtoFieldValue::Bool(_))
            | (ProtoType::String, ProtoFieldValue::String(_))
            | (ProtoType::Bytes, ProtoFieldValue::Bytes(_)) => true,
            (
                ProtoType::Int32 | ProtoType::Sint32 | ProtoType::Sfixed32 | ProtoType::Enum(_),
                ProtoFieldValue::Int32(_),
            ) => true,
            (
                ProtoType::Int64 | ProtoType::Sint64 | ProtoType::Sfixed64,
                ProtoFieldValue::Int64(_),
            ) => true,
            (ProtoType::Uint32 | ProtoType::Fixed32, ProtoFieldValue::Uint32(_)) => true,
            (ProtoType::Uint64 | ProtoType::Fixed64, ProtoFieldValue::Uint64(_)) => true,
            (ProtoType::Message(_), ProtoFieldValue::Any { .. }) => self.is_any(),
            (ProtoType::Message(name), ProtoFieldValue::Message(msg)) => {
                name.trim_start_matches('.') == msg.message_type
            }
            _ => false,
        }
    }
}

/// Describes a single field in a protobuf message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoFieldDescriptor {
    /// Field name
    pub name: String,
    /// Field number (tag)
    pub number: i32,
    /// Field type
    pub field_type: ProtoType,
    /// Whether the field is repeated
    pub is_repeated: bool,
    /// Whether the field is optional
    pub is_optional: bool,
    /// Whether a default value is still written on the wire (`optional`
    /// keyword, oneof members, message fields, proto2 scalars)
    pub has_presence: bool,
}

impl ProtoFieldDescriptor {
    /// Whether a value fits this field, including repetition.
    pub fn accepts(&self, value: &ProtoFieldValue) -> bool {
        match value {
            ProtoFieldValue::Repeated(values) if self.is_repeated => {
                values.iter().all(|v| self.field_type.accepts(v))
            }
            ProtoFieldValue::Repeated(_) => false,
            ProtoFieldValue::Null => true,
            _ if self.is_repeated => false,
            single => self.field_type.accepts(single),
        }
    }
}

/// Describes a protobuf message type.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoMessageDescriptor {
    /// Fully qualified message name (e.g., "mypackage.MyMessage")
    pub name: String,
    /// The .proto file that defines this message
    pub file: String,
    /// Position of the message inside its file: `[2]` is the third top-level
    /// message, `[2, 0]` the first message nested inside it
    pub index_path: Vec<i32>,
    /// Map of field names to their descriptors
    pub fields: HashMap<String, ProtoFieldDescriptor>,
    /// Ordered list of field names (preserves proto definition order)
    pub field_order: Vec<String>,
}

impl ProtoMessageDescriptor {
    /// Get a field descriptor by name.
    pub fn get_field(&self, name: &str) -> Option<&ProtoFieldDescriptor> {
        self.fields.get(name)
    }

    /// Get a field descriptor by field number.
    pub fn field_by_number(&self, number: i32) -> Option<&ProtoFieldDescriptor> {
        self.fields.values().find(|f| f.number == number)
    }

    /// List all field names in definition order.
    pub fn list_fields(&self) -> &[String] {
        &self.field_order
    }

    /// Fields sorted by ascending field number, the canonical wire order.
    pub fn fields_by_number(&self) -> Vec<&ProtoFieldDescriptor> {
        let mut fields: Vec<_> = self.fields.values().collect();
        fields.sort_by_key(|f| f.number);
        fields
    }

    /// Simple (unqualified) message name.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// A `.proto` file imported by a schema that is not a well-known type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoDependency {
    /// Import path as written in the importing file (e.g. "common/address.proto")
    pub name: String,
    /// Full text of the imported file
    pub source: String,
}

/// Represents a parsed `.proto` file and every message type it can reach.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoSchema {
    /// Name of the root file (e.g. "user.proto")
    pub file_name: String,
    /// Package declared by the root file
    pub package: Option<String>,
    /// Text of the root file, as registered with the schema registry
    pub source: String,
    /// Non well-known imports, transitively
    pub dependencies: Vec<ProtoDependency>,
    /// Direct imports of each file, keyed by file name
    pub imports: HashMap<String, Vec<String>>,
    /// Map of fully qualified message names to their descriptors
    pub messages: HashMap<String, ProtoMessageDescriptor>,
}

impl ProtoSchema {
    /// Get a message descriptor by name.
    ///
    /// Accepts a fully qualified name (with or without the leading dot) or,
    /// when it is unambiguous, a simple message name.
    pub fn get_message(&self, name: &str) -> Option<&ProtoMessageDescriptor> {
        let name = name.trim_start_matches('.');
        if let Some(descriptor) = self.messages.get(name) {
            return Some(descriptor);
        }
        let mut candidates = self
            .messages
            .values()
            .filter(|m| m.name.ends_with(&format!(".{name}")));
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// List all message type names in the schema, sorted.
    pub fn list_messages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.messages.keys().cloned().collect();
        names.sort();
        names
    }

    /// Find the message of the root file at the given message-index path.
    pub fn message_by_index_path(&self, path: &[i32]) -> Option<&ProtoMessageDescriptor> {
        self.messages
            .values()
            .find(|m| m.file == self.file_name && m.index_path == path)
    }

    /// Messages defined by the root file itself.
    pub fn file_messages(&self) -> impl Iterator<Item = &ProtoMessageDescriptor> {
        self.messages.values().filter(|m| m.file == self.file_name)
    }

    /// Direct imports of `file`, well-known ones included.
    pub fn imports_of(&self, file: &str) -> &[String] {
        self.imports.get(file).map(Vec::as_slice).unwrap_or(&[])
    }
}

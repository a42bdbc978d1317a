//! Protobuf encoder for ProtoMessage to wire format.
//!
//! The encoding follows proto3 wire format:
//! - Each field is encoded as (tag, value) pairs
//! - Tag = (field_number << 3) | wire_type
//! - Wire types: 0=varint, 1=64-bit, 2=length-delimited, 5=32-bit
//!
//! Fields are written in ascending field-number order, so equal messages
//! always produce identical bytes.

use crate::error::{Error, Result};
use protobuf::CodedOutputStream;
use schema_registry_types::{
    ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoType, ANY_TYPE_URL_PREFIX,
};

/// Runtime protobuf encoder.
///
/// Stateless: every message carries the descriptor it is encoded against.
pub struct ProtoEncoder;

impl ProtoEncoder {
    /// Encode a message to bytes (without any envelope).
    pub fn encode(message: &ProtoMessage) -> Result<Vec<u8>> {
        for name in message.fields.keys() {
            if message.descriptor.get_field(name).is_none() {
                return Err(Error::Encode(format!(
                    "Unknown field {name} in message {}",
                    message.message_type
                )));
            }
        }

        let mut buffer = Vec::new();
        {
            let mut stream = CodedOutputStream::vec(&mut buffer);

            for field in message.descriptor.fields_by_number() {
                let Some(value) = message.fields.get(&field.name) else {
                    continue;
                };
                encode_field(&mut stream, field, value)?;
            }

            stream.flush().map_err(encode_error)?;
        }

        Ok(buffer)
    }
}

/// Pack a message into the payload of a `google.protobuf.Any`.
pub fn pack_any(message: &ProtoMessage) -> ProtoFieldValue {
    ProtoFieldValue::Any {
        type_url: format!("{ANY_TYPE_URL_PREFIX}{}", message.message_type),
        message: Box::new(message.clone()),
    }
}

fn encode_error(e: protobuf::Error) -> Error {
    Error::Encode(e.to_string())
}

fn encode_field(
    stream: &mut CodedOutputStream,
    field: &ProtoFieldDescriptor,
    value: &ProtoFieldValue,
) -> Result<()> {
    if !field.accepts(value) {
        return Err(Error::Encode(format!(
            "Field {} expects {}, got {}",
            field.name,
            field.field_type,
            value.proto_field_type()
        )));
    }
    let number = field.number as u32;

    match value {
        ProtoFieldValue::Null => Ok(()),
        ProtoFieldValue::Repeated(values) if values.is_empty() => Ok(()),
        ProtoFieldValue::Repeated(values) if field.field_type.is_packable() => {
            let mut packed = Vec::new();
            {
                let mut packed_stream = CodedOutputStream::vec(&mut packed);
                for v in values {
                    write_scalar_no_tag(&mut packed_stream, &field.field_type, v)?;
                }
                packed_stream.flush().map_err(encode_error)?;
            }
            stream.write_bytes(number, &packed).map_err(encode_error)
        }
        ProtoFieldValue::Repeated(values) => {
            for v in values {
                write_value(stream, &field.field_type, number, v)?;
            }
            Ok(())
        }
        // Implicit presence: the default is the absence of the field.
        single if !field.has_presence && single.is_default() => Ok(()),
        single => write_value(stream, &field.field_type, number, single),
    }
}

fn write_value(
    stream: &mut CodedOutputStream,
    field_type: &ProtoType,
    number: u32,
    value: &ProtoFieldValue,
) -> Result<()> {
    match (field_type, value) {
        (ProtoType::Double, ProtoFieldValue::Double(v)) => stream.write_double(number, *v),
        (ProtoType::Float, ProtoFieldValue::Float(v)) => stream.write_float(number, *v),
        (ProtoType::Int32, ProtoFieldValue::Int32(v)) => stream.write_int32(number, *v),
        (ProtoType::Sint32, ProtoFieldValue::Int32(v)) => stream.write_sint32(number, *v),
        (ProtoType::Sfixed32, ProtoFieldValue::Int32(v)) => stream.write_sfixed32(number, *v),
        (ProtoType::Enum(_), ProtoFieldValue::Int32(v)) => stream.write_enum(number, *v),
        (ProtoType::Int64, ProtoFieldValue::Int64(v)) => stream.write_int64(number, *v),
        (ProtoType::Sint64, ProtoFieldValue::Int64(v)) => stream.write_sint64(number, *v),
        (ProtoType::Sfixed64, ProtoFieldValue::Int64(v)) => stream.write_sfixed64(number, *v),
        (ProtoType::Uint32, ProtoFieldValue::Uint32(v)) => stream.write_uint32(number, *v),
        (ProtoType::Fixed32, ProtoFieldValue::Uint32(v)) => stream.write_fixed32(number, *v),
        (ProtoType::Uint64, ProtoFieldValue::Uint64(v)) => stream.write_uint64(number, *v),
        (ProtoType::Fixed64, ProtoFieldValue::Uint64(v)) => stream.write_fixed64(number, *v),
        (ProtoType::Bool, ProtoFieldValue::Bool(v)) => stream.write_bool(number, *v),
        (ProtoType::String, ProtoFieldValue::String(v)) => stream.write_string(number, v),
        (ProtoType::Bytes, ProtoFieldValue::Bytes(v)) => stream.write_bytes(number, v),
        (ProtoType::Message(_), ProtoFieldValue::Message(msg)) => {
            let nested = ProtoEncoder::encode(msg)?;
            stream.write_bytes(number, &nested)
        }
        (ProtoType::Message(_), ProtoFieldValue::Any { type_url, message }) => {
            let nested = encode_any(type_url, message)?;
            stream.write_bytes(number, &nested)
        }
        (field_type, value) => {
            return Err(Error::Encode(format!(
                "Cannot write {} as {field_type}",
                value.proto_field_type()
            )))
        }
    }
    .map_err(encode_error)
}

fn write_scalar_no_tag(
    stream: &mut CodedOutputStream,
    field_type: &ProtoType,
    value: &ProtoFieldValue,
) -> Result<()> {
    match (field_type, value) {
        (ProtoType::Double, ProtoFieldValue::Double(v)) => stream.write_double_no_tag(*v),
        (ProtoType::Float, ProtoFieldValue::Float(v)) => stream.write_float_no_tag(*v),
        (ProtoType::Int32, ProtoFieldValue::Int32(v)) => stream.write_int32_no_tag(*v),
        (ProtoType::Sint32, ProtoFieldValue::Int32(v)) => stream.write_sint32_no_tag(*v),
        (ProtoType::Sfixed32, ProtoFieldValue::Int32(v)) => stream.write_sfixed32_no_tag(*v),
        (ProtoType::Enum(_), ProtoFieldValue::Int32(v)) => stream.write_enum_no_tag(*v),
        (ProtoType::Int64, ProtoFieldValue::Int64(v)) => stream.write_int64_no_tag(*v),
        (ProtoType::Sint64, ProtoFieldValue::Int64(v)) => stream.write_sint64_no_tag(*v),
        (ProtoType::Sfixed64, ProtoFieldValue::Int64(v)) => stream.write_sfixed64_no_tag(*v),
        (ProtoType::Uint32, ProtoFieldValue::Uint32(v)) => stream.write_uint32_no_tag(*v),
        (ProtoType::Fixed32, ProtoFieldValue::Uint32(v)) => stream.write_fixed32_no_tag(*v),
        (ProtoType::Uint64, ProtoFieldValue::Uint64(v)) => stream.write_uint64_no_tag(*v),
        (ProtoType::Fixed64, ProtoFieldValue::Uint64(v)) => stream.write_fixed64_no_tag(*v),
        (ProtoType::Bool, ProtoFieldValue::Bool(v)) => stream.write_bool_no_tag(*v),
        (field_type, value) => {
            return Err(Error::Encode(format!(
                "Cannot pack {} as {field_type}",
                value.proto_field_type()
            )))
        }
    }
    .map_err(encode_error)
}

/// `google.protobuf.Any { string type_url = 1; bytes value = 2; }`
fn encode_any(type_url: &str, message: &ProtoMessage) -> Result<Vec<u8>> {
    let value = ProtoEncoder::encode(message)?;
    let mut buffer = Vec::new();
    {
        let mut stream = CodedOutputStream::vec(&mut buffer);
        if !type_url.is_empty() {
            stream.write_string(1, type_url).map_err(encode_error)?;
        }
        if !value.is_empty() {
            stream.write_bytes(2, &value).map_err(encode_error)?;
        }
        stream.flush().map_err(encode_error)?;
    }
    Ok(buffer)
}

//! Protobuf decoder implementation.
//!
//! This module provides the runtime protobuf decoder that uses a parsed
//! schema and produces ProtoMessage/ProtoFieldValue values. `google.protobuf.Any`
//! payloads are resolved through a [`TypeRegistry`].

use crate::error::{Error, Result};
use crate::type_registry::TypeRegistry;
use protobuf::CodedInputStream;
use schema_registry_types::{
    ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor, ProtoSchema,
    ProtoType,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Nesting deeper than this is rejected rather than risking the stack.
const MAX_DEPTH: usize = 64;

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_FIXED32: u32 = 5;

/// Runtime protobuf decoder.
///
/// Decodes binary protobuf data into ProtoMessage using a parsed schema.
pub struct ProtoDecoder<'a> {
    schema: &'a ProtoSchema,
    types: Option<&'a TypeRegistry>,
    schema_id: Option<u32>,
    base_offset: usize,
}

impl<'a> ProtoDecoder<'a> {
    /// Create a new decoder from a schema.
    pub fn new(schema: &'a ProtoSchema) -> Self {
        Self {
            schema,
            types: None,
            schema_id: None,
            base_offset: 0,
        }
    }

    /// Resolve `Any` payloads through `types`.
    ///
    /// Without a type registry every `Any` field fails with `UnregisteredType`.
    pub fn with_type_registry(mut self, types: &'a TypeRegistry) -> Self {
        self.types = Some(types);
        self
    }

    /// Schema id reported in decode errors.
    pub fn with_schema_id(mut self, schema_id: u32) -> Self {
        self.schema_id = Some(schema_id);
        self
    }

    /// Offset of the data within the enclosing buffer, added to error offsets.
    pub fn with_base_offset(mut self, base_offset: usize) -> Self {
        self.base_offset = base_offset;
        self
    }

    /// Get a reference to the schema.
    pub fn schema(&self) -> &ProtoSchema {
        self.schema
    }

    /// Decode a protobuf message from bytes.
    pub fn decode(&self, message_type: &str, data: &[u8]) -> Result<ProtoMessage> {
        let descriptor = self.schema.get_message(message_type).ok_or_else(|| {
            self.error(message_type, 0, "message type not found in schema")
        })?;
        self.decode_descriptor(descriptor, data)
    }

    /// Decode bytes as the given message type of this decoder's schema.
    pub fn decode_descriptor(
        &self,
        descriptor: &ProtoMessageDescriptor,
        data: &[u8],
    ) -> Result<ProtoMessage> {
        let mut stream = CodedInputStream::from_bytes(data);
        self.decode_message(descriptor, &mut stream, 0)
    }

    /// Decoder for a sub-slice that starts `start` bytes into this decoder's data.
    fn at_offset(&self, start: usize) -> ProtoDecoder<'a> {
        ProtoDecoder {
            schema: self.schema,
            types: self.types,
            schema_id: self.schema_id,
            base_offset: self.base_offset + start,
        }
    }

    /// Read a length-delimited value, failing if fewer bytes remain than its
    /// length prefix claims. Returns the bytes and where they start.
    fn read_len_delimited(
        &self,
        message_type: &str,
        stream: &mut CodedInputStream,
    ) -> Result<(Vec<u8>, usize)> {
        let at = stream.pos();
        let bytes = stream
            .read_bytes()
            .map_err(|e| self.error(message_type, at, e))?;
        let start = stream.pos() as usize - bytes.len();
        Ok((bytes, start))
    }

    fn error(&self, message_type: &str, pos: u64, message: impl std::fmt::Display) -> Error {
        Error::decode(
            self.schema_id,
            message_type,
            self.base_offset as u64 + pos,
            message,
        )
    }

    fn decode_message(
        &self,
        descriptor: &ProtoMessageDescriptor,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<ProtoMessage> {
        if depth > MAX_DEPTH {
            return Err(self.error(
                &descriptor.name,
                stream.pos(),
                format!("message nesting exceeds {MAX_DEPTH} levels"),
            ));
        }
        let fail = |pos: u64, e: protobuf::Error| self.error(&descriptor.name, pos, e);

        let mut fields = HashMap::new();

        loop {
            let at = stream.pos();
            if stream.eof().map_err(|e| fail(at, e))? {
                break;
            }

            let tag = stream.read_raw_varint32().map_err(|e| fail(at, e))?;
            let field_number = (tag >> 3) as i32;
            let wire_type = tag & 0x7;

            if field_number == 0 {
                return Err(self.error(&descriptor.name, at, "invalid field number 0"));
            }

            let Some(field_desc) = descriptor.field_by_number(field_number) else {
                skip_field(stream, wire_type).map_err(|message| {
                    self.error(&descriptor.name, at, message)
                })?;
                continue;
            };

            if field_desc.is_repeated
                && field_desc.field_type.is_packable()
                && wire_type == WIRE_LEN
            {
                let values = self.decode_packed(descriptor, field_desc, stream)?;
                let existing = fields
                    .entry(field_desc.name.clone())
                    .or_insert_with(|| ProtoFieldValue::Repeated(Vec::new()));
                if let ProtoFieldValue::Repeated(existing) = existing {
                    existing.extend(values);
                }
                continue;
            }

            let expected = wire_type_of(&field_desc.field_type);
            if wire_type != expected {
                return Err(self.error(
                    &descriptor.name,
                    at,
                    format!(
                        "field {} has wire type {wire_type}, expected {expected}",
                        field_desc.name
                    ),
                ));
            }

            let value = self.decode_field_value(descriptor, field_desc, stream, depth)?;

            if field_desc.is_repeated {
                let existing = fields
                    .entry(field_desc.name.clone())
                    .or_insert_with(|| ProtoFieldValue::Repeated(Vec::new()));
                if let ProtoFieldValue::Repeated(values) = existing {
                    values.push(value);
                }
            } else {
                match fields.entry(field_desc.name.clone()) {
                    Entry::Occupied(mut slot) => merge_value(slot.get_mut(), value),
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                }
            }
        }

        Ok(ProtoMessage {
            message_type: descriptor.name.clone(),
            fields,
            descriptor: descriptor.clone(),
        })
    }

    fn decode_packed(
        &self,
        descriptor: &ProtoMessageDescriptor,
        field_desc: &ProtoFieldDescriptor,
        stream: &mut CodedInputStream,
    ) -> Result<Vec<ProtoFieldValue>> {
        let (bytes, start) = self.read_len_delimited(&descriptor.name, stream)?;
        let inner = self.at_offset(start);
        let fail = |pos: u64, e: protobuf::Error| inner.error(&descriptor.name, pos, e);

        let mut packed = CodedInputStream::from_bytes(&bytes);
        let mut values = Vec::new();
        loop {
            let at = packed.pos();
            if packed.eof().map_err(|e| fail(at, e))? {
                break;
            }
            values.push(
                read_scalar(&mut packed, &field_desc.field_type).map_err(|e| fail(at, e))?,
            );
        }
        Ok(values)
    }

    fn decode_field_value(
        &self,
        descriptor: &ProtoMessageDescriptor,
        field_desc: &ProtoFieldDescriptor,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<ProtoFieldValue> {
        let at = stream.pos();
        let fail = |e: protobuf::Error| self.error(&descriptor.name, at, e);

        match &field_desc.field_type {
            ProtoType::String => {
                let v = stream.read_string().map_err(fail)?;
                Ok(ProtoFieldValue::String(v))
            }
            ProtoType::Bytes => {
                let v = stream.read_bytes().map_err(fail)?;
                Ok(ProtoFieldValue::Bytes(v))
            }
            ProtoType::Message(type_name) => {
                let (bytes, start) = self.read_len_delimited(&descriptor.name, stream)?;
                let inner = self.at_offset(start);
                let mut nested_stream = CodedInputStream::from_bytes(&bytes);

                if field_desc.field_type.is_any() {
                    inner.decode_any(&mut nested_stream, depth)
                } else {
                    let nested_descriptor = self.schema.get_message(type_name).ok_or_else(|| {
                        self.error(
                            &descriptor.name,
                            at,
                            format!("nested type {type_name} is not in the schema"),
                        )
                    })?;
                    let nested =
                        inner.decode_message(nested_descriptor, &mut nested_stream, depth + 1)?;
                    Ok(ProtoFieldValue::Message(Box::new(nested)))
                }
            }
            scalar => read_scalar(stream, scalar).map_err(fail),
        }
    }

    /// `google.protobuf.Any { string type_url = 1; bytes value = 2; }`
    fn decode_any(&self, stream: &mut CodedInputStream, depth: usize) -> Result<ProtoFieldValue> {
        let any_name = schema_registry_types::ANY_TYPE_NAME;
        let start = stream.pos();
        let fail = |pos: u64, e: protobuf::Error| self.error(any_name, pos, e);

        let mut type_url = String::new();
        let mut value = Vec::new();
        let mut value_pos = start;

        loop {
            let at = stream.pos();
            if stream.eof().map_err(|e| fail(at, e))? {
                break;
            }
            let tag = stream.read_raw_varint32().map_err(|e| fail(at, e))?;
            match (tag >> 3, tag & 0x7) {
                (1, WIRE_LEN) => type_url = stream.read_string().map_err(|e| fail(at, e))?,
                (2, WIRE_LEN) => {
                    value = stream.read_bytes().map_err(|e| fail(at, e))?;
                    value_pos = at;
                }
                (_, wire_type) => skip_field(stream, wire_type)
                    .map_err(|message| self.error(any_name, at, message))?,
            }
        }

        if type_url.is_empty() {
            return Err(self.error(any_name, start, "Any without type_url"));
        }

        let types = self
            .types
            .ok_or_else(|| Error::UnregisteredType(type_url.clone()))?;
        let registered = types.resolve(&type_url)?;

        let inner = ProtoDecoder {
            schema: registered.schema.as_ref(),
            types: self.types,
            schema_id: self.schema_id,
            // The value's bytes start after its tag and length prefix; the
            // field start is close enough for diagnostics.
            base_offset: self.base_offset + value_pos as usize,
        };
        let mut inner_stream = CodedInputStream::from_bytes(&value);
        let message = inner.decode_message(&registered.descriptor, &mut inner_stream, depth + 1)?;

        Ok(ProtoFieldValue::Any {
            type_url,
            message: Box::new(message),
        })
    }
}

/// A singular field seen again on the wire: embedded messages merge field by
/// field, anything else is replaced by the later value.
fn merge_value(slot: &mut ProtoFieldValue, incoming: ProtoFieldValue) {
    match (slot, incoming) {
        (ProtoFieldValue::Message(existing), ProtoFieldValue::Message(incoming)) => {
            for (name, value) in incoming.fields {
                match existing.fields.entry(name) {
                    Entry::Occupied(mut field) => merge_value(field.get_mut(), value),
                    Entry::Vacant(field) => {
                        field.insert(value);
                    }
                }
            }
        }
        (ProtoFieldValue::Repeated(existing), ProtoFieldValue::Repeated(incoming)) => {
            existing.extend(incoming);
        }
        (slot, incoming) => *slot = incoming,
    }
}

fn wire_type_of(field_type: &ProtoType) -> u32 {
    match field_type {
        ProtoType::Double | ProtoType::Fixed64 | ProtoType::Sfixed64 => WIRE_FIXED64,
        ProtoType::Float | ProtoType::Fixed32 | ProtoType::Sfixed32 => WIRE_FIXED32,
        ProtoType::String
        | ProtoType::Bytes
        | ProtoType::Message(_)
        | ProtoType::Repeated(_) => WIRE_LEN,
        _ => WIRE_VARINT,
    }
}

fn read_scalar(
    stream: &mut CodedInputStream,
    field_type: &ProtoType,
) -> std::result::Result<ProtoFieldValue, protobuf::Error> {
    Ok(match field_type {
        ProtoType::Double => ProtoFieldValue::Double(stream.read_double()?),
        ProtoType::Float => ProtoFieldValue::Float(stream.read_float()?),
        ProtoType::Int32 | ProtoType::Enum(_) => ProtoFieldValue::Int32(stream.read_int32()?),
        ProtoType::Sint32 => ProtoFieldValue::Int32(stream.read_sint32()?),
        ProtoType::Sfixed32 => ProtoFieldValue::Int32(stream.read_sfixed32()?),
        ProtoType::Int64 => ProtoFieldValue::Int64(stream.read_int64()?),
        ProtoType::Sint64 => ProtoFieldValue::Int64(stream.read_sint64()?),
        ProtoType::Sfixed64 => ProtoFieldValue::Int64(stream.read_sfixed64()?),
        ProtoType::Uint32 => ProtoFieldValue::Uint32(stream.read_uint32()?),
        ProtoType::Fixed32 => ProtoFieldValue::Uint32(stream.read_fixed32()?),
        ProtoType::Uint64 => ProtoFieldValue::Uint64(stream.read_uint64()?),
        ProtoType::Fixed64 => ProtoFieldValue::Uint64(stream.read_fixed64()?),
        ProtoType::Bool => ProtoFieldValue::Bool(stream.read_bool()?),
        ProtoType::String => ProtoFieldValue::String(stream.read_string()?),
        ProtoType::Bytes => ProtoFieldValue::Bytes(stream.read_bytes()?),
        ProtoType::Message(_) | ProtoType::Repeated(_) | ProtoType::Null => ProtoFieldValue::Null,
    })
}

/// Skip the value of a field this schema does not know.
fn skip_field(stream: &mut CodedInputStream, wire_type: u32) -> std::result::Result<(), String> {
    let result = match wire_type {
        WIRE_VARINT => stream.read_raw_varint64().map(|_| ()),
        WIRE_FIXED64 => stream.read_raw_little_endian64().map(|_| ()),
        WIRE_LEN => {
            let len = stream.read_raw_varint32().map_err(|e| e.to_string())?;
            stream.read_raw_bytes(len).map(|_| ())
        }
        WIRE_FIXED32 => stream.read_raw_little_endian32().map(|_| ()),
        other => return Err(format!("unsupported wire type {other}")),
    };
    result.map_err(|e| e.to_string())
}

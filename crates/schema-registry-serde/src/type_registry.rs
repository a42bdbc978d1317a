use crate::error::{Error, Result};
use crate::proto::ProtoDecoder;
use schema_registry_types::{ProtoMessage, ProtoMessageDescriptor, ProtoSchema, ANY_TYPE_URL_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A message type known to a [`TypeRegistry`], with the schema that defines it
#[derive(Debug, Clone)]
pub struct RegisteredType {
    pub schema: Arc<ProtoSchema>,
    pub descriptor: ProtoMessageDescriptor,
}

impl RegisteredType {
    /// Whether the type is defined by the schema's root file, which is what
    /// gets registered with the schema registry.
    pub fn is_root_type(&self) -> bool {
        self.descriptor.file == self.schema.file_name
    }
}

/// Mapping from fully-qualified message type name to the schema that decodes it
///
/// Populated before use and then shared read-only, usually behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every message type of `schema`, including nested types and
    /// types of imported files. Returns the number of types registered.
    ///
    /// A type registered earlier under the same name is replaced, except that
    /// a definition from the name's own root file wins over one reached
    /// through an import.
    pub fn register_schema(&mut self, schema: Arc<ProtoSchema>) -> usize {
        let mut count = 0;
        for descriptor in schema.messages.values() {
            let candidate = RegisteredType {
                schema: schema.clone(),
                descriptor: descriptor.clone(),
            };
            let keep_existing = self
                .types
                .get(&descriptor.name)
                .is_some_and(|existing| existing.is_root_type() && !candidate.is_root_type());
            if !keep_existing {
                self.types.insert(descriptor.name.clone(), candidate);
                count += 1;
            }
        }
        debug!(
            "Registered {count} message types from {}",
            schema.file_name
        );
        count
    }

    /// Register a single message type of `schema`.
    pub fn register_message(&mut self, schema: Arc<ProtoSchema>, name: &str) -> Result<()> {
        let descriptor = schema
            .get_message(normalize_type_name(name))
            .cloned()
            .ok_or_else(|| Error::UnregisteredType(name.to_string()))?;
        debug!("Registered message type {}", descriptor.name);
        self.types.insert(
            descriptor.name.clone(),
            RegisteredType { schema, descriptor },
        );
        Ok(())
    }

    /// Look up a type by fully-qualified name or `Any` type URL.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredType> {
        self.types
            .get(normalize_type_name(name))
            .ok_or_else(|| Error::UnregisteredType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(normalize_type_name(name))
    }

    /// Decode `data` as the named type, resolving nested `Any` fields
    /// through this registry as well.
    pub fn decode(&self, name: &str, data: &[u8]) -> Result<ProtoMessage> {
        let registered = self.resolve(name)?;
        ProtoDecoder::new(&registered.schema)
            .with_type_registry(self)
            .decode_descriptor(&registered.descriptor, data)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Strip an `Any` type URL prefix and a leading dot.
///
/// Any URL authority is accepted, not only `type.googleapis.com`: the type
/// name is whatever follows the last `/`.
pub fn normalize_type_name(name: &str) -> &str {
    let name = name.strip_prefix(ANY_TYPE_URL_PREFIX).unwrap_or(name);
    let name = name.rsplit('/').next().unwrap_or(name);
    name.trim_start_matches('.')
}

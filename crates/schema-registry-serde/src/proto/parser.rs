use crate::error::{Error, Result};
use protobuf::descriptor::field_descriptor_proto::{Label, Type};
use protobuf::descriptor::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};
use protobuf_parse::Parser;
use schema_registry_types::{
    ProtoDependency, ProtoFieldDescriptor, ProtoMessageDescriptor, ProtoSchema, ProtoType,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tempfile::TempDir;

/// File name used when a schema is parsed from a bare string.
pub const DEFAULT_FILE_NAME: &str = "schema.proto";

/// Imports under this prefix are the well-known types bundled with the parser.
/// They are never registered as references.
pub const WELL_KNOWN_PREFIX: &str = "google/protobuf/";

pub fn is_well_known_import(name: &str) -> bool {
    name.starts_with(WELL_KNOWN_PREFIX)
}

/// Runtime `.proto` parser.
pub struct ProtoParser;

impl ProtoParser {
    /// Parse a self-contained `.proto` file from a string.
    ///
    /// Well-known imports such as `google/protobuf/any.proto` are allowed.
    pub fn parse_str(content: &str) -> Result<ProtoSchema> {
        Self::parse_file_set(DEFAULT_FILE_NAME, content, &[])
    }

    /// Parse a root `.proto` file together with the files it imports.
    ///
    /// `dependencies` are keyed by import path; everything is written to a
    /// scratch directory so that imports resolve exactly as they would on disk.
    pub fn parse_file_set(
        file_name: &str,
        content: &str,
        dependencies: &[ProtoDependency],
    ) -> Result<ProtoSchema> {
        let dir = TempDir::new()
            .map_err(|e| Error::SchemaParse(format!("Failed to create temp dir: {e}")))?;

        write_source(dir.path(), file_name, content)?;
        let dependencies: Vec<ProtoDependency> = dependencies
            .iter()
            .filter(|dep| !is_well_known_import(&dep.name))
            .cloned()
            .collect();
        for dep in &dependencies {
            write_source(dir.path(), &dep.name, &dep.source)?;
        }

        let mut parser = Parser::new();
        parser.pure();
        parser.include(dir.path());
        parser.input(dir.path().join(file_name));

        let parsed = parser
            .parse_and_typecheck()
            .map_err(|e| Error::SchemaParse(e.to_string()))?;

        build_schema(
            &parsed.file_descriptors,
            file_name,
            content.to_string(),
            dependencies,
        )
    }

    /// Parse a `.proto` file from disk, resolving imports relative to its directory.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ProtoSchema> {
        let path = path.as_ref();
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::SchemaParse(format!("Invalid proto path: {}", path.display())))?
            .to_string();

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::SchemaParse(format!("Failed to read {}: {e}", path.display())))?;

        let mut parser = Parser::new();
        parser.pure();
        parser.include(parent);
        parser.input(path);

        let parsed = parser
            .parse_and_typecheck()
            .map_err(|e| Error::SchemaParse(e.to_string()))?;

        let dependencies = collect_dependencies(&parsed.file_descriptors, &file_name, parent)?;
        build_schema(&parsed.file_descriptors, &file_name, content, dependencies)
    }
}

fn write_source(dir: &Path, name: &str, content: &str) -> Result<()> {
    let relative = Path::new(name);
    if relative.is_absolute() || name.split('/').any(|part| part == "..") {
        return Err(Error::SchemaParse(format!(
            "Import path must be relative and stay inside the schema root: {name}"
        )));
    }
    let target = dir.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::SchemaParse(format!("Failed to create {}: {e}", parent.display())))?;
    }
    std::fs::write(&target, content)
        .map_err(|e| Error::SchemaParse(format!("Failed to write {name}: {e}")))
}

/// Walk the import graph of `root` and load every non well-known import from disk.
fn collect_dependencies(
    files: &[FileDescriptorProto],
    root: &str,
    base: &Path,
) -> Result<Vec<ProtoDependency>> {
    let by_name: HashMap<&str, &FileDescriptorProto> = files
        .iter()
        .filter_map(|f| f.name.as_deref().map(|n| (n, f)))
        .collect();

    let mut seen = HashSet::new();
    let mut pending = vec![root.to_string()];
    let mut dependencies = Vec::new();

    while let Some(name) = pending.pop() {
        let Some(file) = by_name.get(name.as_str()) else {
            continue;
        };
        for import in &file.dependency {
            if is_well_known_import(import) || !seen.insert(import.clone()) {
                continue;
            }
            let source = std::fs::read_to_string(base.join(import))
                .map_err(|e| Error::SchemaParse(format!("Failed to read import {import}: {e}")))?;
            dependencies.push(ProtoDependency {
                name: import.clone(),
                source,
            });
            pending.push(import.clone());
        }
    }

    Ok(dependencies)
}

fn build_schema(
    files: &[FileDescriptorProto],
    root: &str,
    source: String,
    dependencies: Vec<ProtoDependency>,
) -> Result<ProtoSchema> {
    let root_file = files
        .iter()
        .find(|f| f.name.as_deref() == Some(root))
        .ok_or_else(|| Error::SchemaParse(format!("Parser returned no descriptor for {root}")))?;

    let mut messages = HashMap::new();
    let mut imports = HashMap::new();
    for file in files {
        collect_file_messages(file, &mut messages)?;
        if let Some(name) = &file.name {
            imports.insert(name.clone(), file.dependency.clone());
        }
    }

    Ok(ProtoSchema {
        file_name: root.to_string(),
        package: root_file.package.clone(),
        source,
        dependencies,
        imports,
        messages,
    })
}

fn collect_file_messages(
    file: &FileDescriptorProto,
    out: &mut HashMap<String, ProtoMessageDescriptor>,
) -> Result<()> {
    let file_name = file.name.clone().unwrap_or_default();
    let proto3 = file.syntax.as_deref() == Some("proto3");
    let package = file.package.clone().unwrap_or_default();

    for (index, message) in file.message_type.iter().enumerate() {
        collect_message(message, &package, &file_name, vec![index as i32], proto3, out)?;
    }
    Ok(())
}

fn collect_message(
    message: &DescriptorProto,
    scope: &str,
    file_name: &str,
    index_path: Vec<i32>,
    proto3: bool,
    out: &mut HashMap<String, ProtoMessageDescriptor>,
) -> Result<()> {
    let simple_name = message.name.clone().unwrap_or_default();
    let name = if scope.is_empty() {
        simple_name
    } else {
        format!("{scope}.{simple_name}")
    };

    let mut fields = HashMap::new();
    let mut field_order = Vec::new();

    for field in &message.field {
        let field_name = field.name.clone().unwrap_or_default();
        if field_name.is_empty() {
            continue;
        }
        field_order.push(field_name.clone());

        let field_type = parse_field_type(field)?;
        let is_repeated = field.label == Some(Label::LABEL_REPEATED.into());
        let has_presence = !is_repeated
            && (!proto3
                || field.proto3_optional == Some(true)
                || field.oneof_index.is_some()
                || matches!(field_type, ProtoType::Message(_)));

        let descriptor = ProtoFieldDescriptor {
            name: field_name.clone(),
            number: field.number.unwrap_or(0),
            field_type,
            is_repeated,
            is_optional: field.label == Some(Label::LABEL_OPTIONAL.into()),
            has_presence,
        };

        fields.insert(field_name, descriptor);
    }

    for (index, nested) in message.nested_type.iter().enumerate() {
        let mut nested_path = index_path.clone();
        nested_path.push(index as i32);
        collect_message(nested, &name, file_name, nested_path, proto3, out)?;
    }

    out.insert(
        name.clone(),
        ProtoMessageDescriptor {
            name,
            file: file_name.to_string(),
            index_path,
            fields,
            field_order,
        },
    );
    Ok(())
}

fn parse_field_type(field: &FieldDescriptorProto) -> Result<ProtoType> {
    let field_type_enum_or_unknown = field
        .type_
        .ok_or_else(|| Error::SchemaParse("Field missing type".to_string()))?;

    let field_type_enum = field_type_enum_or_unknown.enum_value_or_default();
    let type_name = || {
        field
            .type_name
            .clone()
            .unwrap_or_default()
            .trim_start_matches('.')
            .to_string()
    };

    Ok(match field_type_enum {
        Type::TYPE_DOUBLE => ProtoType::Double,
        Type::TYPE_FLOAT => ProtoType::Float,
        Type::TYPE_INT64 => ProtoType::Int64,
        Type::TYPE_UINT64 => ProtoType::Uint64,
        Type::TYPE_INT32 => ProtoType::Int32,
        Type::TYPE_FIXED64 => ProtoType::Fixed64,
        Type::TYPE_FIXED32 => ProtoType::Fixed32,
        Type::TYPE_BOOL => ProtoType::Bool,
        Type::TYPE_STRING => ProtoType::String,
        Type::TYPE_MESSAGE => ProtoType::Message(type_name()),
        Type::TYPE_BYTES => ProtoType::Bytes,
        Type::TYPE_UINT32 => ProtoType::Uint32,
        Type::TYPE_ENUM => ProtoType::Enum(type_name()),
        Type::TYPE_SFIXED32 => ProtoType::Sfixed32,
        Type::TYPE_SFIXED64 => ProtoType::Sfixed64,
        Type::TYPE_SINT32 => ProtoType::Sint32,
        Type::TYPE_SINT64 => ProtoType::Sint64,
        Type::TYPE_GROUP => {
            return Err(Error::SchemaParse(
                "TYPE_GROUP is Proto2 syntax only and deprecated hence not supported".to_string(),
            ))
        }
    })
}

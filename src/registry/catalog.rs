//! JSON Schema views of the registry, used by the directory endpoints and
//! the CLI's `schema` subcommand.

use std::collections::BTreeSet;

use schemars::schema::{
    ArrayValidation, InstanceType, Metadata, ObjectValidation, RootSchema, Schema, SchemaObject,
    SingleOrVec, SubschemaValidation,
};
use serde_json::{json, Value};

use crate::error::BridgeError;
use crate::types::{PrimitiveKind, TypeDescriptor};

use super::{CommandDefinition, ModelDefinition, ModelRegistry, Registry};

const DRAFT_07: &str = "http://json-schema.org/draft-07/schema#";

fn instance(ty: InstanceType) -> SchemaObject {
    SchemaObject {
        instance_type: Some(SingleOrVec::Single(Box::new(ty))),
        ..SchemaObject::default()
    }
}

fn any_of(variants: Vec<Schema>) -> Schema {
    Schema::Object(SchemaObject {
        subschemas: Some(Box::new(SubschemaValidation {
            any_of: Some(variants),
            ..SubschemaValidation::default()
        })),
        ..SchemaObject::default()
    })
}

fn array_of(items: SingleOrVec<Schema>, unique: bool) -> Schema {
    let mut schema = instance(InstanceType::Array);
    schema.array = Some(Box::new(ArrayValidation {
        items: Some(items),
        unique_items: unique.then_some(true),
        ..ArrayValidation::default()
    }));
    Schema::Object(schema)
}

/// JSON Schema for one descriptor. Records become `$ref`s into
/// `#/definitions`.
pub fn descriptor_schema(ty: &TypeDescriptor) -> Schema {
    match ty {
        TypeDescriptor::Primitive(kind) => {
            let mut schema = instance(match kind {
                PrimitiveKind::String | PrimitiveKind::Bytes => InstanceType::String,
                PrimitiveKind::Integer => InstanceType::Integer,
                PrimitiveKind::Float => InstanceType::Number,
                PrimitiveKind::Boolean => InstanceType::Boolean,
                PrimitiveKind::Null => InstanceType::Null,
            });
            if *kind == PrimitiveKind::Bytes {
                schema.format = Some("byte".to_string());
            }
            Schema::Object(schema)
        }
        TypeDescriptor::Optional(inner) => any_of(vec![
            descriptor_schema(inner),
            Schema::Object(instance(InstanceType::Null)),
        ]),
        TypeDescriptor::List(elem) => {
            array_of(SingleOrVec::Single(Box::new(descriptor_schema(elem))), false)
        }
        TypeDescriptor::Set(elem) => {
            array_of(SingleOrVec::Single(Box::new(descriptor_schema(elem))), true)
        }
        TypeDescriptor::Map { value, .. } => {
            let mut schema = instance(InstanceType::Object);
            schema.object().additional_properties = Some(Box::new(descriptor_schema(value)));
            Schema::Object(schema)
        }
        TypeDescriptor::Tuple(items) => {
            let len = u32::try_from(items.len()).unwrap_or(u32::MAX);
            let Schema::Object(mut schema) = array_of(
                SingleOrVec::Vec(items.iter().map(descriptor_schema).collect()),
                false,
            ) else {
                return Schema::Bool(true);
            };
            schema.array().min_items = Some(len);
            schema.array().max_items = Some(len);
            Schema::Object(schema)
        }
        TypeDescriptor::Union(variants) => any_of(variants.iter().map(descriptor_schema).collect()),
        TypeDescriptor::Record(name) => Schema::new_ref(format!("#/definitions/{name}")),
        TypeDescriptor::Unknown => Schema::Bool(true),
    }
}

fn object_schema<'a>(
    fields: impl Iterator<Item = (&'a str, &'a TypeDescriptor, bool, Option<&'a String>)>,
) -> SchemaObject {
    let mut schema = instance(InstanceType::Object);
    let object: &mut ObjectValidation = schema.object();
    for (name, ty, optional, description) in fields {
        let mut field = descriptor_schema(ty);
        if let (Schema::Object(obj), Some(text)) = (&mut field, description) {
            obj.metadata().description = Some(text.clone());
        }
        object.properties.insert(name.to_string(), field);
        if !optional {
            object.required.insert(name.to_string());
        }
    }
    schema
}

fn model_schema(def: &ModelDefinition) -> Schema {
    let mut schema = object_schema(def.fields.iter().map(|f| {
        (
            f.name.as_str(),
            &f.ty,
            f.optional || f.ty.is_nullable(),
            f.description.as_ref(),
        )
    }));
    if let Some(doc) = &def.documentation {
        schema.metadata = Some(Box::new(Metadata {
            title: Some(def.name.clone()),
            description: Some(doc.clone()),
            ..Metadata::default()
        }));
    }
    Schema::Object(schema)
}

fn definitions<'a>(
    models: &ModelRegistry,
    roots: impl Iterator<Item = &'a TypeDescriptor>,
) -> Result<schemars::Map<String, Schema>, BridgeError> {
    let mut names = BTreeSet::new();
    for root in roots {
        names.extend(models.collect_reachable(root));
    }
    names
        .into_iter()
        .map(|name| {
            let def = models.resolve(&name)?;
            Ok((name, model_schema(def)))
        })
        .collect()
}

fn params_root(registry: &Registry, def: &CommandDefinition) -> Result<RootSchema, BridgeError> {
    let mut schema = object_schema(
        def.params
            .iter()
            .map(|p| (p.name.as_str(), &p.ty, p.optional, None)),
    );
    if let Some(doc) = &def.documentation {
        schema.metadata().description = Some(doc.clone());
    }
    Ok(RootSchema {
        meta_schema: Some(DRAFT_07.to_string()),
        schema,
        definitions: definitions(registry.models(), def.params.iter().map(|p| &p.ty))?,
    })
}

/// Draft-07 schema of a command's argument object.
pub fn param_schema(registry: &Registry, name: &str) -> Result<Value, BridgeError> {
    let def = registry.get(name)?;
    let root = params_root(registry, def)?;
    serde_json::to_value(root)
        .map_err(|e| BridgeError::internal(format!("Failed to serialize schema: {e}")))
}

/// Full directory: every command with its parameter and output schemas, plus
/// every reachable record under a shared `definitions` table.
pub fn to_json_schema(registry: &Registry) -> Result<Value, BridgeError> {
    let mut commands = Vec::with_capacity(registry.len());
    for def in registry.list_all() {
        let params = params_root(registry, def)?;
        let output = def.output_type().map(descriptor_schema);
        commands.push(json!({
            "name": def.name,
            "module": def.module,
            "isStream": def.is_stream(),
            "documentation": def.documentation,
            "params": params.schema,
            "output": output,
        }));
    }
    let roots = registry
        .list_all()
        .flat_map(|def| def.params.iter().map(|p| &p.ty).chain(def.output_type()));
    let defs = definitions(registry.models(), roots)?;
    Ok(json!({
        "$schema": DRAFT_07,
        "commands": commands,
        "definitions": defs,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::registry::{CommandBuilder, NoParams};

    crate::bridge_model! {
        /// A place on the map.
        pub struct Spot {
            /// Display name.
            pub label: String,
            pub tags: Vec<String>,
            pub next: Option<Box<Spot>>,
        }
    }

    crate::bridge_model! {
        pub struct FindParams {
            pub near: Spot,
            pub radius: Option<f64>,
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                CommandBuilder::new("find", "maps")
                    .doc("Find spots near another.")
                    .params::<FindParams>()
                    .handler(|p: FindParams| async move { Ok::<_, String>(vec![p.near]) }),
            )
            .unwrap();
        registry
            .register(
                CommandBuilder::new("count", "maps")
                    .handler(|_: NoParams| async { Ok::<_, String>(3_u32) }),
            )
            .unwrap();
        registry
    }

    #[test]
    fn param_schema_lists_required_and_definitions() {
        let schema = param_schema(&registry(), "find").unwrap();
        assert_eq!(schema["$schema"], DRAFT_07);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["near"]));
        assert_eq!(schema["properties"]["near"]["$ref"], "#/definitions/Spot");
        assert_eq!(schema["properties"]["radius"]["anyOf"][1]["type"], "null");
        assert_eq!(schema["description"], "Find spots near another.");
        let spot = &schema["definitions"]["Spot"];
        assert_eq!(spot["description"], "A place on the map.");
        assert_eq!(spot["properties"]["label"]["description"], "Display name.");
        assert_eq!(spot["properties"]["tags"]["items"]["type"], "string");
        assert_eq!(spot["required"], json!(["label", "tags"]));
    }

    #[test]
    fn param_schema_unknown_command() {
        let err = param_schema(&registry(), "nope").unwrap_err();
        assert_eq!(err.code(), "COMMAND_NOT_FOUND");
    }

    #[test]
    fn tuple_and_set_schemas() {
        let tuple = serde_json::to_value(descriptor_schema(&TypeDescriptor::Tuple(vec![
            TypeDescriptor::string(),
            TypeDescriptor::integer(),
        ])))
        .unwrap();
        assert_eq!(tuple["minItems"], 2);
        assert_eq!(tuple["maxItems"], 2);
        assert_eq!(tuple["items"][1]["type"], "integer");

        let set = serde_json::to_value(descriptor_schema(&TypeDescriptor::set(
            TypeDescriptor::integer(),
        )))
        .unwrap();
        assert_eq!(set["uniqueItems"], true);
    }

    #[test]
    fn directory_covers_every_command() {
        let dir = to_json_schema(&registry()).unwrap();
        let names: Vec<&str> = dir["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["count", "find"]);
        assert_eq!(dir["commands"][0]["output"]["type"], "integer");
        assert!(dir["definitions"]["Spot"].is_object());
    }
}
